use chrono::{DateTime, Utc};
use git2::{
    BranchType, CertificateCheckStatus, Commit, Cred, ErrorClass, ErrorCode, FetchOptions,
    ObjectType, Oid, PushOptions, RemoteCallbacks, Repository, RepositoryInitOptions, ResetType,
    Sort,
    build::{CheckoutBuilder, RepoBuilder},
};
use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::known_hosts::{HostCheck, KnownHosts, host_pattern, ssh_port};
use super::{
    CloneError, CommitId, CommitInfo, HostKey, PullError, PullOutcome, PushError, RepoError,
    RepoHandle, RepoService, ResetError, Signature,
};

const MAX_AUTH_ATTEMPTS: usize = 3;

/// What the certificate callback learned about the remote host.
#[derive(Debug)]
enum HostVerdict {
    Unknown(HostKey),
    Mismatch(String),
}

/// [`RepoService`] backed by libgit2.
///
/// Handles are plain paths; a `Repository` is opened per call because
/// `git2::Repository` is not `Sync` and calls arrive from several threads.
#[derive(Debug, Clone)]
pub struct Git2Service {
    known_hosts: PathBuf,
}

impl Git2Service {
    pub fn new(known_hosts: impl Into<PathBuf>) -> Self {
        Git2Service {
            known_hosts: known_hosts.into(),
        }
    }

    fn repo(&self, handle: &RepoHandle) -> Result<Repository, RepoError> {
        Repository::open(handle.path()).map_err(|e| RepoError::Open(handle.path().to_owned(), e))
    }

    /// Build callbacks with credentials and SSH host verification.
    ///
    /// Credentials are tried in order: ssh-agent, git credential helper,
    /// libgit2 defaults. The attempt counter stops libgit2 from looping
    /// forever on a rejected key.
    fn callbacks<'a>(
        &self,
        repo_cfg: Option<git2::Config>,
        port: Option<u16>,
        verdict: &'a RefCell<Option<HostVerdict>>,
    ) -> RemoteCallbacks<'a> {
        let attempts = Cell::new(0usize);
        let mut cb = RemoteCallbacks::new();
        cb.credentials(move |url, username_from_url, allowed| {
            attempts.set(attempts.get() + 1);
            if attempts.get() > MAX_AUTH_ATTEMPTS {
                return Err(git2::Error::new(
                    ErrorCode::Auth,
                    ErrorClass::Net,
                    "no accepted credentials",
                ));
            }
            if allowed.is_ssh_key() {
                return Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
            }
            if allowed.is_user_pass_plaintext()
                && let Some(ref cfg) = repo_cfg
                && let Ok(cred) = Cred::credential_helper(cfg, url, username_from_url)
            {
                return Ok(cred);
            }
            Cred::default()
        });

        let known_hosts = self.known_hosts.clone();
        cb.certificate_check(move |cert, host| {
            let Some(hostkey) = cert.as_hostkey() else {
                return Ok(CertificateCheckStatus::CertificatePassthrough);
            };
            let (Some(raw), Some(kind)) = (hostkey.hostkey(), hostkey.hostkey_type()) else {
                return Ok(CertificateCheckStatus::CertificatePassthrough);
            };
            let offered = HostKey {
                host: host_pattern(host, port),
                key_type: kind.name().to_string(),
                key: base64_encode(raw),
            };
            let store = KnownHosts::load(&known_hosts).map_err(|e| {
                git2::Error::new(ErrorCode::Certificate, ErrorClass::Ssh, e.to_string())
            })?;
            match store.check(&offered.host, &offered.key_type, &offered.key) {
                HostCheck::Trusted => Ok(CertificateCheckStatus::CertificateOk),
                HostCheck::Unknown => {
                    debug!(host, "unknown host key");
                    *verdict.borrow_mut() = Some(HostVerdict::Unknown(offered));
                    Err(git2::Error::new(
                        ErrorCode::Certificate,
                        ErrorClass::Ssh,
                        "unknown host key",
                    ))
                }
                HostCheck::Mismatch => {
                    warn!(host, "host key mismatch");
                    *verdict.borrow_mut() = Some(HostVerdict::Mismatch(host.to_string()));
                    Err(git2::Error::new(
                        ErrorCode::Certificate,
                        ErrorClass::Ssh,
                        "host key mismatch",
                    ))
                }
            }
        });
        cb
    }

    fn fetch_origin(&self, repo: &Repository) -> Result<(), RepoError> {
        let mut remote = repo.find_remote("origin")?;
        let port = remote.url().and_then(ssh_port);
        let verdict = RefCell::new(None);
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(self.callbacks(repo.config().ok(), port, &verdict));

        let res = remote.fetch(&["refs/heads/*:refs/remotes/origin/*"], Some(&mut fo), None);
        drop(fo);
        res.map_err(|e| host_error(verdict.into_inner()).unwrap_or(RepoError::Git(e)))
    }
}

fn host_error(verdict: Option<HostVerdict>) -> Option<RepoError> {
    match verdict? {
        HostVerdict::Mismatch(host) => Some(RepoError::HostKeyMismatch(host)),
        HostVerdict::Unknown(key) => Some(RepoError::Git(git2::Error::new(
            ErrorCode::Certificate,
            ErrorClass::Ssh,
            format!("unknown host key for {}", key.host),
        ))),
    }
}

fn base64_encode(raw: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(raw)
}

fn to_utc(t: git2::Time) -> DateTime<Utc> {
    DateTime::from_timestamp(t.seconds(), 0).unwrap_or_default()
}

fn empty_tree_id() -> Result<Oid, git2::Error> {
    Oid::hash_object(ObjectType::Tree, &[])
}

fn commit_info(c: &Commit<'_>) -> Result<CommitInfo, git2::Error> {
    let is_message = if c.parent_count() == 0 {
        c.tree_id() == empty_tree_id()?
    } else {
        c.parent(0)?.tree_id() == c.tree_id()
    };
    let author = c.author();
    Ok(CommitInfo {
        id: CommitId(c.id().to_string()),
        message: c.message().unwrap_or_default().trim_end_matches('\n').to_string(),
        author_name: author.name().unwrap_or_default().to_string(),
        author_time: to_utc(author.when()),
        committer_time: to_utc(c.committer().when()),
        is_message,
    })
}

/// Name of the branch HEAD points at, even when it is still unborn.
fn current_branch(repo: &Repository) -> Result<String, RepoError> {
    let head = repo.find_reference("HEAD")?;
    head.symbolic_target()
        .and_then(|t| t.strip_prefix("refs/heads/"))
        .map(str::to_string)
        .ok_or(RepoError::DetachedHead)
}

/// Resolve the remote-tracking ref to follow for `branch`.
///
/// Fallbacks are tried in order when `origin/<branch>` is missing:
/// `origin/HEAD` → `origin/main` → `origin/master`.
fn remote_tracking_ref(repo: &Repository, branch: &str) -> Option<String> {
    let own = format!("refs/remotes/origin/{}", branch);
    if repo.find_reference(&own).is_ok() {
        return Some(own);
    }
    if let Ok(origin_head) = repo.find_reference("refs/remotes/origin/HEAD")
        && let Some(target) = origin_head.symbolic_target()
    {
        return Some(target.to_string());
    }
    ["refs/remotes/origin/main", "refs/remotes/origin/master"]
        .into_iter()
        .find(|r| repo.find_reference(r).is_ok())
        .map(str::to_string)
}

/// Count commits reachable from `tip` and not from `base`.
fn count_between(repo: &Repository, tip: Oid, base: Option<Oid>) -> Result<usize, git2::Error> {
    let mut walk = repo.revwalk()?;
    walk.push(tip)?;
    if let Some(base) = base {
        walk.hide(base)?;
    }
    let mut n = 0;
    for oid in walk {
        oid?;
        n += 1;
    }
    Ok(n)
}

/// Point the unborn HEAD branch at the remote tip and check it out.
fn attach_unborn(repo: &Repository, remote_ref: &str) -> Result<usize, RepoError> {
    let remote_tip = repo.find_reference(remote_ref)?.peel_to_commit()?;
    let branch_name = remote_ref
        .strip_prefix("refs/remotes/origin/")
        .ok_or(RepoError::DetachedHead)?
        .to_string();

    let n = count_between(repo, remote_tip.id(), None)?;

    let local_ref = match repo.find_branch(&branch_name, BranchType::Local) {
        Ok(b) => b.into_reference(),
        Err(_) => {
            let mut b = repo.branch(&branch_name, &remote_tip, true)?;
            b.set_upstream(Some(&format!("origin/{}", branch_name)))?;
            b.into_reference()
        }
    };
    let name = local_ref.name().ok_or(RepoError::DetachedHead)?;
    repo.set_head(name)?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
    Ok(n)
}

impl RepoService for Git2Service {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<RepoHandle, CloneError> {
        if dest.exists() {
            return Err(CloneError::AlreadyExists(dest.to_owned()));
        }

        let verdict = RefCell::new(None);
        let cfg = git2::Config::open_default().ok();
        let result = {
            let mut fo = FetchOptions::new();
            fo.remote_callbacks(self.callbacks(cfg, ssh_port(url), &verdict));
            let mut builder = RepoBuilder::new();
            builder.fetch_options(fo);
            builder.clone(url, dest)
        };

        match result {
            Ok(repo) => {
                let has_branches = repo.references_glob("refs/remotes/origin/*")?.next().is_some();
                if !has_branches {
                    drop(repo);
                    fs::remove_dir_all(dest).map_err(RepoError::from)?;
                    return Err(CloneError::EmptyRemote);
                }
                // The remote HEAD may name a branch that does not exist.
                if repo.head().is_err() {
                    let branch = current_branch(&repo)?;
                    if let Some(remote_ref) = remote_tracking_ref(&repo, &branch) {
                        attach_unborn(&repo, &remote_ref)?;
                    }
                }
                Ok(RepoHandle::new(dest))
            }
            Err(e) => {
                if dest.exists()
                    && let Err(rm) = fs::remove_dir_all(dest)
                {
                    warn!(dest = %dest.display(), error = %rm, "failed to remove partial clone");
                }
                match verdict.into_inner() {
                    Some(HostVerdict::Unknown(key)) => Err(CloneError::UnknownHostKey(key)),
                    Some(HostVerdict::Mismatch(host)) => {
                        Err(RepoError::HostKeyMismatch(host).into())
                    }
                    None => Err(e.into()),
                }
            }
        }
    }

    fn init_with_remote(
        &self,
        dest: &Path,
        url: &str,
        branch: &str,
    ) -> Result<RepoHandle, RepoError> {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(branch).origin_url(url).mkpath(true);
        Repository::init_opts(dest, &opts)?;
        Ok(RepoHandle::new(dest))
    }

    fn open(&self, path: &Path) -> Result<RepoHandle, RepoError> {
        let handle = RepoHandle::new(path);
        let repo = self.repo(&handle)?;
        if repo.is_bare() {
            return Err(RepoError::Open(
                path.to_owned(),
                git2::Error::from_str("bare repositories cannot host a chat"),
            ));
        }
        Ok(handle)
    }

    fn pull(&self, handle: &RepoHandle) -> Result<PullOutcome, PullError> {
        let repo = self.repo(handle)?;
        self.fetch_origin(&repo)?;

        let branch = current_branch(&repo)?;
        let Some(remote_ref) = remote_tracking_ref(&repo, &branch) else {
            return Ok(PullOutcome::UpToDate);
        };
        let remote_oid = repo.refname_to_id(&remote_ref)?;

        let local_ref = format!("refs/heads/{}", branch);
        let local_oid = match repo.refname_to_id(&local_ref) {
            Ok(oid) => oid,
            Err(e) if e.code() == ErrorCode::NotFound => {
                let n = attach_unborn(&repo, &remote_ref)?;
                return Ok(PullOutcome::FastForward(n));
            }
            Err(e) => return Err(e.into()),
        };
        if local_oid == remote_oid {
            return Ok(PullOutcome::UpToDate);
        }

        let incoming = repo.find_annotated_commit(remote_oid)?;
        let (analysis, _) = repo.merge_analysis(&[&incoming])?;
        if analysis.is_up_to_date() {
            Ok(PullOutcome::UpToDate)
        } else if analysis.is_fast_forward() {
            let n = count_between(&repo, remote_oid, Some(local_oid))?;
            repo.find_reference(&local_ref)?
                .set_target(remote_oid, "pull: fast-forward")?;
            repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
            Ok(PullOutcome::FastForward(n))
        } else {
            Err(PullError::Diverged)
        }
    }

    fn log(
        &self,
        handle: &RepoHandle,
        since: Option<&CommitId>,
    ) -> Result<Vec<CommitInfo>, RepoError> {
        let repo = self.repo(handle)?;
        let head = match repo.head() {
            Ok(h) => h.peel_to_commit()?.id(),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut walk = repo.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        walk.push(head)?;
        if let Some(since) = since {
            walk.hide(Oid::from_str(&since.0)?)?;
        }

        let mut out = Vec::new();
        for oid in walk {
            let c = repo.find_commit(oid?)?;
            out.push(commit_info(&c)?);
        }
        Ok(out)
    }

    fn head(&self, handle: &RepoHandle) -> Result<Option<CommitInfo>, RepoError> {
        let repo = self.repo(handle)?;
        match repo.head() {
            Ok(h) => Ok(Some(commit_info(&h.peel_to_commit()?)?)),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn commit(
        &self,
        handle: &RepoHandle,
        staged: Option<&Path>,
        message: &str,
        author: &Signature,
    ) -> Result<CommitId, RepoError> {
        let repo = self.repo(handle)?;
        let parent = match repo.head() {
            Ok(h) => Some(h.peel_to_commit()?),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        let tree_id = match (staged, &parent) {
            (Some(file), _) => {
                let mut index = repo.index()?;
                index.add_path(file)?;
                index.write()?;
                index.write_tree()?
            }
            (None, Some(p)) => p.tree_id(),
            (None, None) => repo.treebuilder(None)?.write()?,
        };
        let tree = repo.find_tree(tree_id)?;

        let sig = git2::Signature::now(&author.name, &author.email)?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        debug!(commit = %oid, repo = %handle.path().display(), "committed");
        Ok(CommitId(oid.to_string()))
    }

    fn push(&self, handle: &RepoHandle) -> Result<(), PushError> {
        let repo = self.repo(handle)?;
        let branch = current_branch(&repo)?;
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);

        let verdict = RefCell::new(None);
        let rejected: RefCell<Option<String>> = RefCell::new(None);
        let mut remote = repo.find_remote("origin")?;
        let port = remote.url().and_then(ssh_port);
        let result = {
            let mut cb = self.callbacks(repo.config().ok(), port, &verdict);
            cb.push_update_reference(|_ref_name, status| {
                if let Some(msg) = status {
                    *rejected.borrow_mut() = Some(msg.to_string());
                }
                Ok(())
            });
            let mut opts = PushOptions::new();
            opts.remote_callbacks(cb);
            remote.push(&[refspec.as_str()], Some(&mut opts))
        };

        if let Err(e) = result {
            if let Some(err) = host_error(verdict.into_inner()) {
                return Err(err.into());
            }
            let msg = e.to_string();
            if e.code() == ErrorCode::Auth {
                return Err(PushError::Auth(e));
            }
            if e.code() == ErrorCode::NotFastForward
                || msg.contains("non-fast-forward")
                || msg.contains("non-fastforward")
                || msg.contains("fetch first")
            {
                return Err(PushError::Rejected(msg));
            }
            return Err(e.into());
        }
        if let Some(msg) = rejected.into_inner() {
            return Err(PushError::Rejected(msg));
        }

        if let Ok(mut b) = repo.find_branch(&branch, BranchType::Local)
            && b.upstream().is_err()
            && let Err(e) = b.set_upstream(Some(&format!("origin/{}", branch)))
        {
            warn!(branch = %branch, error = %e, "failed to set upstream");
        }
        Ok(())
    }

    fn reset_to_parent(&self, handle: &RepoHandle) -> Result<(), ResetError> {
        let repo = self.repo(handle)?;
        let head = match repo.head() {
            Ok(h) => h.peel_to_commit()?,
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                return Err(ResetError::NoParent);
            }
            Err(e) => return Err(e.into()),
        };
        if head.parent_count() == 0 {
            return Err(ResetError::NoParent);
        }
        let parent = head.parent(0)?;
        repo.reset(parent.as_object(), ResetType::Hard, None)?;
        Ok(())
    }

    fn origin_url(&self, handle: &RepoHandle) -> Result<Option<String>, RepoError> {
        let repo = self.repo(handle)?;
        match repo.find_remote("origin") {
            Ok(remote) => Ok(remote.url().map(str::to_string)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sig() -> Signature {
        Signature {
            name: "alice".into(),
            email: "alice@example.org".into(),
        }
    }

    fn bare_remote(dir: &Path) -> String {
        let mut opts = RepositoryInitOptions::new();
        opts.bare(true).initial_head("main");
        Repository::init_opts(dir, &opts).unwrap();
        format!("file://{}", dir.display())
    }

    #[test]
    fn empty_remote_is_reported_and_cleaned_up() {
        let td = tempdir().unwrap();
        let url = bare_remote(&td.path().join("remote.git"));
        let svc = Git2Service::new(td.path().join("known_hosts"));
        let dest = td.path().join("work");

        match svc.clone_repo(&url, &dest) {
            Err(CloneError::EmptyRemote) => {}
            other => panic!("unexpected clone result: {:?}", other.map(|_| ())),
        }
        assert!(!dest.exists());
    }

    #[test]
    fn clone_refuses_existing_destination() {
        let td = tempdir().unwrap();
        let url = bare_remote(&td.path().join("remote.git"));
        let svc = Git2Service::new(td.path().join("known_hosts"));
        let dest = td.path().join("work");
        fs::create_dir_all(&dest).unwrap();
        assert!(matches!(
            svc.clone_repo(&url, &dest),
            Err(CloneError::AlreadyExists(_))
        ));
    }

    #[test]
    fn commit_push_pull_between_two_clones() {
        let td = tempdir().unwrap();
        let url = bare_remote(&td.path().join("remote.git"));
        let svc = Git2Service::new(td.path().join("known_hosts"));

        let a = svc
            .init_with_remote(&td.path().join("a"), &url, "main")
            .unwrap();
        fs::write(a.path().join("info.json"), "{}").unwrap();
        svc.commit(&a, Some(Path::new("info.json")), "Create info.json", &sig())
            .unwrap();
        svc.commit(&a, None, "hello", &sig()).unwrap();
        svc.push(&a).unwrap();

        let b = svc.clone_repo(&url, &td.path().join("b")).unwrap();
        let log = svc.log(&b, None).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].message, "hello");
        assert!(log[0].is_message);
        assert!(!log[1].is_message);

        let seen = log[0].id.clone();
        svc.commit(&a, None, "second", &sig()).unwrap();
        svc.commit(&a, None, "third", &sig()).unwrap();
        svc.push(&a).unwrap();

        assert_eq!(svc.pull(&b).unwrap(), PullOutcome::FastForward(2));
        assert_eq!(svc.pull(&b).unwrap(), PullOutcome::UpToDate);
        let new: Vec<_> = svc
            .log(&b, Some(&seen))
            .unwrap()
            .into_iter()
            .map(|c| c.message)
            .collect();
        assert_eq!(new, vec!["third", "second"]);
    }

    #[test]
    fn unborn_clone_attaches_on_first_pull() {
        let td = tempdir().unwrap();
        let url = bare_remote(&td.path().join("remote.git"));
        let svc = Git2Service::new(td.path().join("known_hosts"));

        let a = svc
            .init_with_remote(&td.path().join("a"), &url, "main")
            .unwrap();
        let b = svc
            .init_with_remote(&td.path().join("b"), &url, "main")
            .unwrap();
        assert!(svc.head(&b).unwrap().is_none());
        assert_eq!(svc.pull(&b).unwrap(), PullOutcome::UpToDate);

        svc.commit(&a, None, "first", &sig()).unwrap();
        svc.push(&a).unwrap();

        assert_eq!(svc.pull(&b).unwrap(), PullOutcome::FastForward(1));
        let head = svc.head(&b).unwrap().unwrap();
        assert_eq!(head.message, "first");
        assert!(head.is_message);
    }

    #[test]
    fn reset_to_parent_drops_the_last_commit() {
        let td = tempdir().unwrap();
        let url = bare_remote(&td.path().join("remote.git"));
        let svc = Git2Service::new(td.path().join("known_hosts"));
        let a = svc
            .init_with_remote(&td.path().join("a"), &url, "main")
            .unwrap();

        assert!(matches!(svc.reset_to_parent(&a), Err(ResetError::NoParent)));

        svc.commit(&a, None, "root", &sig()).unwrap();
        assert!(matches!(svc.reset_to_parent(&a), Err(ResetError::NoParent)));

        fs::write(a.path().join("info.json"), "{}").unwrap();
        svc.commit(&a, Some(Path::new("info.json")), "Create info.json", &sig())
            .unwrap();
        svc.reset_to_parent(&a).unwrap();
        assert_eq!(svc.head(&a).unwrap().unwrap().message, "root");
        assert!(!a.path().join("info.json").exists());
    }

    #[test]
    fn stale_push_is_rejected() {
        let td = tempdir().unwrap();
        let url = bare_remote(&td.path().join("remote.git"));
        let svc = Git2Service::new(td.path().join("known_hosts"));
        let a = svc
            .init_with_remote(&td.path().join("a"), &url, "main")
            .unwrap();
        svc.commit(&a, None, "root", &sig()).unwrap();
        svc.push(&a).unwrap();

        let b = svc.clone_repo(&url, &td.path().join("b")).unwrap();
        svc.commit(&a, None, "from a", &sig()).unwrap();
        svc.push(&a).unwrap();
        svc.commit(&b, None, "from b", &sig()).unwrap();

        assert!(matches!(svc.push(&b), Err(PushError::Rejected(_))));
        assert!(matches!(svc.pull(&b), Err(PullError::Diverged)));
    }
}
