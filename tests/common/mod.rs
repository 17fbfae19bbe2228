#![allow(dead_code)]

use git2::{Repository, RepositoryInitOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use gitchat::git::{
    CloneError, CommitId, CommitInfo, Git2Service, PullError, PullOutcome, PushError, RepoError,
    RepoHandle, RepoService, ResetError, Signature,
};
use gitchat::identity::StaticIdentity;
use gitchat::{EngineConfig, Events, SyncEngine};

/// Create an empty bare repository named `<name>.git` and return its URL.
pub fn bare_remote(root: &Path, name: &str) -> String {
    let path = root.join("remotes").join(format!("{name}.git"));
    let mut opts = RepositoryInitOptions::new();
    opts.bare(true).initial_head("main").mkpath(true);
    Repository::init_opts(&path, &opts).unwrap();
    format!("file://{}", path.display())
}

/// Push a root commit adding `file` to an empty remote, without any info file.
pub fn seed_remote(root: &Path, url: &str, file: &str) {
    let work = root.join("seed");
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main").origin_url(url).mkpath(true);
    let repo = Repository::init_opts(&work, &opts).unwrap();
    std::fs::write(work.join(file), "seed\n").unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(file)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = git2::Signature::now("seed", "seed@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "seed", &tree, &[])
        .unwrap();
    repo.find_remote("origin")
        .unwrap()
        .push(&["refs/heads/main:refs/heads/main"], None)
        .unwrap();
}

pub fn config(root: &Path, user: &str) -> EngineConfig {
    EngineConfig {
        chats_dir: root.join(user).join("chats"),
        default_branch: "main".into(),
        known_hosts: root.join(user).join("known_hosts"),
        event_buffer: 1024,
    }
}

pub fn identity(user: &str) -> Arc<StaticIdentity> {
    Arc::new(StaticIdentity::new(user, format!("{user}@example.com")))
}

/// Engine for `user` over real git.
pub fn engine(root: &Path, user: &str) -> (Arc<SyncEngine>, Events) {
    engine_with_buffer(root, user, 1024)
}

pub fn engine_with_buffer(root: &Path, user: &str, event_buffer: usize) -> (Arc<SyncEngine>, Events) {
    let mut cfg = config(root, user);
    cfg.event_buffer = event_buffer;
    let repos = Arc::new(Git2Service::new(&cfg.known_hosts));
    let (engine, events) = SyncEngine::new(repos, identity(user), cfg);
    (Arc::new(engine), events)
}

/// Engine for `user` whose repository service can be told to fail.
pub fn flaky_engine(root: &Path, user: &str) -> (Arc<SyncEngine>, Events, Arc<FlakyRepos>) {
    let cfg = config(root, user);
    let repos = Arc::new(FlakyRepos::new(Git2Service::new(&cfg.known_hosts)));
    let (engine, events) = SyncEngine::new(repos.clone(), identity(user), cfg);
    (Arc::new(engine), events, repos)
}

pub fn chat_dir(root: &Path, user: &str, chat: &str) -> PathBuf {
    root.join(user).join("chats").join(chat)
}

/// Real git with switchable failures.
pub struct FlakyRepos {
    inner: Git2Service,
    pub fail_commit: AtomicBool,
    pub fail_push: AtomicBool,
    pub fail_reset: AtomicBool,
    pub pushes: AtomicUsize,
}

impl FlakyRepos {
    pub fn new(inner: Git2Service) -> Self {
        FlakyRepos {
            inner,
            fail_commit: AtomicBool::new(false),
            fail_push: AtomicBool::new(false),
            fail_reset: AtomicBool::new(false),
            pushes: AtomicUsize::new(0),
        }
    }

    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }
}

impl RepoService for FlakyRepos {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<RepoHandle, CloneError> {
        self.inner.clone_repo(url, dest)
    }

    fn init_with_remote(
        &self,
        dest: &Path,
        url: &str,
        branch: &str,
    ) -> Result<RepoHandle, RepoError> {
        self.inner.init_with_remote(dest, url, branch)
    }

    fn open(&self, path: &Path) -> Result<RepoHandle, RepoError> {
        self.inner.open(path)
    }

    fn pull(&self, repo: &RepoHandle) -> Result<PullOutcome, PullError> {
        self.inner.pull(repo)
    }

    fn log(
        &self,
        repo: &RepoHandle,
        since: Option<&CommitId>,
    ) -> Result<Vec<CommitInfo>, RepoError> {
        self.inner.log(repo, since)
    }

    fn head(&self, repo: &RepoHandle) -> Result<Option<CommitInfo>, RepoError> {
        self.inner.head(repo)
    }

    fn commit(
        &self,
        repo: &RepoHandle,
        staged: Option<&Path>,
        message: &str,
        author: &Signature,
    ) -> Result<CommitId, RepoError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(RepoError::DetachedHead);
        }
        self.inner.commit(repo, staged, message, author)
    }

    fn push(&self, repo: &RepoHandle) -> Result<(), PushError> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(PushError::Rejected("injected".into()));
        }
        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.inner.push(repo)
    }

    fn origin_url(&self, repo: &RepoHandle) -> Result<Option<String>, RepoError> {
        self.inner.origin_url(repo)
    }

    fn reset_to_parent(&self, repo: &RepoHandle) -> Result<(), ResetError> {
        if self.fail_reset.load(Ordering::SeqCst) {
            return Err(ResetError::NoParent);
        }
        self.inner.reset_to_parent(repo)
    }
}
