//! Repository Service.
//!
//! Everything the chat engine needs from version control goes through the
//! [`RepoService`] trait. The production implementation lives in
//! `git2_backend`; no other module drives repositories through `git2`.

mod error;
mod git2_backend;
pub mod known_hosts;

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};

pub use error::{CloneError, PullError, PushError, RepoError, ResetError};
pub use git2_backend::Git2Service;

/// A local working copy known to the Repository Service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    path: PathBuf,
}

impl RepoHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RepoHandle { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Hex object id of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId(pub String);

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only projection of one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: CommitId,
    pub message: String,
    pub author_name: String,
    pub author_time: DateTime<Utc>,
    pub committer_time: DateTime<Utc>,
    /// True when the commit leaves the tree untouched, i.e. it carries a chat
    /// message rather than a change to tracked files.
    pub is_message: bool,
}

/// Result of a successful pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    UpToDate,
    FastForward(usize),
}

impl PullOutcome {
    pub fn new_commits(self) -> usize {
        match self {
            PullOutcome::UpToDate => 0,
            PullOutcome::FastForward(n) => n,
        }
    }
}

/// Author identity written into commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

/// An SSH host key offered by a remote that is not yet trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    pub host: String,
    pub key_type: String,
    /// Base64 encoded key blob, as stored in `known_hosts`.
    pub key: String,
}

impl HostKey {
    /// OpenSSH style fingerprint, `SHA256:<unpadded base64>`.
    ///
    /// `None` if the key blob is not valid base64.
    pub fn fingerprint(&self) -> Option<String> {
        use base64::Engine;
        use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
        use sha2::{Digest, Sha256};

        let raw = STANDARD.decode(self.key.as_bytes()).ok()?;
        Some(format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(&raw))))
    }
}

/// Version-control operations used by the chat engine.
///
/// Every call is blocking I/O. Implementations must be shareable between the
/// poller and request threads.
pub trait RepoService: Send + Sync {
    /// Clone `url` into `dest`, which must not exist yet.
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<RepoHandle, CloneError>;

    /// Create an empty repository at `dest` whose `origin` points at `url`
    /// and whose HEAD is the unborn `branch`.
    fn init_with_remote(&self, dest: &Path, url: &str, branch: &str)
    -> Result<RepoHandle, RepoError>;

    fn open(&self, path: &Path) -> Result<RepoHandle, RepoError>;

    /// Fetch `origin` and fast-forward the current branch.
    fn pull(&self, repo: &RepoHandle) -> Result<PullOutcome, PullError>;

    /// Commits reachable from HEAD but not from `since`, newest first.
    fn log(&self, repo: &RepoHandle, since: Option<&CommitId>)
    -> Result<Vec<CommitInfo>, RepoError>;

    /// The HEAD commit, or `None` while the branch is unborn.
    fn head(&self, repo: &RepoHandle) -> Result<Option<CommitInfo>, RepoError>;

    /// Commit on the current branch. With `staged` set, that workdir-relative
    /// file is added to the index first; otherwise the tree is unchanged.
    fn commit(
        &self,
        repo: &RepoHandle,
        staged: Option<&Path>,
        message: &str,
        author: &Signature,
    ) -> Result<CommitId, RepoError>;

    /// Push the current branch to `origin`.
    fn push(&self, repo: &RepoHandle) -> Result<(), PushError>;

    /// Hard-reset the current branch to the parent of HEAD.
    fn reset_to_parent(&self, repo: &RepoHandle) -> Result<(), ResetError>;

    /// URL of the `origin` remote, or `None` when there is none.
    fn origin_url(&self, repo: &RepoHandle) -> Result<Option<String>, RepoError>;
}
