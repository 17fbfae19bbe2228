//! Repository Service error types.

use std::path::PathBuf;

use thiserror::Error;

use super::HostKey;

/// Failures shared by every repository operation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RepoError {
    #[error("failed to open repository at {0}: {1}")]
    Open(PathBuf, #[source] git2::Error),

    #[error("HEAD is not attached to a branch")]
    DetachedHead,

    #[error("host key for {0} does not match the known-hosts entry")]
    HostKeyMismatch(String),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcomes of a clone that the Bootstrap Protocol handles specially.
#[derive(Error, Debug)]
pub enum CloneError {
    #[error("the authenticity of host {} can't be established", .0.host)]
    UnknownHostKey(HostKey),

    #[error("remote repository is empty")]
    EmptyRemote,

    #[error("repository already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Error, Debug)]
pub enum PullError {
    #[error("local history diverged from the remote")]
    Diverged,

    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Error, Debug)]
pub enum PushError {
    #[error("push rejected: {0}")]
    Rejected(String),

    #[error("authentication failed: {0}")]
    Auth(#[source] git2::Error),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Error, Debug)]
pub enum ResetError {
    #[error("HEAD has no parent commit")]
    NoParent,

    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<git2::Error> for PullError {
    fn from(e: git2::Error) -> Self {
        PullError::Repo(e.into())
    }
}

impl From<git2::Error> for PushError {
    fn from(e: git2::Error) -> Self {
        PushError::Repo(e.into())
    }
}

impl From<git2::Error> for ResetError {
    fn from(e: git2::Error) -> Self {
        ResetError::Repo(e.into())
    }
}

impl From<git2::Error> for CloneError {
    fn from(e: git2::Error) -> Self {
        CloneError::Repo(e.into())
    }
}
