use thiserror::Error;

use crate::chat::InfoError;
use crate::git::{HostKey, PullError, PushError, RepoError, ResetError};
use crate::identity::IdentityError;

/// The last commit could not be rolled back, so the local chat was removed.
#[derive(Error, Debug)]
#[error("failed to reset the last commit: {0}")]
pub struct ResetLastCommitFailed(#[source] pub ResetError);

/// Failures reported by the Bootstrap Protocol and the Sync Engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChatError {
    #[error("no chat name in URL {0:?}")]
    InvalidChatUrl(String),

    #[error("chat {0} is already added")]
    ChatAlreadyAdded(String),

    #[error("{} already holds a chat from {}", .path.display(), .existing.as_deref().unwrap_or("an unknown remote"))]
    ChatDirOccupied {
        path: std::path::PathBuf,
        existing: Option<String>,
    },

    #[error("the authenticity of host {} can't be established", .0.host)]
    UnknownHostKey(HostKey),

    #[error("failed to commit chat info: {0}")]
    CommitChatInfo(#[source] RepoError),

    #[error("failed to push chat info: {cause}")]
    PushChatInfo {
        cause: PushError,
        /// Set when the commit could not be reset and the chat directory was
        /// deleted instead.
        #[source]
        reset: Option<ResetLastCommitFailed>,
    },

    #[error("no chat is selected")]
    CurrentChatUnset,

    #[error("unknown chat {0}")]
    ChatNotFound(String),

    #[error("message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Repository(#[from] RepoError),

    #[error(transparent)]
    Pull(#[from] PullError),

    #[error(transparent)]
    Push(#[from] PushError),

    #[error(transparent)]
    Info(#[from] InfoError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// True when a failed chat-info push also failed to roll back, meaning the
    /// local chat directory was removed.
    pub fn chat_removed(&self) -> bool {
        matches!(self, ChatError::PushChatInfo { reset: Some(_), .. })
    }

    /// Whether the operator can resolve this by answering a prompt or simply
    /// being told about it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChatError::UnknownHostKey(_) | ChatError::ChatAlreadyAdded(_)
        )
    }
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
