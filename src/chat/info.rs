//! ChatInfo Store: the roster file tracked inside every chat repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::Member;

pub const INFO_FILE: &str = "info.json";

#[derive(Error, Debug)]
pub enum InfoError {
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted roster of a chat.
///
/// The only chat state that crosses the repository boundary; counts and the
/// last message are always derived from history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInfo {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub members_num: usize,
    #[serde(default)]
    pub members: Vec<Member>,
}

impl ChatInfo {
    /// Roster of a freshly created chat whose only member is `creator`.
    pub fn new(
        url: impl Into<String>,
        name: impl Into<String>,
        creator: &str,
        now: DateTime<Utc>,
    ) -> Self {
        ChatInfo {
            url: url.into(),
            name: name.into(),
            members_num: 1,
            members: vec![Member::new(creator, now)],
        }
    }

    pub fn has_member(&self, username: &str) -> bool {
        self.members.iter().any(|m| m.username == username)
    }
}

pub fn info_path(chat_dir: &Path) -> PathBuf {
    chat_dir.join(INFO_FILE)
}

/// Read the info file of the chat checked out at `chat_dir`.
///
/// A missing file is reported as [`InfoError::NotFound`], distinct from
/// other I/O failures.
pub fn load(chat_dir: &Path) -> Result<ChatInfo, InfoError> {
    let path = info_path(chat_dir);
    let bytes = match fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(InfoError::NotFound(path)),
        Err(source) => return Err(InfoError::Io { path, source }),
    };
    serde_json::from_slice(&bytes).map_err(|source| InfoError::Json { path, source })
}

/// Write `info` to `chat_dir`, keeping `membersNum` in step with the roster.
pub fn save(chat_dir: &Path, info: &ChatInfo) -> Result<(), InfoError> {
    let path = info_path(chat_dir);
    let mut info = info.clone();
    info.members_num = info.members.len();
    let mut json = serde_json::to_vec_pretty(&info).map_err(|source| InfoError::Json {
        path: path.clone(),
        source,
    })?;
    json.push(b'\n');
    fs::write(&path, json).map_err(|source| InfoError::Io { path, source })
}

/// Append `username` to the roster unless already listed.
///
/// Returns the updated roster and whether it changed; the caller persists and
/// publishes when it did.
pub fn reconcile_membership(
    mut info: ChatInfo,
    username: &str,
    now: DateTime<Utc>,
) -> (ChatInfo, bool) {
    if info.has_member(username) {
        return (info, false);
    }
    info.members.push(Member::new(username, now));
    info.members_num = info.members.len();
    (info, true)
}
