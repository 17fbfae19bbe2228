//! Chat data model.
//!
//! A [`Chat`] value is always a snapshot: the live state sits behind the
//! per-chat guard in the [`Registry`](crate::registry::Registry).

pub mod info;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::ChatError;
use crate::git::CommitInfo;

pub use info::{ChatInfo, INFO_FILE, InfoError};

/// One participant listed in a chat's info file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(alias = "Username")]
    pub username: String,
    #[serde(alias = "VisibleName")]
    pub visible_name: String,
    #[serde(alias = "Activity")]
    pub activity: DateTime<Utc>,
}

impl Member {
    pub fn new(username: impl Into<String>, now: DateTime<Utc>) -> Self {
        let username = username.into();
        Member {
            visible_name: username.clone(),
            username,
            activity: now,
        }
    }
}

/// A chat message: the projection of one message commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub author: String,
    pub time: DateTime<Utc>,
}

impl From<&CommitInfo> for Message {
    fn from(c: &CommitInfo) -> Self {
        Message {
            text: c.message.clone(),
            author: c.author_name.clone(),
            time: c.author_time,
        }
    }
}

/// Snapshot of one chat room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub url: String,
    pub name: String,
    pub members: Vec<Member>,
    /// Number of message commits on the chat branch.
    pub msg_num: usize,
    pub last_msg: Option<Message>,
    /// Messages that arrived since the chat was last read.
    pub unread: usize,
}

impl Chat {
    pub fn members_num(&self) -> usize {
        self.members.len()
    }
}

static CHAT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/([A-Za-z0-9_-]+)\.git/?$").expect("chat name pattern is valid")
});

/// Derive the chat name from a repository URL.
///
/// The name is the last path segment without its `.git` suffix:
/// `https://host/group/room.git` → `room`.
pub fn chat_name_from_url(url: &str) -> Result<String, ChatError> {
    CHAT_NAME_RE
        .captures(url.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ChatError::InvalidChatUrl(url.to_string()))
}

/// Host part of a chat URL, for the host-trust prompt.
///
/// Understands `scheme://[user@]host[:port]/path` and scp-like
/// `user@host:path`.
pub fn host_from_url(url: &str) -> Option<String> {
    let url = url.trim();
    let rest = match url.split_once("://") {
        Some((_, rest)) => rest.split('/').next()?,
        None => url.split(':').next()?,
    };
    let host = rest.rsplit('@').next()?;
    let host = match host.strip_prefix('[') {
        Some(v6) => v6.split(']').next()?,
        None => host.split(':').next()?,
    };
    (!host.is_empty()).then(|| host.to_string())
}
