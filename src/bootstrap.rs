//! Bootstrap Protocol: joining a chat by URL.
//!
//! `add_chat` walks Resolving → Fetching → InfoCheck → (InfoLoad | InfoCreate)
//! → Ready. A failure in InfoCreate rolls the local repository back so no
//! unpushed bookkeeping commit is left behind.

use chrono::Utc;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, instrument, warn};

use crate::chat::info;
use crate::chat::{Chat, ChatInfo, INFO_FILE, InfoError, chat_name_from_url, host_from_url};
use crate::engine::SyncEngine;
use crate::error::{ChatError, ResetLastCommitFailed, Result};
use crate::git::{CloneError, RepoHandle, Signature};
use crate::notify::Event;
use crate::registry::ChatState;

/// Bootstrap stage, reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Fetching,
    InfoCheck,
    InfoLoad,
    InfoCreate,
    Ready,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Resolving => "resolving",
            Stage::Fetching => "fetching",
            Stage::InfoCheck => "info-check",
            Stage::InfoLoad => "info-load",
            Stage::InfoCreate => "info-create",
            Stage::Ready => "ready",
        };
        f.write_str(s)
    }
}

impl SyncEngine {
    /// Join the chat hosted at `url`.
    ///
    /// Clones the repository into the chat storage root (or initialises an
    /// empty one tracking `url`), makes sure the operator is on the roster,
    /// counts the history and registers the chat.
    ///
    /// # Errors
    /// - [`ChatError::InvalidChatUrl`] if no chat name can be derived from `url`.
    /// - [`ChatError::ChatAlreadyAdded`] if a chat with that name is registered.
    /// - [`ChatError::ChatDirOccupied`] if the chat directory already holds a
    ///   clone of a different remote.
    /// - [`ChatError::UnknownHostKey`] if the SSH host is not trusted yet; call
    ///   [`SyncEngine::trust_host`] and retry.
    /// - [`ChatError::CommitChatInfo`] / [`ChatError::PushChatInfo`] if the
    ///   info file of a fresh chat could not be published.
    #[instrument(skip(self))]
    pub fn add_chat(&self, url: &str) -> Result<Chat> {
        let name = chat_name_from_url(url)?;
        debug!(stage = %Stage::Resolving, chat = %name, host = ?host_from_url(url));
        if self.registry.contains(&name) {
            return Err(ChatError::ChatAlreadyAdded(name));
        }
        let dest = self.config.chats_dir.join(&name);
        fs::create_dir_all(&self.config.chats_dir)?;

        debug!(stage = %Stage::Fetching, dest = %dest.display());
        let repo = self.fetch(url, &name, &dest)?;
        let sig = self.identity.signature()?;

        debug!(stage = %Stage::InfoCheck);
        let info = match info::load(&dest) {
            Ok(existing) => {
                debug!(stage = %Stage::InfoLoad, members = existing.members_num);
                self.join_roster(&repo, existing, &sig)?
            }
            Err(InfoError::NotFound(_)) => {
                debug!(stage = %Stage::InfoCreate);
                self.create_info(&repo, url, &name, &sig)?
            }
            Err(e) => return Err(e.into()),
        };

        debug!(stage = %Stage::Ready);
        self.repos.pull(&repo)?;
        let mut state = ChatState {
            chat: Chat {
                url: url.to_string(),
                name,
                members: info.members,
                msg_num: 0,
                last_msg: None,
                unread: 0,
            },
            repo,
            seen_head: None,
        };
        self.recount(&mut state)?;

        let handle = self.registry.add(state)?;
        let chat = handle.snapshot();
        info!(chat = %chat.name, msg_num = chat.msg_num, members = chat.members_num(), "chat added");
        self.notifier.publish(Event::ChatAdded(chat.clone()));
        Ok(chat)
    }

    fn fetch(&self, url: &str, name: &str, dest: &Path) -> Result<RepoHandle> {
        match self.repos.clone_repo(url, dest) {
            Ok(repo) => Ok(repo),
            Err(CloneError::UnknownHostKey(key)) => Err(ChatError::UnknownHostKey(key)),
            Err(CloneError::EmptyRemote) => {
                debug!("remote is empty, initialising local repository");
                Ok(self
                    .repos
                    .init_with_remote(dest, url, &self.config.default_branch)?)
            }
            Err(CloneError::AlreadyExists(_)) => {
                if self.registry.contains(name) {
                    return Err(ChatError::ChatAlreadyAdded(name.to_string()));
                }
                let repo = self.repos.open(dest)?;
                let existing = self.repos.origin_url(&repo)?;
                if !same_remote(existing.as_deref(), url) {
                    return Err(ChatError::ChatDirOccupied {
                        path: dest.to_path_buf(),
                        existing,
                    });
                }
                debug!("reusing local repository");
                Ok(repo)
            }
            Err(CloneError::Repo(e)) => Err(e.into()),
        }
    }

    /// Create, commit and push the info file of a chat nobody has joined yet.
    fn create_info(
        &self,
        repo: &RepoHandle,
        url: &str,
        name: &str,
        sig: &Signature,
    ) -> Result<ChatInfo> {
        let dir = repo.path();
        let created = ChatInfo::new(url, name, &sig.name, Utc::now());
        info::save(dir, &created)?;

        if let Err(e) = self
            .repos
            .commit(repo, Some(Path::new(INFO_FILE)), "Create info.json", sig)
        {
            remove_info_file(dir);
            return Err(ChatError::CommitChatInfo(e));
        }

        if let Err(cause) = self.repos.push(repo) {
            warn!(chat = %name, error = %cause, "failed to push chat info, rolling back");
            return match self.repos.reset_to_parent(repo) {
                Ok(()) => {
                    remove_info_file(dir);
                    Err(ChatError::PushChatInfo { cause, reset: None })
                }
                Err(reset) => {
                    error!(chat = %name, error = %reset, "rollback failed, removing local chat");
                    if let Err(e) = fs::remove_dir_all(dir) {
                        error!(dir = %dir.display(), error = %e, "failed to remove local chat");
                    }
                    Err(ChatError::PushChatInfo {
                        cause,
                        reset: Some(ResetLastCommitFailed(reset)),
                    })
                }
            };
        }
        Ok(created)
    }
}

fn remove_info_file(dir: &Path) {
    let path = info::info_path(dir);
    if let Err(e) = fs::remove_file(&path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove info file");
    }
}

fn same_remote(existing: Option<&str>, url: &str) -> bool {
    existing.is_some_and(|e| e.trim_end_matches('/') == url.trim_end_matches('/'))
}
