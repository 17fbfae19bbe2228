//! Sync Engine: user-triggered operations against one chat at a time.
//!
//! Every operation looks its chat up once, releases the registry, then holds
//! only that chat's guard for the whole pull/commit/push sequence.

use chrono::Utc;
use rayon::prelude::*;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

use crate::chat::info::{self, reconcile_membership};
use crate::chat::{Chat, ChatInfo, INFO_FILE, InfoError, Member, Message};
use crate::config::Settings;
use crate::error::{ChatError, Result};
use crate::git::known_hosts;
use crate::git::{CommitInfo, HostKey, RepoHandle, RepoService, Signature};
use crate::identity::IdentityProvider;
use crate::notify::{self, Event, Events, Notifier};
use crate::registry::{ChatHandle, ChatState, Registry};

/// Engine settings that do not change at runtime.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub chats_dir: PathBuf,
    pub default_branch: String,
    pub known_hosts: PathBuf,
    pub event_buffer: usize,
}

impl From<&Settings> for EngineConfig {
    fn from(s: &Settings) -> Self {
        EngineConfig {
            chats_dir: s.chats_dir.clone(),
            default_branch: s.default_branch.clone(),
            known_hosts: s.known_hosts.clone(),
            event_buffer: s.event_buffer,
        }
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub polled: usize,
    pub updated: usize,
    pub failed: usize,
}

pub struct SyncEngine {
    pub(crate) repos: Arc<dyn RepoService>,
    pub(crate) identity: Arc<dyn IdentityProvider>,
    pub(crate) registry: Registry,
    pub(crate) notifier: Notifier,
    pub(crate) config: EngineConfig,
}

impl SyncEngine {
    pub fn new(
        repos: Arc<dyn RepoService>,
        identity: Arc<dyn IdentityProvider>,
        config: EngineConfig,
    ) -> (Self, Events) {
        let (notifier, events) = notify::channel(config.event_buffer);
        let engine = SyncEngine {
            repos,
            identity,
            registry: Registry::new(),
            notifier,
            config,
        };
        (engine, events)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn chats_dir(&self) -> &Path {
        &self.config.chats_dir
    }

    /// Registry snapshot in registration order.
    pub fn chats(&self) -> Vec<Chat> {
        self.registry.snapshot()
    }

    pub fn current_chat(&self) -> Result<Chat> {
        Ok(self.registry.current()?.snapshot())
    }

    fn find(&self, name: &str) -> Result<ChatHandle> {
        self.registry
            .find(name)
            .ok_or_else(|| ChatError::ChatNotFound(name.to_string()))
    }

    pub fn members(&self, name: &str) -> Result<Vec<Member>> {
        Ok(self.find(name)?.snapshot().members)
    }

    /// Trust a host key reported by [`ChatError::UnknownHostKey`].
    ///
    /// Returns `false` when the key was already trusted.
    pub fn trust_host(&self, key: &HostKey) -> Result<bool> {
        let added = known_hosts::append(&self.config.known_hosts, key)?;
        if added {
            info!(host = %key.host, key_type = %key.key_type, "host key trusted");
        }
        Ok(added)
    }

    /// Publish the chat's current state as its snapshot.
    pub(crate) fn publish_state(&self, handle: &ChatHandle, state: &ChatState, event: Event) {
        handle.store_view(&state.chat);
        self.notifier.publish(event);
    }

    pub(crate) fn publish_messages(&self, chat: &str, newest_first: &[CommitInfo]) {
        for c in newest_first.iter().rev() {
            self.notifier.publish(Event::Message {
                chat: chat.to_string(),
                message: Message::from(c),
            });
        }
    }

    /// Recount the whole history. Returns every message commit, newest first.
    pub(crate) fn recount(&self, state: &mut ChatState) -> Result<Vec<CommitInfo>> {
        let all = self.repos.log(&state.repo, None)?;
        state.seen_head = all.first().map(|c| c.id.clone());
        let messages: Vec<CommitInfo> = all.into_iter().filter(|c| c.is_message).collect();
        state.chat.msg_num = messages.len();
        state.chat.last_msg = messages.first().map(Message::from);
        Ok(messages)
    }

    /// Account for commits that landed after `seen_head`.
    ///
    /// Returns the new message commits newest first and whether the roster
    /// was reloaded because a bookkeeping commit arrived.
    pub(crate) fn absorb_new(&self, state: &mut ChatState) -> Result<(Vec<CommitInfo>, bool)> {
        let new = self.repos.log(&state.repo, state.seen_head.as_ref())?;
        let Some(head) = new.first() else {
            return Ok((Vec::new(), false));
        };
        state.seen_head = Some(head.id.clone());

        let roster_touched = new.iter().any(|c| !c.is_message);
        let messages: Vec<CommitInfo> = new.into_iter().filter(|c| c.is_message).collect();
        state.chat.msg_num += messages.len();
        if let Some(last) = messages.first() {
            state.chat.last_msg = Some(Message::from(last));
        }

        let mut roster_changed = false;
        if roster_touched {
            match info::load(state.repo.path()) {
                Ok(info) if info.members != state.chat.members => {
                    state.chat.members = info.members;
                    roster_changed = true;
                }
                Ok(_) => {}
                Err(e) => warn!(chat = %state.chat.name, error = %e, "failed to reload roster"),
            }
        }
        Ok((messages, roster_changed))
    }

    /// Append the operator to `info` if missing, then commit and push.
    ///
    /// A commit failure restores the info file and is returned. A push failure
    /// is not fatal: the membership commit is rolled back so the local branch
    /// never runs ahead of the remote, and the roster as it was is returned.
    /// Reconciliation is attempted again on next start.
    pub(crate) fn join_roster(
        &self,
        repo: &RepoHandle,
        original: ChatInfo,
        sig: &Signature,
    ) -> Result<ChatInfo> {
        let (updated, changed) = reconcile_membership(original.clone(), &sig.name, Utc::now());
        if !changed {
            return Ok(original);
        }
        info!(chat = %updated.name, user = %sig.name, "joining chat roster");

        info::save(repo.path(), &updated)?;
        if let Err(e) = self
            .repos
            .commit(repo, Some(Path::new(INFO_FILE)), "Update info.json", sig)
        {
            // Leave the roster as committed so the join is retried later.
            if let Err(restore) = info::save(repo.path(), &original) {
                warn!(chat = %updated.name, error = %restore, "failed to restore info file");
            }
            return Err(ChatError::CommitChatInfo(e));
        }

        if let Err(e) = self.repos.push(repo) {
            warn!(chat = %updated.name, error = %e, "failed to push roster update, keeping read access");
            if let Err(reset) = self.repos.reset_to_parent(repo) {
                warn!(chat = %updated.name, error = %reset, "failed to roll back roster update");
            }
            return Ok(original);
        }
        Ok(updated)
    }

    /// Scan the chat storage root and register every chat found there.
    ///
    /// Directories that are not repositories or lack an info file are logged
    /// and skipped. Chats load in parallel and register in name order.
    #[instrument(skip(self), fields(dir = %self.config.chats_dir.display()))]
    pub fn collect_chats(&self) -> Result<Vec<Chat>> {
        let rd = match fs::read_dir(&self.config.chats_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut dirs: Vec<PathBuf> = rd
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.path())
            .collect();
        dirs.sort();

        let sig = self.identity.signature()?;
        let loaded: Vec<(PathBuf, Result<ChatState>)> = dirs
            .into_par_iter()
            .map(|dir| {
                let res = self.load_local_chat(&dir, &sig);
                (dir, res)
            })
            .collect();

        let mut chats = Vec::new();
        for (dir, res) in loaded {
            match res {
                Ok(state) => match self.registry.add(state) {
                    Ok(handle) => {
                        let chat = handle.snapshot();
                        debug!(chat = %chat.name, msg_num = chat.msg_num, "chat collected");
                        self.notifier.publish(Event::ChatAdded(chat.clone()));
                        chats.push(chat);
                    }
                    Err(e) => debug!(dir = %dir.display(), error = %e, "skipping chat"),
                },
                Err(ChatError::Info(InfoError::NotFound(path))) => {
                    warn!(path = %path.display(), "chat has no info file, skipping");
                }
                Err(e) => warn!(dir = %dir.display(), error = %e, "failed to load chat, skipping"),
            }
        }
        info!(count = chats.len(), "chats collected");
        Ok(chats)
    }

    fn load_local_chat(&self, dir: &Path, sig: &Signature) -> Result<ChatState> {
        let repo = self.repos.open(dir)?;
        if let Err(e) = self.repos.pull(&repo) {
            warn!(dir = %dir.display(), error = %e, "pull failed, using local history");
        }
        let info = info::load(dir)?;
        let info = self.join_roster(&repo, info, sig)?;

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| info.name.clone());
        let mut state = ChatState {
            chat: Chat {
                url: info.url,
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
        Ok(state)
    }

    /// Make `name` the current chat and stream its history.
    ///
    /// Publishes `ChatSelected` followed by every message, oldest first.
    #[instrument(skip(self))]
    pub fn select_chat(&self, name: &str) -> Result<Chat> {
        Ok(self.select(name, true)?.0)
    }

    /// Make `name` the current chat and return its history, oldest first.
    ///
    /// Only `ChatSelected` is published; the history is handed back directly
    /// so a long chat cannot overflow the event buffer before a sink reads it.
    #[instrument(skip(self))]
    pub fn open_chat(&self, name: &str) -> Result<(Chat, Vec<Message>)> {
        let (chat, messages) = self.select(name, false)?;
        let history = messages.iter().rev().map(Message::from).collect();
        Ok((chat, history))
    }

    fn select(&self, name: &str, stream: bool) -> Result<(Chat, Vec<CommitInfo>)> {
        let handle = self.find(name)?;
        let mut state = handle.lock();

        self.repos.pull(&state.repo)?;
        let messages = self.recount(&mut state)?;
        state.chat.unread = 0;
        self.registry.set_current(&handle);

        self.publish_state(&handle, &state, Event::ChatSelected(state.chat.clone()));
        if stream {
            self.publish_messages(&state.chat.name, &messages);
        }
        debug!(msg_num = state.chat.msg_num, "chat selected");
        Ok((state.chat.clone(), messages))
    }

    /// Send `text` to the current chat as an empty commit.
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub fn send_msg(&self, text: &str) -> Result<Chat> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let handle = self.registry.current()?;
        let sig = self.identity.signature()?;
        let mut state = handle.lock();

        self.repos.pull(&state.repo)?;
        let (mut delivered, _) = self.absorb_new(&mut state)?;

        self.repos.commit(&state.repo, None, text, &sig)?;
        if let Err(e) = self.repos.push(&state.repo) {
            if let Err(reset) = self.repos.reset_to_parent(&state.repo) {
                warn!(chat = %state.chat.name, error = %reset, "failed to drop unpushed message");
            }
            if !delivered.is_empty() {
                self.publish_state(&handle, &state, Event::ChatUpdated(state.chat.clone()));
                self.publish_messages(&state.chat.name, &delivered);
            }
            return Err(e.into());
        }

        let (sent, _) = self.absorb_new(&mut state)?;
        state.chat.unread = 0;
        let mut all = sent;
        all.append(&mut delivered);

        self.publish_messages(&state.chat.name, &all);
        self.publish_state(&handle, &state, Event::ChatUpdated(state.chat.clone()));
        info!(chat = %state.chat.name, msg_num = state.chat.msg_num, "message sent");
        Ok(state.chat.clone())
    }

    /// Clear the unread counter of the current chat.
    pub fn mark_current_read(&self) -> Result<Chat> {
        let handle = self.registry.current()?;
        let mut state = handle.lock();
        if state.chat.unread != 0 {
            state.chat.unread = 0;
            self.publish_state(&handle, &state, Event::ChatUpdated(state.chat.clone()));
        }
        Ok(state.chat.clone())
    }

    /// Full message history of `name`, oldest first.
    pub fn history(&self, name: &str) -> Result<Vec<Message>> {
        let handle = self.find(name)?;
        let state = handle.lock();
        let log = self.repos.log(&state.repo, None)?;
        Ok(log
            .iter()
            .rev()
            .filter(|c| c.is_message)
            .map(Message::from)
            .collect())
    }

    /// Pull one chat and publish what changed.
    ///
    /// Returns whether anything was published.
    pub fn poll_chat(&self, handle: &ChatHandle) -> Result<bool> {
        let mut state = handle.lock();
        let pulled = self.repos.pull(&state.repo)?;
        trace!(chat = %state.chat.name, fetched = pulled.new_commits(), "pulled");
        let (messages, roster_changed) = self.absorb_new(&mut state)?;
        if messages.is_empty() && !roster_changed {
            return Ok(false);
        }
        state.chat.unread += messages.len();

        self.publish_state(handle, &state, Event::ChatUpdated(state.chat.clone()));
        if self.registry.is_current(handle.id()) {
            self.publish_messages(&state.chat.name, &messages);
        }
        debug!(
            chat = %state.chat.name,
            new = messages.len(),
            unread = state.chat.unread,
            "chat updated"
        );
        Ok(true)
    }

    /// Run one poll cycle over every registered chat.
    ///
    /// Chats are polled on the current rayon pool. A failing chat is logged
    /// and skipped; it never affects the others.
    pub fn poll_once(&self) -> PollReport {
        let handles = self.registry.handles();
        let outcomes: Vec<Result<bool>> = handles
            .par_iter()
            .map(|h| {
                self.poll_chat(h).inspect_err(|e| {
                    warn!(chat = %h.name(), error = %e, "poll failed, skipping chat this cycle");
                })
            })
            .collect();

        let mut report = PollReport {
            polled: outcomes.len(),
            ..PollReport::default()
        };
        for o in outcomes {
            match o {
                Ok(true) => report.updated += 1,
                Ok(false) => {}
                Err(_) => report.failed += 1,
            }
        }
        report
    }
}
