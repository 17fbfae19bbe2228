//! Chat Registry.
//!
//! Chats live in an append-only arena indexed by [`ChatId`]. Each slot owns
//! two locks:
//! - `state`, the per-chat guard, held for every read-modify-write of the
//!   chat and for every repository call against its working copy;
//! - `view`, the last published [`Chat`] snapshot, which readers use so a
//!   listing never waits on a chat that is busy pulling.
//!
//! The arena lock is only held long enough to clone slot handles. Callers
//! must never acquire it while holding a chat guard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::chat::Chat;
use crate::error::ChatError;
use crate::git::{CommitId, RepoHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(usize);

/// Live state of one chat, reachable only through its guard.
#[derive(Debug)]
pub struct ChatState {
    pub chat: Chat,
    pub repo: RepoHandle,
    /// HEAD commit already accounted for in `chat.msg_num`.
    pub seen_head: Option<CommitId>,
}

#[derive(Debug)]
struct Slot {
    name: String,
    state: Mutex<ChatState>,
    view: RwLock<Chat>,
}

/// Cheap, cloneable reference to a registered chat.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    id: ChatId,
    slot: Arc<Slot>,
}

impl ChatHandle {
    pub fn id(&self) -> ChatId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.slot.name
    }

    /// Acquire the chat guard.
    pub fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.slot.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last published snapshot.
    pub fn snapshot(&self) -> Chat {
        self.slot
            .view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the published snapshot. Called with the chat guard held so
    /// snapshots of one chat are stored in the order they were produced.
    pub fn store_view(&self, chat: &Chat) {
        *self.slot.view.write().unwrap_or_else(PoisonError::into_inner) = chat.clone();
    }
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Arc<Slot>>,
    by_name: HashMap<String, ChatId>,
}

#[derive(Debug, Default)]
pub struct Registry {
    arena: RwLock<Arena>,
    current: Mutex<Option<ChatId>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn arena(&self) -> std::sync::RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a chat. Names are unique.
    pub fn add(&self, state: ChatState) -> Result<ChatHandle, ChatError> {
        let mut arena = self.arena.write().unwrap_or_else(PoisonError::into_inner);
        let name = state.chat.name.clone();
        if arena.by_name.contains_key(&name) {
            return Err(ChatError::ChatAlreadyAdded(name));
        }
        let id = ChatId(arena.slots.len());
        let slot = Arc::new(Slot {
            name: name.clone(),
            view: RwLock::new(state.chat.clone()),
            state: Mutex::new(state),
        });
        arena.slots.push(Arc::clone(&slot));
        arena.by_name.insert(name, id);
        Ok(ChatHandle { id, slot })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.arena().by_name.contains_key(name)
    }

    pub fn find(&self, name: &str) -> Option<ChatHandle> {
        let arena = self.arena();
        let id = *arena.by_name.get(name)?;
        Some(ChatHandle {
            id,
            slot: Arc::clone(&arena.slots[id.0]),
        })
    }

    pub fn get(&self, id: ChatId) -> Option<ChatHandle> {
        self.arena().slots.get(id.0).map(|slot| ChatHandle {
            id,
            slot: Arc::clone(slot),
        })
    }

    /// Handles of every chat in registration order, copied out of the arena.
    pub fn handles(&self) -> Vec<ChatHandle> {
        self.arena()
            .slots
            .iter()
            .enumerate()
            .map(|(i, slot)| ChatHandle {
                id: ChatId(i),
                slot: Arc::clone(slot),
            })
            .collect()
    }

    /// Published snapshots of every chat in registration order.
    pub fn snapshot(&self) -> Vec<Chat> {
        self.handles().iter().map(ChatHandle::snapshot).collect()
    }

    pub fn len(&self) -> usize {
        self.arena().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_current(&self, chat: &ChatHandle) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(chat.id);
    }

    pub fn current(&self) -> Result<ChatHandle, ChatError> {
        let id = (*self.current.lock().unwrap_or_else(PoisonError::into_inner))
            .ok_or(ChatError::CurrentChatUnset)?;
        self.get(id).ok_or(ChatError::CurrentChatUnset)
    }

    pub fn is_current(&self, id: ChatId) -> bool {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) == Some(id)
    }
}
