//! Notification Channel between the engine and the Display Sink.
//!
//! Publishing never blocks: when the buffer is full the oldest queued event
//! is discarded to make room, so poll cadence is independent of how fast the
//! sink drains.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

use crate::chat::{Chat, Message};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A chat was registered by AddChat.
    ChatAdded(Chat),
    /// Counters, roster or last message of a chat changed.
    ChatUpdated(Chat),
    /// A chat became current; its full history follows as `Message` events.
    ChatSelected(Chat),
    /// A message of the current chat, delivered oldest first.
    Message { chat: String, message: Message },
}

#[derive(Debug)]
pub struct Notifier {
    tx: Sender<Event>,
    /// Second handle on the queue, used only to evict the oldest event.
    evict: Receiver<Event>,
    dropped: AtomicU64,
}

/// Receiving side handed to the Display Sink.
#[derive(Debug, Clone)]
pub struct Events {
    rx: Receiver<Event>,
}

/// Create a channel holding at most `capacity` undelivered events.
pub fn channel(capacity: usize) -> (Notifier, Events) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        Notifier {
            tx,
            evict: rx.clone(),
            dropped: AtomicU64::new(0),
        },
        Events { rx },
    )
}

impl Notifier {
    pub fn publish(&self, event: Event) {
        let mut event = event;
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.evict.try_recv().is_ok() {
                        let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        trace!(dropped = n, "event buffer full, dropped oldest event");
                    }
                    event = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Number of events discarded because the sink fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Events {
    pub fn recv(&self) -> Option<Event> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Event, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drain everything queued right now.
    pub fn drain(&self) -> Vec<Event> {
        self.rx.try_iter().collect()
    }

    pub fn receiver(&self) -> &Receiver<Event> {
        &self.rx
    }
}
