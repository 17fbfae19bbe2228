//! Crate entry point for **gitchat**.
//!
//! A chat is a git repository: messages are empty commits and the roster is
//! the tracked `info.json`. The [`SyncEngine`] keeps a registry of joined
//! chats, the [`Poller`] pulls them in the background, and both report
//! through a bounded [`Events`] channel.
//!
//! The `cmd_*` functions back the `gitchat` CLI.

mod add;
mod bootstrap;
pub mod chat;
pub mod config;
pub mod engine;
pub mod error;
pub mod git;
mod history;
pub mod identity;
mod list;
pub mod notify;
pub mod paths;
pub mod poller;
mod progress;
pub mod registry;
pub mod render;
mod send;
mod session;
pub mod telemetry;
mod watch;

pub use add::cmd_add;
pub use bootstrap::Stage;
pub use chat::{Chat, ChatInfo, Member, Message};
pub use config::{Config, Settings, load_settings};
pub use engine::{EngineConfig, PollReport, SyncEngine};
pub use error::{ChatError, Result};
pub use history::{cmd_history, cmd_members};
pub use list::cmd_list;
pub use notify::{Event, Events};
pub use paths::{gitchat_home, paths};
pub use poller::{Poller, PollerHandle};
pub use send::cmd_send;
pub use session::{Session, open_session};
pub use watch::cmd_watch;
