use anyhow::Result;
use std::sync::Arc;

use crate::config::{Settings, load_settings};
use crate::engine::{EngineConfig, SyncEngine};
use crate::git::Git2Service;
use crate::identity::GitConfigIdentity;
use crate::notify::Events;

/// A loaded engine with every local chat collected.
pub struct Session {
    pub engine: Arc<SyncEngine>,
    pub events: Events,
    pub settings: Settings,
}

/// Load `config.toml`, build the engine on top of git and collect the chats
/// already present under the storage root.
///
/// # Errors
/// - Returns an error if the config cannot be parsed, the storage root cannot
///   be read, or the git identity is not configured.
pub fn open_session() -> Result<Session> {
    let settings = load_settings()?;
    let repos = Arc::new(Git2Service::new(&settings.known_hosts));
    let (engine, events) = SyncEngine::new(
        repos,
        Arc::new(GitConfigIdentity),
        EngineConfig::from(&settings),
    );
    let engine = Arc::new(engine);
    engine.collect_chats()?;
    Ok(Session {
        engine,
        events,
        settings,
    })
}
