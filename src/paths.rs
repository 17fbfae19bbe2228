use anyhow::Result;
use std::{env, path::PathBuf};

/// Resolved on-disk locations used by gitchat.
#[derive(Clone, Debug)]
pub struct Paths {
    pub home: PathBuf,
    pub chats: PathBuf,
    pub config: PathBuf,
    pub log: PathBuf,
}

/// Home directory of gitchat.
///
/// Resolution order:
/// 1. `$GITCHAT_HOME`
/// 2. `$XDG_CONFIG_HOME/gitchat`
/// 3. `$HOME/.config/gitchat`
pub fn gitchat_home() -> Result<PathBuf> {
    if let Some(explicit) = env::var_os("GITCHAT_HOME") {
        return Ok(PathBuf::from(explicit));
    }
    let xdg = env::var_os("XDG_CONFIG_HOME");
    let base = xdg
        .map(PathBuf::from)
        .unwrap_or_else(|| user_home().join(".config"));
    Ok(base.join("gitchat"))
}

/// The operator's home directory, or an empty path when `$HOME` is unset.
pub fn user_home() -> PathBuf {
    PathBuf::from(env::var_os("HOME").unwrap_or_default())
}

pub fn paths() -> Result<Paths> {
    let home = gitchat_home()?;
    Ok(Paths {
        chats: home.join("chats"),
        config: home.join("config.toml"),
        log: home.join("gitchat.log"),
        home,
    })
}
