use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::{Paths, paths, user_home};

/// Top-level configuration loaded from `config.toml`.
///
/// Every key is optional; a missing file yields the defaults.
///
/// Example TOML:
/// ```toml
/// chats_dir        = "/home/me/chats"
/// poll_interval_ms = 1000
/// event_buffer     = 512
/// default_branch   = "main"
/// known_hosts      = "/home/me/.ssh/known_hosts"
/// poll_threads     = 4
/// ```
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub chats_dir: Option<PathBuf>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub event_buffer: Option<usize>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
    #[serde(default)]
    pub poll_threads: Option<usize>,
}

/// Configuration with every default applied.
#[derive(Debug, Clone)]
pub struct Settings {
    pub chats_dir: PathBuf,
    pub poll_interval: Duration,
    pub event_buffer: usize,
    pub default_branch: String,
    pub known_hosts: PathBuf,
    pub poll_threads: usize,
}

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const DEFAULT_BRANCH: &str = "main";

impl Config {
    /// Apply defaults, resolving relative paths against the gitchat home.
    pub fn resolve(self, p: &Paths) -> Settings {
        let chats_dir = match self.chats_dir {
            Some(dir) if dir.is_relative() => p.home.join(dir),
            Some(dir) => dir,
            None => p.chats.clone(),
        };
        Settings {
            chats_dir,
            poll_interval: Duration::from_millis(
                self.poll_interval_ms
                    .filter(|ms| *ms > 0)
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            event_buffer: self
                .event_buffer
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_EVENT_BUFFER),
            default_branch: self
                .default_branch
                .filter(|b| !b.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            known_hosts: self
                .known_hosts
                .unwrap_or_else(|| user_home().join(".ssh").join("known_hosts")),
            poll_threads: self
                .poll_threads
                .filter(|n| *n > 0)
                .unwrap_or_else(num_cpus::get),
        }
    }
}

/// Parse a config file, treating a missing file as an empty config.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let txt = match fs::read_to_string(path) {
        Ok(txt) => txt,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Config::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let cfg: Config = toml::from_str(&txt)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(cfg)
}

/// Load `config.toml` from the gitchat home and apply defaults.
pub fn load_settings() -> Result<Settings> {
    let p = paths()?;
    let cfg = load_config_from(&p.config)?;
    Ok(cfg.resolve(&p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fake_paths(home: &Path) -> Paths {
        Paths {
            home: home.to_path_buf(),
            chats: home.join("chats"),
            config: home.join("config.toml"),
            log: home.join("gitchat.log"),
        }
    }

    #[test]
    fn missing_file_yields_defaults() {
        let td = tempdir().unwrap();
        let cfg = load_config_from(&td.path().join("config.toml")).unwrap();
        let s = cfg.resolve(&fake_paths(td.path()));
        assert_eq!(s.chats_dir, td.path().join("chats"));
        assert_eq!(s.poll_interval, Duration::from_millis(500));
        assert_eq!(s.event_buffer, DEFAULT_EVENT_BUFFER);
        assert_eq!(s.default_branch, "main");
        assert!(s.poll_threads >= 1);
    }

    #[test]
    fn values_override_defaults() {
        let td = tempdir().unwrap();
        let path = td.path().join("config.toml");
        fs::write(
            &path,
            r#"
chats_dir = "rooms"
poll_interval_ms = 1500
event_buffer = 8
default_branch = "trunk"
known_hosts = "/etc/ssh/known"
poll_threads = 2
"#,
        )
        .unwrap();
        let s = load_config_from(&path)
            .unwrap()
            .resolve(&fake_paths(td.path()));
        assert_eq!(s.chats_dir, td.path().join("rooms"));
        assert_eq!(s.poll_interval, Duration::from_millis(1500));
        assert_eq!(s.event_buffer, 8);
        assert_eq!(s.default_branch, "trunk");
        assert_eq!(s.known_hosts, PathBuf::from("/etc/ssh/known"));
        assert_eq!(s.poll_threads, 2);
    }

    #[test]
    fn zero_values_fall_back() {
        let cfg = Config {
            poll_interval_ms: Some(0),
            event_buffer: Some(0),
            default_branch: Some("  ".into()),
            ..Config::default()
        };
        let s = cfg.resolve(&fake_paths(Path::new("/x")));
        assert_eq!(s.poll_interval, Duration::from_millis(500));
        assert_eq!(s.event_buffer, DEFAULT_EVENT_BUFFER);
        assert_eq!(s.default_branch, "main");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let td = tempdir().unwrap();
        let path = td.path().join("config.toml");
        fs::write(&path, "poll_interval = 5\n").unwrap();
        assert!(load_config_from(&path).is_err());
    }
}
