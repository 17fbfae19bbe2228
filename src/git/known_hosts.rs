//! Minimal reader/writer for the OpenSSH `known_hosts` format.
//!
//! Only plain host entries are understood. Hashed entries (`|1|salt|hash`)
//! and `@cert-authority`/`@revoked` markers are skipped when matching.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::Path;

use super::HostKey;

const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    hosts: Vec<String>,
    key_type: String,
    key: String,
}

/// Verdict for a host key offered during a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCheck {
    Trusted,
    Unknown,
    Mismatch,
}

#[derive(Debug, Default, Clone)]
pub struct KnownHosts {
    entries: Vec<Entry>,
}

impl KnownHosts {
    /// Load the store; a missing file is an empty store.
    pub fn load(path: &Path) -> io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(txt) => Ok(Self::parse(&txt)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn parse(txt: &str) -> Self {
        let entries = txt
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('@'))
            .filter_map(|l| {
                let mut fields = l.split_whitespace();
                let hosts = fields.next()?;
                let key_type = fields.next()?;
                let key = fields.next()?;
                if hosts.starts_with('|') {
                    return None;
                }
                Some(Entry {
                    hosts: hosts.split(',').map(normalize).collect(),
                    key_type: key_type.to_string(),
                    key: key.to_string(),
                })
            })
            .collect();
        KnownHosts { entries }
    }

    /// Check `key` against the entries listed for `host`.
    ///
    /// A host is a mismatch only when it has entries of the same key type and
    /// none of them carries `key`.
    pub fn check(&self, host: &str, key_type: &str, key: &str) -> HostCheck {
        let host = normalize(host);
        let mut same_type_seen = false;
        for e in self.entries.iter().filter(|e| e.hosts.contains(&host)) {
            if e.key_type == key_type {
                if e.key == key {
                    return HostCheck::Trusted;
                }
                same_type_seen = true;
            }
        }
        if same_type_seen {
            HostCheck::Mismatch
        } else {
            HostCheck::Unknown
        }
    }
}

/// Append `key` to the store in the standard line format.
///
/// Returns `false` when an identical entry was already present.
pub fn append(path: &Path, key: &HostKey) -> io::Result<bool> {
    let current = KnownHosts::load(path)?;
    if current.check(&key.host, &key.key_type, &key.key) == HostCheck::Trusted {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let needs_newline = match fs::read(path) {
        Ok(bytes) => bytes.last().is_some_and(|b| *b != b'\n'),
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };

    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    if needs_newline {
        f.write_all(b"\n")?;
    }
    writeln!(f, "{} {} {}", key.host, key.key_type, key.key)?;
    Ok(true)
}

/// Name of `host` as written in `known_hosts`: bare on the default port,
/// `[host]:port` otherwise.
pub fn host_pattern(host: &str, port: Option<u16>) -> String {
    match port {
        Some(p) if p != DEFAULT_SSH_PORT => format!("[{host}]:{p}"),
        _ => host.to_string(),
    }
}

/// Explicit port of an `ssh://` URL. scp-like URLs never carry one.
pub fn ssh_port(url: &str) -> Option<u16> {
    let rest = url.trim().strip_prefix("ssh://")?;
    let authority = rest.split('/').next()?;
    let host_port = authority.rsplit('@').next()?;
    let port = match host_port.strip_prefix('[') {
        Some(v6) => v6.split_once("]:")?.1,
        None => host_port.split_once(':')?.1,
    };
    port.parse().ok()
}

/// `[host]:22` is the same entry as `host`; any other port stays distinct.
fn normalize(h: &str) -> String {
    let h = h.trim();
    if let Some(rest) = h.strip_prefix('[')
        && let Some((host, port)) = rest.split_once(']')
    {
        let port = port.strip_prefix(':').and_then(|p| p.parse().ok());
        return host_pattern(host, port);
    }
    h.to_string()
}
