use anyhow::{Result, bail};
use colored::Colorize;
use dialoguer::Confirm;

use crate::error::ChatError;
use crate::git::HostKey;
use crate::progress::{finish_err, finish_ok, spinner};
use crate::session::open_session;

/// CLI command: join the chat hosted at `url`.
///
/// When the SSH host is unknown the operator is asked to trust its key; on
/// confirmation the key is appended to `known_hosts` and the add is retried.
///
/// # Errors
/// - Returns an error if the chat cannot be added or the host is not trusted.
pub fn cmd_add(url: &str) -> Result<()> {
    let session = open_session()?;
    let engine = &session.engine;

    loop {
        let pb = spinner(format!("adding {url}"));
        match engine.add_chat(url) {
            Ok(chat) => {
                finish_ok(
                    &pb,
                    format!(
                        "added {} ({} members, {} messages)",
                        chat.name,
                        chat.members_num(),
                        chat.msg_num
                    ),
                );
                return Ok(());
            }
            Err(ChatError::UnknownHostKey(key)) => {
                pb.finish_and_clear();
                if !confirm_host(&key)? {
                    bail!("host {} is not trusted", key.host);
                }
                engine.trust_host(&key)?;
            }
            Err(e) if e.is_recoverable() => {
                finish_ok(&pb, e.to_string());
                return Ok(());
            }
            Err(e) => {
                finish_err(&pb, format!("adding {url} (error: {e})"));
                if e.chat_removed() {
                    eprintln!(
                        "{} the local copy could not be rolled back and was deleted",
                        "note:".yellow()
                    );
                }
                return Err(e.into());
            }
        }
    }
}

fn confirm_host(key: &HostKey) -> Result<bool> {
    println!(
        "The authenticity of host '{}' can't be established.",
        key.host
    );
    if let Some(fp) = key.fingerprint() {
        println!("{} key fingerprint is {}.", key.key_type, fp);
    }
    let yes = Confirm::new()
        .with_prompt("Are you sure you want to continue connecting?")
        .default(false)
        .interact()?;
    Ok(yes)
}
