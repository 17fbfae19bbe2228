use anyhow::Result;
use chrono::Utc;
use colored::Colorize;

use crate::render::chat_list_entry;
use crate::session::open_session;

/// CLI command: print every local chat with its last message.
///
/// Example output:
/// ```text
/// room 14:02
///   alice: hello
/// ops Tuesday
///   bob: deploy done 2
/// ```
///
/// # Errors
/// - Returns an error if the chats cannot be collected.
pub fn cmd_list() -> Result<()> {
    let session = open_session()?;
    if session.engine.registry().is_empty() {
        eprintln!("no chats in {}", session.settings.chats_dir.display());
        return Ok(());
    }
    let now = Utc::now();
    for chat in session.engine.chats() {
        let (upper, lower) = chat_list_entry(&chat, now);
        println!("{}", upper.bold());
        println!("  {lower}");
    }
    Ok(())
}
