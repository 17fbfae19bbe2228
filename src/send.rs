use anyhow::Result;

use crate::session::open_session;

/// CLI command: send one message to `chat`.
///
/// # Errors
/// - Returns an error if the chat is unknown, the message is empty, or the
///   push is rejected.
pub fn cmd_send(chat: &str, text: &str) -> Result<()> {
    let session = open_session()?;
    session.engine.select_chat(chat)?;
    let updated = session.engine.send_msg(text)?;
    println!("sent to {} ({} messages)", updated.name, updated.msg_num);
    Ok(())
}
