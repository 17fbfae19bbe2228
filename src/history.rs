use anyhow::Result;
use chrono::Utc;

use crate::identity::{GitConfigIdentity, IdentityProvider};
use crate::render::{DaySeparator, author_rgb, format_message, relative_time};
use crate::session::open_session;
use colored::Colorize;

/// CLI command: print the full history of `chat`, oldest first.
pub fn cmd_history(chat: &str) -> Result<()> {
    let session = open_session()?;
    let me = GitConfigIdentity.user_name().ok();
    let now = Utc::now();
    let mut days = DaySeparator::default();
    for msg in session.engine.history(chat)? {
        if let Some(sep) = days.next(msg.time, now) {
            println!("{sep}");
        }
        let own = me.as_deref() == Some(msg.author.as_str());
        println!("{}\n", format_message(&msg, own));
    }
    Ok(())
}

/// CLI command: print the roster of `chat` with each member's last activity.
pub fn cmd_members(chat: &str) -> Result<()> {
    let session = open_session()?;
    let now = Utc::now();
    for m in session.engine.members(chat)? {
        let (r, g, b) = author_rgb(&m.username);
        println!(
            "- {} ({})",
            m.username.truecolor(r, g, b).bold(),
            relative_time(m.activity, now)
        );
    }
    Ok(())
}
