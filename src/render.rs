//! Terminal rendering of chats and messages.

use chrono::{DateTime, Datelike, Local, Utc};
use colored::{ColoredString, Colorize};
use sha2::{Digest, Sha256};

use crate::chat::{Chat, Message};

/// Stable per-user colour: the first three bytes of the SHA-256 of the name.
pub fn author_rgb(username: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(username.as_bytes());
    (digest[0], digest[1], digest[2])
}

/// [`author_rgb`] as `#rrggbb`.
pub fn author_color(username: &str) -> String {
    let (r, g, b) = author_rgb(username);
    format!("#{}", hex::encode([r, g, b]))
}

/// Short timestamp for the chat list: clock time within a day, weekday
/// within a week, full date otherwise.
pub fn relative_time(t: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let local = t.with_timezone(&Local);
    let age = now.signed_duration_since(t);
    if age < chrono::Duration::hours(24) {
        local.format("%H:%M").to_string()
    } else if age < chrono::Duration::days(7) {
        local.format("%A").to_string()
    } else {
        local.format("%d.%m.%Y").to_string()
    }
}

/// Two-line chat list entry: name with last message time, then the last
/// message preview followed by the unread count when non-zero.
pub fn chat_list_entry(chat: &Chat, now: DateTime<Utc>) -> (String, String) {
    let Some(last) = &chat.last_msg else {
        return (chat.name.clone(), "no messages yet".to_string());
    };
    let upper = format!("{} {}", chat.name, relative_time(last.time, now));
    let preview = last.text.lines().next().unwrap_or_default();
    let lower = if chat.unread == 0 {
        format!("{}: {}", last.author, preview)
    } else {
        format!("{}: {} {}", last.author, preview, chat.unread)
    };
    (upper, lower)
}

/// Heading printed before the first message of a new day.
pub fn day_heading(t: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let local = t.with_timezone(&Local);
    if local.year() != now.with_timezone(&Local).year() {
        local.format("%B %-d, %Y").to_string()
    } else {
        local.format("%B %-d").to_string()
    }
}

/// Tracks the day of the last printed message to emit day separators.
#[derive(Debug, Default)]
pub struct DaySeparator {
    last: Option<chrono::NaiveDate>,
}

impl DaySeparator {
    /// Returns a separator line if `t` falls on a different day than the
    /// previous message.
    pub fn next(&mut self, t: DateTime<Utc>, now: DateTime<Utc>) -> Option<String> {
        let day = t.with_timezone(&Local).date_naive();
        if self.last == Some(day) {
            return None;
        }
        self.last = Some(day);
        Some(format!("---------->>> {}", day_heading(t, now)).blue().to_string())
    }
}

fn author_label(author: &str, own: bool) -> ColoredString {
    let (r, g, b) = author_rgb(author);
    let label = author.truecolor(r, g, b).bold();
    if own { label.on_bright_black() } else { label }
}

/// Header line and body of a message as printed in the dialogue.
pub fn format_message(msg: &Message, own: bool) -> String {
    let time = msg.time.with_timezone(&Local).format("%H:%M");
    format!("{} [{}]\n{}", author_label(&msg.author, own), time, msg.text)
}
