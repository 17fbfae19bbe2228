use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use crossbeam_channel::{bounded, select};
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use tracing::debug;

use crate::chat::Message;
use crate::engine::SyncEngine;
use crate::identity::{GitConfigIdentity, IdentityProvider};
use crate::notify::{Event, Events};
use crate::poller::Poller;
use crate::render::{DaySeparator, format_message};
use crate::session::open_session;

const QUIT: &str = "/quit";

/// CLI command: follow `chat` live.
///
/// Prints the history read straight from the repository, then every
/// incoming message. Each line read from stdin is sent, and unread counts of
/// the other chats are reported. `/quit` or end of input stops the session.
///
/// # Errors
/// - Returns an error if the chat cannot be selected or stdin fails.
pub fn cmd_watch(chat: &str) -> Result<()> {
    let session = open_session()?;
    let engine = session.engine.clone();
    let me = GitConfigIdentity.user_name().ok();

    let (chat, history) = engine.open_chat(chat)?;
    session.events.drain();
    println!("{} {} ({} members)", "#".blue(), chat.name.bold(), chat.members_num());
    let mut days = DaySeparator::default();
    for message in &history {
        print_message(message, me.as_deref(), &mut days);
    }
    let selected = chat.name;

    let poller = Poller::spawn(
        engine.clone(),
        session.settings.poll_interval,
        session.settings.poll_threads,
    )?;

    let (stop_tx, stop_rx) = bounded::<()>(1);
    let printer = {
        let engine = engine.clone();
        let events = session.events;
        let selected = selected.clone();
        thread::Builder::new()
            .name("gitchat-printer".into())
            .spawn(move || print_events(&engine, &events, &selected, me, days, &stop_rx))?
    };

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let text = line.trim_end();
        if text == QUIT {
            break;
        }
        if text.trim().is_empty() {
            continue;
        }
        if let Err(e) = engine.send_msg(text) {
            eprintln!("{} {e}", "✘".red());
        }
    }

    poller.stop();
    drop(stop_tx);
    if printer.join().is_err() {
        debug!("printer thread panicked");
    }
    Ok(())
}

fn print_message(message: &Message, me: Option<&str>, days: &mut DaySeparator) {
    if let Some(sep) = days.next(message.time, Utc::now()) {
        println!("{sep}");
    }
    let own = me == Some(message.author.as_str());
    println!("{}\n", format_message(message, own));
}

fn print_events(
    engine: &Arc<SyncEngine>,
    events: &Events,
    selected: &str,
    me: Option<String>,
    mut days: DaySeparator,
    stop: &crossbeam_channel::Receiver<()>,
) {
    loop {
        let ev = select! {
            recv(events.receiver()) -> ev => match ev {
                Ok(ev) => ev,
                Err(_) => return,
            },
            recv(stop) -> _ => return,
        };
        match ev {
            Event::Message { chat, message } if chat == selected => {
                print_message(&message, me.as_deref(), &mut days);
                if let Err(e) = engine.mark_current_read() {
                    debug!(error = %e, "failed to mark chat read");
                }
            }
            Event::ChatUpdated(chat) if chat.name != selected && chat.unread > 0 => {
                println!("{} {} unread in {}", "•".yellow(), chat.unread, chat.name);
            }
            _ => {}
        }
    }
}
