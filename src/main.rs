//! # gitchat
//!
//! **gitchat** is a chat client whose rooms are plain git repositories.
//! Every message is an empty commit; the roster lives in `info.json`.
//!
//! Features:
//! - `gitchat add <url>` joins (or creates) the chat hosted at a remote
//! - `gitchat list` shows local chats with their last message
//! - `gitchat send <chat> <text>` sends a single message
//! - `gitchat history <chat>` / `gitchat members <chat>` print a chat
//! - `gitchat watch <chat>` follows a chat live and sends stdin lines
//! - `gitchat home` prints the gitchat home directory
//!
//! This CLI is built with [clap](https://docs.rs/clap).

use anyhow::Result;
use clap::{Parser, Subcommand};
use gitchat::{
    cmd_add, cmd_history, cmd_list, cmd_members, cmd_send, cmd_watch, gitchat_home, paths,
    telemetry,
};

/// Command-line interface definition.
#[derive(Parser, Debug)]
#[command(
    name = "gitchat",
    version,
    about = "gitchat - chat over git repositories",
    arg_required_else_help = true
)]
struct Cli {
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Join the chat hosted at URL, creating it if the remote is empty
    Add { url: String },
    /// List local chats
    List,
    /// Send a message to a chat
    Send {
        chat: String,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Print the message history of a chat
    History { chat: String },
    /// Print the members of a chat
    Members { chat: String },
    /// Follow a chat and send lines read from stdin (`/quit` to leave)
    Watch { chat: String },
    /// Print the gitchat home directory
    Home,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let Some(cmd) = cli.cmd else {
        return Ok(());
    };

    // An interactive session owns the terminal; its logs go to a file.
    let log_file = match cmd {
        Cmd::Watch { .. } => Some(paths()?.log),
        _ => None,
    };
    telemetry::init(cli.debug, log_file.as_deref())?;

    match cmd {
        Cmd::Add { url } => cmd_add(&url),
        Cmd::List => cmd_list(),
        Cmd::Send { chat, text } => cmd_send(&chat, &text.join(" ")),
        Cmd::History { chat } => cmd_history(&chat),
        Cmd::Members { chat } => cmd_members(&chat),
        Cmd::Watch { chat } => cmd_watch(&chat),
        Cmd::Home => {
            println!("{}", gitchat_home()?.display());
            Ok(())
        }
    }
}
