mod common;

use common::*;
use gitchat::git::{Git2Service, RepoHandle, RepoService};
use gitchat::{ChatError, Event, Poller};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn joined_pair(root: &std::path::Path) -> (Arc<gitchat::SyncEngine>, Arc<gitchat::SyncEngine>, gitchat::Events) {
    let url = bare_remote(root, "room");
    let (alice, alice_events) = engine(root, "alice");
    let (bob, _bob_events) = engine(root, "bob");
    alice.add_chat(&url).unwrap();
    bob.add_chat(&url).unwrap();
    alice_events.drain();
    (alice, bob, alice_events)
}

#[test]
fn poll_picks_up_roster_and_messages() {
    let tmp = tempdir().unwrap();
    let (alice, bob, events) = joined_pair(tmp.path());

    // Bob's roster commit is seen but is not a message.
    let report = alice.poll_once();
    assert_eq!(report.polled, 1);
    assert_eq!(report.updated, 1);
    let chat = &alice.chats()[0];
    assert_eq!(chat.members_num(), 2);
    assert_eq!(chat.msg_num, 0);
    assert_eq!(chat.unread, 0);
    events.drain();

    bob.select_chat("room").unwrap();
    bob.send_msg("one").unwrap();
    bob.send_msg("two").unwrap();

    let report = alice.poll_once();
    assert_eq!(report.updated, 1);
    let chat = &alice.chats()[0];
    assert_eq!(chat.msg_num, 2);
    assert_eq!(chat.unread, 2);
    assert_eq!(chat.last_msg.as_ref().unwrap().text, "two");

    // Not current: only the snapshot is published.
    let evs = events.drain();
    assert_eq!(evs.len(), 1);
    assert!(matches!(&evs[0], Event::ChatUpdated(c) if c.unread == 2));

    // Nothing new: nothing published.
    assert_eq!(alice.poll_once().updated, 0);
    assert!(events.drain().is_empty());
}

#[test]
fn select_streams_history_and_clears_unread() {
    let tmp = tempdir().unwrap();
    let (alice, bob, events) = joined_pair(tmp.path());
    bob.select_chat("room").unwrap();
    bob.send_msg("one").unwrap();
    bob.send_msg("two").unwrap();
    alice.poll_once();
    assert_eq!(alice.chats()[0].unread, 2);
    events.drain();

    let chat = alice.select_chat("room").unwrap();
    assert_eq!(chat.unread, 0);
    assert_eq!(chat.msg_num, 2);
    assert_eq!(alice.current_chat().unwrap().name, "room");

    let evs = events.drain();
    assert!(matches!(&evs[0], Event::ChatSelected(c) if c.name == "room"));
    let texts: Vec<_> = evs[1..]
        .iter()
        .map(|e| match e {
            Event::Message { message, .. } => message.text.clone(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(texts, vec!["one", "two"]);

    // Current chat: messages are streamed as they arrive.
    bob.send_msg("three").unwrap();
    alice.poll_once();
    let evs = events.drain();
    assert!(evs.iter().any(|e| matches!(e, Event::Message { message, .. } if message.text == "three")));
    assert_eq!(alice.chats()[0].unread, 1);
    assert_eq!(alice.mark_current_read().unwrap().unread, 0);
}

#[test]
fn send_requires_current_chat() {
    let tmp = tempdir().unwrap();
    let (alice, _bob, _events) = joined_pair(tmp.path());
    assert!(matches!(alice.send_msg("hi"), Err(ChatError::CurrentChatUnset)));
    assert!(matches!(alice.current_chat(), Err(ChatError::CurrentChatUnset)));
    assert!(matches!(alice.select_chat("nope"), Err(ChatError::ChatNotFound(_))));

    alice.select_chat("room").unwrap();
    assert!(matches!(alice.send_msg("  "), Err(ChatError::EmptyMessage)));
}

#[test]
fn send_delivers_pending_messages_first() {
    let tmp = tempdir().unwrap();
    let (alice, bob, events) = joined_pair(tmp.path());
    bob.select_chat("room").unwrap();
    bob.send_msg("from bob").unwrap();

    alice.select_chat("room").unwrap();
    events.drain();
    bob.send_msg("late").unwrap();

    let chat = alice.send_msg("from alice").unwrap();
    assert_eq!(chat.msg_num, 3);
    assert_eq!(chat.unread, 0);
    assert_eq!(chat.last_msg.unwrap().text, "from alice");

    let texts: Vec<_> = events
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            Event::Message { message, .. } => Some(message.text),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["late", "from alice"]);

    let history: Vec<_> = alice.history("room").unwrap().into_iter().map(|m| m.text).collect();
    assert_eq!(history, vec!["from bob", "late", "from alice"]);
}

#[test]
fn failed_push_drops_the_message() {
    let tmp = tempdir().unwrap();
    let url = bare_remote(tmp.path(), "room");
    let (alice, _e, repos) = flaky_engine(tmp.path(), "alice");
    alice.add_chat(&url).unwrap();
    alice.select_chat("room").unwrap();
    alice.send_msg("kept").unwrap();

    FlakyRepos::set(&repos.fail_push, true);
    let err = alice.send_msg("lost").unwrap_err();
    assert!(matches!(err, ChatError::Push(_)));

    let chat = alice.current_chat().unwrap();
    assert_eq!(chat.msg_num, 1);
    assert_eq!(chat.last_msg.unwrap().text, "kept");
    let head = Git2Service::new(tmp.path().join("kh"))
        .head(&RepoHandle::new(chat_dir(tmp.path(), "alice", "room")))
        .unwrap()
        .unwrap();
    assert_eq!(head.message, "kept");

    FlakyRepos::set(&repos.fail_push, false);
    assert_eq!(alice.send_msg("again").unwrap().msg_num, 2);
}

#[test]
fn collected_counts_match_polled_counts() {
    let tmp = tempdir().unwrap();
    let (alice, bob, _events) = joined_pair(tmp.path());
    bob.select_chat("room").unwrap();
    for i in 0..3 {
        bob.send_msg(&format!("m{i}")).unwrap();
    }
    alice.poll_once();
    let polled = alice.chats()[0].clone();

    let (fresh, _e) = engine(tmp.path(), "alice");
    let collected = fresh.collect_chats().unwrap();
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0].msg_num, polled.msg_num);
    assert_eq!(collected[0].last_msg, polled.last_msg);
    assert_eq!(collected[0].members, polled.members);
    assert_eq!(collected[0].unread, 0);
}

#[test]
fn collect_skips_directories_without_info() {
    let tmp = tempdir().unwrap();
    let url = bare_remote(tmp.path(), "room");
    let (alice, _e) = engine(tmp.path(), "alice");
    alice.add_chat(&url).unwrap();

    let chats = tmp.path().join("alice").join("chats");
    std::fs::create_dir_all(chats.join("not-a-repo")).unwrap();
    let mut opts = git2::RepositoryInitOptions::new();
    opts.initial_head("main");
    git2::Repository::init_opts(chats.join("no-info"), &opts).unwrap();

    let (fresh, _e) = engine(tmp.path(), "alice");
    let collected = fresh.collect_chats().unwrap();
    let names: Vec<_> = collected.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["room"]);
}

#[test]
fn concurrent_send_and_poll_never_double_count() {
    let tmp = tempdir().unwrap();
    let (alice, bob, _events) = joined_pair(tmp.path());
    bob.select_chat("room").unwrap();
    for i in 0..4 {
        bob.send_msg(&format!("b{i}")).unwrap();
    }
    alice.select_chat("room").unwrap();

    let sender = {
        let alice = alice.clone();
        thread::spawn(move || {
            for i in 0..8 {
                alice.send_msg(&format!("a{i}")).unwrap();
            }
        })
    };
    let poller = {
        let alice = alice.clone();
        thread::spawn(move || {
            for _ in 0..20 {
                alice.poll_once();
            }
        })
    };
    sender.join().unwrap();
    poller.join().unwrap();
    alice.poll_once();

    let chat = alice.current_chat().unwrap();
    assert_eq!(chat.msg_num, alice.history("room").unwrap().len());
    assert_eq!(chat.msg_num, 12);
}

#[test]
fn background_poller_delivers_and_stops() {
    let tmp = tempdir().unwrap();
    let (alice, bob, events) = joined_pair(tmp.path());
    alice.select_chat("room").unwrap();
    events.drain();

    let handle = Poller::spawn(alice.clone(), Duration::from_millis(20), 2).unwrap();
    bob.select_chat("room").unwrap();
    bob.send_msg("ping").unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = false;
    while Instant::now() < deadline && !seen {
        if let Ok(Event::Message { message, .. }) = events.recv_timeout(Duration::from_millis(100)) {
            seen = message.text == "ping";
        }
    }
    handle.stop();
    assert!(seen);
    assert_eq!(alice.current_chat().unwrap().msg_num, 1);
}

#[test]
fn opening_a_long_chat_returns_full_history() {
    let tmp = tempdir().unwrap();
    let url = bare_remote(tmp.path(), "room");
    let (alice, events) = engine_with_buffer(tmp.path(), "alice", 4);
    alice.add_chat(&url).unwrap();
    alice.select_chat("room").unwrap();
    for i in 0..10 {
        alice.send_msg(&format!("m{i}")).unwrap();
    }
    events.drain();

    let (chat, history) = alice.open_chat("room").unwrap();
    assert_eq!(chat.msg_num, 10);
    let texts: Vec<_> = history.into_iter().map(|m| m.text).collect();
    let expected: Vec<_> = (0..10).map(|i| format!("m{i}")).collect();
    assert_eq!(texts, expected);

    let evs = events.drain();
    assert_eq!(evs.len(), 1);
    assert!(matches!(&evs[0], Event::ChatSelected(c) if c.name == "room"));
}

#[test]
fn failing_chat_does_not_block_the_cycle() {
    let tmp = tempdir().unwrap();
    let (alice, bob, _events) = joined_pair(tmp.path());
    let other = bare_remote(tmp.path(), "other");
    alice.add_chat(&other).unwrap();
    alice.poll_once();

    bob.select_chat("room").unwrap();
    bob.send_msg("still here").unwrap();
    let remotes = tmp.path().join("remotes");
    std::fs::rename(remotes.join("other.git"), remotes.join("gone.git")).unwrap();

    let report = alice.poll_once();
    assert_eq!(report.polled, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.updated, 1);

    let chats = alice.chats();
    let room = chats.iter().find(|c| c.name == "room").unwrap();
    assert_eq!(room.msg_num, 1);
    assert_eq!(room.unread, 1);
    let other = chats.iter().find(|c| c.name == "other").unwrap();
    assert_eq!(other.msg_num, 0);
}
