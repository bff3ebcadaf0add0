//! Conversation history as seen by the backend.

mod common;

use common::*;
use meshbot::backend::Turn;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn second_message_sees_first_exchange() {
    let tracker = Tracker::default();
    let sender = Arc::new(RecordingSender::default());
    let mut core = relay_core(&tracker, Duration::ZERO, sender.clone(), 10).await;

    core.handle(&message(0x10, "Alice", "hi")).await.unwrap();
    core.handle(&message(0x10, "Alice", "again")).await.unwrap();

    let calls = tracker.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].history.is_empty());
    assert_eq!(calls[0].user_name, "Alice");
    assert_eq!(calls[0].message, "hi");

    let first_reply = "reply to Alice: hi";
    assert_eq!(
        calls[1].history,
        vec![Turn::user("Alice:hi"), Turn::assistant(first_reply)]
    );
    assert_eq!(sender.sent_to(0x10), vec![first_reply, "reply to Alice: again"]);
}

#[tokio::test]
async fn histories_are_isolated_per_sender() {
    let tracker = Tracker::default();
    let sender = Arc::new(RecordingSender::default());
    let mut core = relay_core(&tracker, Duration::ZERO, sender, 10).await;

    core.handle(&message(0x10, "Alice", "one")).await.unwrap();
    core.handle(&message(0x20, "Bob", "two")).await.unwrap();

    let calls = tracker.calls();
    assert!(calls[1].history.is_empty(), "Bob must not see Alice's turns");
    assert_eq!(core.history().len(0x10), 2);
    assert_eq!(core.history().len(0x20), 2);
    assert_eq!(core.history().senders(), 2);
}

#[tokio::test]
async fn history_never_exceeds_twenty_entries() {
    let tracker = Tracker::default();
    let sender = Arc::new(RecordingSender::default());
    let mut core = relay_core(&tracker, Duration::ZERO, sender, 10).await;

    for i in 0..25 {
        core.handle(&message(0x10, "Alice", &format!("msg {}", i)))
            .await
            .unwrap();
        assert!(core.history().len(0x10) <= 20);
    }

    let stored = core.history().history(0x10);
    assert_eq!(stored.len(), 20);
    // Oldest entries are dropped first: the newest exchange is last.
    assert_eq!(stored[18], Turn::user("Alice:msg 24"));
    assert_eq!(stored[19], Turn::assistant("reply to Alice: msg 24"));
    assert_eq!(stored[0], Turn::user("Alice:msg 15"));

    for call in tracker.calls() {
        assert!(call.history.len() <= 19);
    }
}

#[tokio::test]
async fn failed_chat_keeps_user_turn_only() {
    let tracker = Tracker::default();
    let sender = Arc::new(RecordingSender::default());
    let mut core = relay_core(&tracker, Duration::ZERO, sender.clone(), 10).await;

    let err = core.handle(&message(0x10, "Alice", "fail")).await.unwrap_err();
    assert_eq!(err.detail(), "model overloaded");
    assert_eq!(core.history().history(0x10), vec![Turn::user("Alice:fail")]);
    // The notice is sent by the dispatch loop, not by `handle`.
    assert!(sender.sent().is_empty());
}

#[tokio::test]
async fn system_prompt_is_forwarded() {
    let tracker = Tracker::default();
    let sender = Arc::new(RecordingSender::default());
    let mut core = relay_core(&tracker, Duration::ZERO, sender, 10).await;
    core.handle(&message(0x10, "Alice", "hello")).await.unwrap();
    assert_eq!(tracker.calls()[0].system_prompt, settings().system_prompt);
}
