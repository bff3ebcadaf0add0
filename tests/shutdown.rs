//! Shutdown semantics of the dispatch loop.

mod common;

use common::*;
use meshbot::relay::{ingestion_queue, DispatchLoop};
use std::sync::Arc;
use std::time::Duration;

async fn wait_for_calls(tracker: &Tracker, n: usize) {
    for _ in 0..200 {
        if tracker.call_count() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("backend never reached {} call(s)", n);
}

#[tokio::test]
async fn in_flight_message_completes_and_queue_is_left() {
    let tracker = Tracker::default();
    let sender = Arc::new(RecordingSender::default());
    let core = relay_core(&tracker, Duration::from_millis(300), sender.clone(), 10).await;
    let (tx, rx) = ingestion_queue();
    for i in 0..5 {
        tx.push(message(0x10, "Alice", &format!("m{}", i)));
    }
    let (dispatch, handle) =
        DispatchLoop::new(rx, core, Duration::from_millis(20), Duration::from_secs(5));
    let running = tokio::spawn(dispatch.run());

    wait_for_calls(&tracker, 1).await;
    handle.shutdown();

    let summary = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("loop stopped")
        .expect("loop task");

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.left_in_queue, 4);
    assert!(!summary.abandoned);
    assert_eq!(tracker.call_count(), 1);
    assert_eq!(sender.sent_to(0x10), vec!["reply to Alice: m0"]);
    assert_eq!(tracker.closes(), 1);
    // The queue no longer accepts work.
    assert!(!tx.push(message(0x10, "Alice", "late")));
}

#[tokio::test]
async fn slow_message_is_abandoned_after_grace() {
    let tracker = Tracker::default();
    let sender = Arc::new(RecordingSender::default());
    let core = relay_core(&tracker, Duration::from_secs(30), sender.clone(), 10).await;
    let (tx, rx) = ingestion_queue();
    tx.push(message(0x10, "Alice", "slow"));
    let (dispatch, handle) =
        DispatchLoop::new(rx, core, Duration::from_millis(20), Duration::from_millis(100));
    let running = tokio::spawn(dispatch.run());

    wait_for_calls(&tracker, 1).await;
    handle.shutdown();

    let summary = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("loop stopped")
        .expect("loop task");
    assert!(summary.abandoned);
    assert!(sender.sent().is_empty());
    assert_eq!(tracker.closes(), 1);
}

#[tokio::test]
async fn idle_loop_stops_promptly() {
    let tracker = Tracker::default();
    let sender = Arc::new(RecordingSender::default());
    let core = relay_core(&tracker, Duration::ZERO, sender, 10).await;
    let (_tx, rx) = ingestion_queue();
    let (dispatch, handle) =
        DispatchLoop::new(rx, core, Duration::from_secs(1), Duration::from_secs(5));
    let running = tokio::spawn(dispatch.run());

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.shutdown();
    let summary = tokio::time::timeout(Duration::from_millis(500), running)
        .await
        .expect("shutdown observed without waiting for the poll timeout")
        .expect("loop task");
    assert_eq!(summary.processed, 0);
    assert_eq!(tracker.closes(), 1);
}

#[tokio::test]
async fn dropping_every_handle_stops_the_loop() {
    let tracker = Tracker::default();
    let sender = Arc::new(RecordingSender::default());
    let core = relay_core(&tracker, Duration::ZERO, sender, 10).await;
    let (_tx, rx) = ingestion_queue();
    let (dispatch, handle) =
        DispatchLoop::new(rx, core, Duration::from_millis(20), Duration::from_secs(5));
    let running = tokio::spawn(dispatch.run());
    drop(handle);

    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("loop stopped")
        .expect("loop task");
    assert_eq!(tracker.closes(), 1);
}
