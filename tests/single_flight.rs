//! At most one backend call is ever in flight, whatever the arrival pattern.

mod common;

use common::*;
use meshbot::relay::{ingestion_queue, DispatchLoop};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_arrivals_are_processed_one_at_a_time() {
    const SENDERS: u32 = 4;
    const PER_SENDER: usize = 5;

    let tracker = Tracker::default();
    let sender = Arc::new(RecordingSender::default());
    let core = relay_core(&tracker, Duration::from_millis(5), sender.clone(), 10).await;
    let (tx, rx) = ingestion_queue();
    let (dispatch, _handle) =
        DispatchLoop::new(rx, core, Duration::from_millis(20), Duration::from_secs(5));
    let running = tokio::spawn(dispatch.run());

    // Producers are plain OS threads, like a radio callback would be.
    let producers: Vec<_> = (0..SENDERS)
        .map(|s| {
            let tx = tx.clone();
            std::thread::spawn(move || {
                for i in 0..PER_SENDER {
                    assert!(tx.push(message(0x100 + s, &format!("node{}", s), &format!("m{}", i))));
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
        })
        .collect();
    for p in producers {
        p.join().expect("producer thread");
    }
    drop(tx);

    let summary = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("loop finished")
        .expect("loop task");

    let total = SENDERS as usize * PER_SENDER;
    assert_eq!(summary.processed, total);
    assert_eq!(tracker.call_count(), total);
    assert_eq!(tracker.max_in_flight(), 1);
    assert_eq!(sender.sent().len(), total);

    // Each sender's messages are answered in the order they were pushed.
    for s in 0..SENDERS {
        let seen: Vec<String> = tracker
            .calls()
            .into_iter()
            .filter(|c| c.user_name == format!("node{}", s))
            .map(|c| c.message)
            .collect();
        let expected: Vec<String> = (0..PER_SENDER).map(|i| format!("m{}", i)).collect();
        assert_eq!(seen, expected);
    }
}
