//! Ingestion queue between the radio callback and the dispatch loop.
//!
//! The sending half is a plain synchronous handle: it can be called from the
//! reader task, a blocking thread or any runtime, and wakes the receiver.
use super::message::Message;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum Recv {
    Message(Message),
    Timeout,
    /// Every sender has been dropped and the queue is drained.
    Closed,
}

#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl QueueSender {
    /// Enqueue without blocking. Returns false when the dispatch side is gone.
    pub fn push(&self, msg: Message) -> bool {
        self.tx.send(msg).is_ok()
    }
}

#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl QueueReceiver {
    /// Wait up to `limit` for the next message.
    pub async fn next(&mut self, limit: Duration) -> Recv {
        match tokio::time::timeout(limit, self.rx.recv()).await {
            Ok(Some(msg)) => Recv::Message(msg),
            Ok(None) => Recv::Closed,
            Err(_) => Recv::Timeout,
        }
    }

    /// Messages still waiting, for shutdown reporting.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Stop accepting new messages; already queued ones remain readable.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

pub fn ingestion_queue() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueSender { tx }, QueueReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::message::SignalQuality;

    fn msg(text: &str) -> Message {
        Message {
            sender_id: 1,
            sender_display_name: "n".into(),
            text: text.into(),
            destination_id: 2,
            receive_time: chrono::Utc::now(),
            signal: SignalQuality::default(),
        }
    }

    #[tokio::test]
    async fn times_out_when_empty() {
        let (_tx, mut rx) = ingestion_queue();
        assert!(matches!(rx.next(Duration::from_millis(10)).await, Recv::Timeout));
    }

    #[tokio::test]
    async fn preserves_arrival_order() {
        let (tx, mut rx) = ingestion_queue();
        for t in ["a", "b", "c"] {
            assert!(tx.push(msg(t)));
        }
        let mut got = Vec::new();
        while let Recv::Message(m) = rx.next(Duration::from_millis(10)).await {
            got.push(m.text);
        }
        assert_eq!(got, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn reports_closed_after_senders_drop() {
        let (tx, mut rx) = ingestion_queue();
        drop(tx);
        assert!(matches!(rx.next(Duration::from_millis(10)).await, Recv::Closed));
    }

    #[tokio::test]
    async fn push_from_plain_thread_wakes_receiver() {
        let (tx, mut rx) = ingestion_queue();
        let handle = std::thread::spawn(move || tx.push(msg("from-thread")));
        match rx.next(Duration::from_secs(2)).await {
            Recv::Message(m) => assert_eq!(m.text, "from-thread"),
            other => panic!("expected message, got {:?}", other),
        }
        assert!(handle.join().unwrap());
    }
}
