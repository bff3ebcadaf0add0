//! Process-wide relay counters.
use std::sync::atomic::{AtomicU64, Ordering};

static MESSAGES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static MESSAGES_DROPPED: AtomicU64 = AtomicU64::new(0);
static CHAT_OK: AtomicU64 = AtomicU64::new(0);
static CHAT_FAILED: AtomicU64 = AtomicU64::new(0);
static UNEXPECTED_FAILURES: AtomicU64 = AtomicU64::new(0);
static CHUNKS_SENT: AtomicU64 = AtomicU64::new(0);
static SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
static ACKS_RECEIVED: AtomicU64 = AtomicU64::new(0);

pub fn inc_messages_received() {
    MESSAGES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_messages_dropped() {
    MESSAGES_DROPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_chat_ok() {
    CHAT_OK.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_chat_failed() {
    CHAT_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_unexpected_failures() {
    UNEXPECTED_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_chunks_sent() {
    CHUNKS_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_send_failures() {
    SEND_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_acks_received() {
    ACKS_RECEIVED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub chat_ok: u64,
    pub chat_failed: u64,
    pub unexpected_failures: u64,
    pub chunks_sent: u64,
    pub send_failures: u64,
    pub acks_received: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        messages_received: MESSAGES_RECEIVED.load(Ordering::Relaxed),
        messages_dropped: MESSAGES_DROPPED.load(Ordering::Relaxed),
        chat_ok: CHAT_OK.load(Ordering::Relaxed),
        chat_failed: CHAT_FAILED.load(Ordering::Relaxed),
        unexpected_failures: UNEXPECTED_FAILURES.load(Ordering::Relaxed),
        chunks_sent: CHUNKS_SENT.load(Ordering::Relaxed),
        send_failures: SEND_FAILURES.load(Ordering::Relaxed),
        acks_received: ACKS_RECEIVED.load(Ordering::Relaxed),
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={} dropped={} chat_ok={} chat_failed={} unexpected={} chunks_sent={} send_failures={} acks={}",
            self.messages_received,
            self.messages_dropped,
            self.chat_ok,
            self.chat_failed,
            self.unexpected_failures,
            self.chunks_sent,
            self.send_failures,
            self.acks_received
        )
    }
}
