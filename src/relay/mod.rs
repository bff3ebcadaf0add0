//! The relay pipeline: radio text in, AI reply out.
//!
//! ```text
//! radio reader ──► Listener ──► ingestion queue ──► DispatchLoop ──► TextSender ──► radio writer
//!                  (filter)                         (one at a time:
//!                                                    history, backend, chunking)
//! ```

pub mod chunker;
pub mod dispatch;
pub mod history;
pub mod listener;
pub mod message;
pub mod queue;
pub mod sender;
pub mod server;

pub use chunker::{chunk_reply, DEFAULT_CHUNK_BYTES};
pub use dispatch::{DispatchHandle, DispatchLoop, DispatchSummary, RelayCore, RelaySettings};
pub use history::ConversationManager;
pub use listener::{Filtered, Listener, NodeIdentity};
pub use message::{Message, SignalQuality};
pub use queue::{ingestion_queue, QueueReceiver, QueueSender, Recv};
pub use sender::{DisconnectedSender, RadioSender, TextSender};
pub use server::MeshBot;
