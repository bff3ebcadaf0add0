//! # Meshtastic Radio Link
//!
//! Everything that touches the radio lives here: the serial framing, protobuf
//! decoding of device packets, the node name directory, and the reader/writer
//! tasks that move bytes between the serial port and the relay.
//!
//! ## Layout
//!
//! - [`nodes`]: persistent node name cache and the local node identity
//! - `framer`: `0x94 0xC3 len_hi len_lo` stream framing (`meshtastic-proto`)
//! - `decoder`: `FromRadio` to [`decoder::RadioEvent`], `ToRadio` encoders (`meshtastic-proto`)
//! - `link`: serial port reader and writer tasks (`serial` + `meshtastic-proto`)
//!
//! ## Configuration
//!
//! ```toml
//! [meshtastic]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! channel = 0
//! min_send_gap_ms = 2000
//! node_cache_file = "data/node_cache.json"
//! ```

pub mod nodes;

#[cfg(feature = "meshtastic-proto")]
pub mod decoder;
#[cfg(feature = "meshtastic-proto")]
pub mod framer;
#[cfg(all(feature = "serial", feature = "meshtastic-proto"))]
mod link;

#[cfg(all(feature = "serial", feature = "meshtastic-proto"))]
pub use link::{connect_radio, RadioLink};
pub use nodes::NodeDirectory;

/// Destination address of mesh-wide broadcasts.
pub const BROADCAST_ADDR: u32 = 0xffff_ffff;

/// A decoded text packet as reported by the radio.
#[derive(Debug, Clone, PartialEq)]
pub struct TextEvent {
    pub from: u32,
    pub to: u32,
    pub channel: u32,
    pub text: String,
    pub rssi: i32,
    pub snr: f32,
    /// Receive time in unix seconds; zero when the radio did not stamp it.
    pub rx_time: u32,
}

/// Outgoing direct message for the writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to_node: u32,
    /// Channel index (0 = primary)
    pub channel: u32,
    pub content: String,
}

/// Writer tuning parameters, sourced from Config
#[derive(Debug, Clone)]
pub struct WriterTuning {
    /// Minimum gap between text sends (ms).
    pub min_send_gap_ms: u64,
}

impl Default for WriterTuning {
    fn default() -> Self {
        Self {
            min_send_gap_ms: 2000,
        }
    }
}

impl From<&crate::config::MeshtasticConfig> for WriterTuning {
    fn from(cfg: &crate::config::MeshtasticConfig) -> Self {
        Self {
            min_send_gap_ms: cfg.min_send_gap_ms,
        }
    }
}

/// Control messages for coordinating the reader and writer tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Shutdown,
    SetNodeId(u32),
    /// Correlated ACK from radio for a previously sent reliable packet (reply_id)
    AckReceived(u32),
    /// Routing failure reported by the radio for a packet id
    RoutingError { id: u32, reason: String },
}
