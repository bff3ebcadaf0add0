use chrono::{DateTime, Utc};

/// Radio signal quality reported with a received packet.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SignalQuality {
    pub rssi: i32,
    pub snr: f32,
}

/// A validated direct message addressed to this node.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sender_id: u32,
    pub sender_display_name: String,
    pub text: String,
    pub destination_id: u32,
    pub receive_time: DateTime<Utc>,
    pub signal: SignalQuality,
}
