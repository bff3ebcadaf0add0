//! Inbound filter: raw radio text events in, validated [`Message`]s onto the queue.
//!
//! [`Listener::on_text`] is synchronous and cheap so the radio reader can call it
//! inline for every decoded text packet.
use super::message::{Message, SignalQuality};
use super::queue::QueueSender;
use crate::logutil::{escape_log, node_label};
use crate::meshtastic::{TextEvent, BROADCAST_ADDR};
use crate::metrics;
use chrono::{TimeZone, Utc};
use log::{debug, info, warn};
use std::sync::Arc;

/// What the listener knows about the local radio and its neighbours.
pub trait NodeIdentity: Send + Sync {
    /// Our node number, once the radio has reported it.
    fn own_node_id(&self) -> Option<u32>;
    /// Human readable name for a node, if one has been heard.
    fn display_name(&self, node_id: u32) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filtered {
    Accepted,
    Broadcast,
    NotForUs,
    FromSelf,
    Empty,
    OwnIdUnknown,
    QueueClosed,
}

#[derive(Clone)]
pub struct Listener {
    identity: Arc<dyn NodeIdentity>,
    queue: QueueSender,
}

impl Listener {
    pub fn new(identity: Arc<dyn NodeIdentity>, queue: QueueSender) -> Self {
        Self { identity, queue }
    }

    /// Validate one event and enqueue it. Drops are logged, never errors.
    pub fn on_text(&self, event: TextEvent) -> Filtered {
        let outcome = self.accept(event);
        if outcome != Filtered::Accepted {
            metrics::inc_messages_dropped();
        }
        outcome
    }

    fn accept(&self, event: TextEvent) -> Filtered {
        if event.to == BROADCAST_ADDR {
            debug!("Ignoring broadcast text from {}", node_label(event.from));
            return Filtered::Broadcast;
        }
        let own = match self.identity.own_node_id() {
            Some(id) => id,
            None => {
                debug!("Dropping DM from {}: own node id not known yet", node_label(event.from));
                return Filtered::OwnIdUnknown;
            }
        };
        if event.to != own {
            debug!(
                "Ignoring text for {} (we are {})",
                node_label(event.to),
                node_label(own)
            );
            return Filtered::NotForUs;
        }
        if event.from == own {
            return Filtered::FromSelf;
        }
        let text = event.text.trim();
        if text.is_empty() {
            debug!("Dropping empty DM from {}", node_label(event.from));
            return Filtered::Empty;
        }

        let sender_display_name = self
            .identity
            .display_name(event.from)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| node_label(event.from));
        let receive_time = if event.rx_time > 0 {
            Utc.timestamp_opt(event.rx_time as i64, 0)
                .single()
                .unwrap_or_else(Utc::now)
        } else {
            Utc::now()
        };

        info!("DM from {} ({}): {}", sender_display_name, node_label(event.from), escape_log(text));
        debug!("Signal from {}: rssi={} snr={:.1}", node_label(event.from), event.rssi, event.snr);

        let msg = Message {
            sender_id: event.from,
            sender_display_name,
            text: text.to_string(),
            destination_id: event.to,
            receive_time,
            signal: SignalQuality {
                rssi: event.rssi,
                snr: event.snr,
            },
        };
        if self.queue.push(msg) {
            metrics::inc_messages_received();
            Filtered::Accepted
        } else {
            warn!("Ingestion queue closed; dropping DM from {}", node_label(event.from));
            Filtered::QueueClosed
        }
    }
}
