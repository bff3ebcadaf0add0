//! Translation between device API protobufs and relay-level events.
//!
//! Pure functions: no IO, so the reader and writer tasks stay thin and the
//! packet handling is testable without a radio.
use super::TextEvent;
use crate::protobuf::meshtastic_generated as proto;
use bytes::Bytes;
use log::{debug, trace, warn};
use prost::Message as _;
use proto::from_radio::PayloadVariant as FromRadioVariant;
use proto::mesh_packet::{PayloadVariant as PacketVariant, Priority};
use proto::to_radio::PayloadVariant as ToRadioVariant;
use proto::PortNum;

/// Hops a direct reply may take.
pub const HOP_LIMIT: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    Text(TextEvent),
    /// The radio's own node number.
    MyNodeNum(u32),
    NodeSeen {
        node_id: u32,
        long_name: String,
        short_name: String,
    },
    /// Delivery confirmed for the packet with this id.
    Ack(u32),
    RoutingError {
        id: u32,
        reason: String,
    },
    ConfigComplete(u32),
    Rebooted,
}

/// Decode one `FromRadio` payload into zero or more events.
pub fn decode_from_radio(frame: &[u8]) -> Result<Vec<RadioEvent>, prost::DecodeError> {
    let msg = proto::FromRadio::decode(frame)?;
    let mut events = Vec::new();
    match msg.payload_variant {
        Some(FromRadioVariant::Packet(pkt)) => decode_packet(&pkt, &mut events),
        Some(FromRadioVariant::MyInfo(info)) => events.push(RadioEvent::MyNodeNum(info.my_node_num)),
        Some(FromRadioVariant::NodeInfo(node)) => {
            if let Some(user) = node.user {
                events.push(RadioEvent::NodeSeen {
                    node_id: node.num,
                    long_name: user.long_name,
                    short_name: user.short_name,
                });
            }
        }
        Some(FromRadioVariant::ConfigCompleteId(id)) => events.push(RadioEvent::ConfigComplete(id)),
        Some(FromRadioVariant::Rebooted(_)) => events.push(RadioEvent::Rebooted),
        None => trace!("FromRadio id={} with no known payload", msg.id),
    }
    Ok(events)
}

fn decode_packet(pkt: &proto::MeshPacket, events: &mut Vec<RadioEvent>) {
    let data = match &pkt.payload_variant {
        Some(PacketVariant::Decoded(d)) => d,
        Some(PacketVariant::Encrypted(_)) => {
            trace!("Encrypted packet from 0x{:08x} (no key on this channel)", pkt.from);
            return;
        }
        None => return,
    };
    let port = PortNum::try_from(data.portnum).unwrap_or(PortNum::UnknownApp);

    if pkt.priority == Priority::Ack as i32 && data.reply_id != 0 {
        events.push(RadioEvent::Ack(data.reply_id));
    }

    match port {
        PortNum::TextMessageApp => match std::str::from_utf8(&data.payload) {
            Ok(text) => events.push(RadioEvent::Text(TextEvent {
                from: pkt.from,
                to: pkt.to,
                channel: pkt.channel,
                text: text.to_string(),
                rssi: pkt.rx_rssi,
                snr: pkt.rx_snr,
                rx_time: pkt.rx_time,
            })),
            Err(e) => warn!("Dropping non UTF-8 text from 0x{:08x}: {}", pkt.from, e),
        },
        PortNum::NodeinfoApp => {
            if let Ok(user) = proto::User::decode(data.payload.clone()) {
                if !user.long_name.trim().is_empty() || !user.short_name.trim().is_empty() {
                    events.push(RadioEvent::NodeSeen {
                        node_id: pkt.from,
                        long_name: user.long_name,
                        short_name: user.short_name,
                    });
                }
            }
        }
        PortNum::RoutingApp => {
            if let Ok(routing) = proto::Routing::decode(data.payload.clone()) {
                if let Some(proto::routing::Variant::ErrorReason(code)) = routing.variant {
                    let id = if data.request_id != 0 {
                        data.request_id
                    } else {
                        data.reply_id
                    };
                    match proto::routing::Error::try_from(code) {
                        Ok(proto::routing::Error::None) => {
                            if id != 0 && !events.contains(&RadioEvent::Ack(id)) {
                                events.push(RadioEvent::Ack(id));
                            }
                        }
                        Ok(err) => events.push(RadioEvent::RoutingError {
                            id,
                            reason: format!("{:?}", err),
                        }),
                        Err(_) => events.push(RadioEvent::RoutingError {
                            id,
                            reason: format!("code {}", code),
                        }),
                    }
                }
            }
        }
        other => debug!("Ignoring {:?} packet from 0x{:08x}", other, pkt.from),
    }
}

fn encode_to_radio(variant: ToRadioVariant) -> Vec<u8> {
    proto::ToRadio {
        payload_variant: Some(variant),
    }
    .encode_to_vec()
}

/// A reliable direct text packet.
pub fn encode_text_packet(from: u32, to: u32, channel: u32, id: u32, text: &str) -> Vec<u8> {
    let data = proto::Data {
        portnum: PortNum::TextMessageApp as i32,
        payload: Bytes::copy_from_slice(text.as_bytes()),
        ..Default::default()
    };
    let packet = proto::MeshPacket {
        from,
        to,
        channel,
        id,
        hop_limit: HOP_LIMIT,
        want_ack: true,
        priority: Priority::Reliable as i32,
        payload_variant: Some(PacketVariant::Decoded(data)),
        ..Default::default()
    };
    encode_to_radio(ToRadioVariant::Packet(packet))
}

pub fn encode_want_config(id: u32) -> Vec<u8> {
    encode_to_radio(ToRadioVariant::WantConfigId(id))
}

pub fn encode_heartbeat(nonce: u32) -> Vec<u8> {
    encode_to_radio(ToRadioVariant::Heartbeat(proto::Heartbeat { nonce }))
}

pub fn encode_disconnect() -> Vec<u8> {
    encode_to_radio(ToRadioVariant::Disconnect(true))
}
