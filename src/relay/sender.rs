//! Outbound side of the relay.
use crate::error::BotError;
use crate::meshtastic::OutgoingMessage;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Delivers one chunk of text to a node.
#[async_trait]
pub trait TextSender: Send + Sync {
    async fn send_text(&self, to: u32, text: &str) -> Result<(), BotError>;
}

/// Hands chunks to the radio writer task, which paces and transmits them in order.
#[derive(Clone)]
pub struct RadioSender {
    outgoing: mpsc::UnboundedSender<OutgoingMessage>,
    channel: u32,
}

impl RadioSender {
    pub fn new(outgoing: mpsc::UnboundedSender<OutgoingMessage>, channel: u32) -> Self {
        Self { outgoing, channel }
    }
}

#[async_trait]
impl TextSender for RadioSender {
    async fn send_text(&self, to: u32, text: &str) -> Result<(), BotError> {
        self.outgoing
            .send(OutgoingMessage {
                to_node: to,
                channel: self.channel,
                content: text.to_string(),
            })
            .map_err(|_| BotError::transport("radio writer is not running"))
    }
}

/// Used when the relay runs without a radio: every send fails and is logged.
pub struct DisconnectedSender;

#[async_trait]
impl TextSender for DisconnectedSender {
    async fn send_text(&self, to: u32, _text: &str) -> Result<(), BotError> {
        Err(BotError::transport(format!(
            "no radio connected, cannot reach {}",
            crate::logutil::node_label(to)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn radio_sender_enqueues_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let s = RadioSender::new(tx, 2);
        s.send_text(5, "one").await.unwrap();
        s.send_text(5, "two").await.unwrap();
        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_eq!((a.to_node, a.channel, a.content.as_str()), (5, 2, "one"));
        assert_eq!(b.content, "two");
    }

    #[tokio::test]
    async fn closed_writer_is_transport_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let s = RadioSender::new(tx, 0);
        assert!(matches!(s.send_text(1, "x").await, Err(BotError::Transport(_))));
        assert!(matches!(DisconnectedSender.send_text(1, "x").await, Err(BotError::Transport(_))));
    }
}
