//! Serial reader and writer tasks sharing one port.
use super::decoder::{self, RadioEvent};
use super::framer::{encode_frame, FrameDecoder};
use super::{ControlMessage, NodeDirectory, OutgoingMessage, WriterTuning};
use crate::logutil::{escape_log, node_label, truncate_for_log};
use crate::metrics;
use crate::relay::Listener;
use anyhow::{anyhow, Result};
use log::{debug, error, info, trace, warn};
use serialport::SerialPort;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

const HEARTBEAT_EVERY: Duration = Duration::from_secs(30);
const PRUNE_EVERY: Duration = Duration::from_secs(600);
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Open the serial port shared by reader and writer
async fn open_port(port_name: &str, baud_rate: u32) -> Result<SharedPort> {
    debug!("Opening serial port {} at {} baud", port_name, baud_rate);

    let mut builder = serialport::new(port_name, baud_rate).timeout(PORT_READ_TIMEOUT);
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    let mut port = builder
        .open()
        .map_err(|e| anyhow!("Failed to open serial port {}: {}", port_name, e))?;

    // Toggle DTR/RTS so the device wakes
    let _ = port.write_data_terminal_ready(true);
    let _ = port.write_request_to_send(true);
    sleep(Duration::from_millis(150)).await;

    // Discard boot chatter already buffered
    let mut purge_buf = [0u8; 512];
    if let Ok(available) = port.bytes_to_read() {
        if available > 0 {
            let _ = port.read(&mut purge_buf);
        }
    }

    Ok(Arc::new(Mutex::new(port)))
}

fn lock_port(port: &SharedPort) -> std::sync::MutexGuard<'_, Box<dyn SerialPort>> {
    port.lock().unwrap_or_else(|p| p.into_inner())
}

fn write_toradio(port: &SharedPort, payload: &[u8]) -> Result<()> {
    let frame = encode_frame(payload)?;
    let mut port = lock_port(port);
    port.write_all(&frame)?;
    port.flush()?;
    trace!("Sent ToRadio frame ({} bytes payload)", payload.len());
    Ok(())
}

fn nonzero_random() -> u32 {
    loop {
        let id: u32 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

struct RadioReader {
    port: SharedPort,
    frames: FrameDecoder,
    directory: Arc<NodeDirectory>,
    listener: Listener,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    writer_ctl: mpsc::UnboundedSender<ControlMessage>,
}

impl RadioReader {
    async fn run(mut self) {
        info!("Starting radio reader task");
        let mut poll = tokio::time::interval(Duration::from_millis(10));
        let mut prune = tokio::time::interval_at(tokio::time::Instant::now() + PRUNE_EVERY, PRUNE_EVERY);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = prune.tick() => {
                    let removed = self.directory.prune_stale();
                    if removed > 0 {
                        info!("Pruned {} stale nodes from cache", removed);
                        if let Err(e) = self.directory.save() {
                            warn!("Failed to save node cache after pruning: {}", e);
                        }
                    }
                }
                ctl = self.control_rx.recv() => {
                    match ctl {
                        Some(ControlMessage::Shutdown) | None => break,
                        Some(other) => trace!("Reader ignoring control {:?}", other),
                    }
                }
                _ = poll.tick() => {
                    if let Err(e) = self.read_and_process().await {
                        error!("Reader error: {} - continuing", e);
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
        info!("Radio reader task shutting down");
    }

    async fn read_and_process(&mut self) -> Result<()> {
        let port = self.port.clone();
        let chunk = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut buf = [0u8; 1024];
            let mut port = lock_port(&port);
            match port.read(&mut buf) {
                Ok(n) => Ok(buf[..n].to_vec()),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) => Err(e),
            }
        })
        .await??;
        if chunk.is_empty() {
            return Ok(());
        }
        self.frames.push(&chunk);
        while let Some(frame) = self.frames.next_frame() {
            match decoder::decode_from_radio(&frame) {
                Ok(events) => {
                    for event in events {
                        self.handle_event(event);
                    }
                }
                Err(e) => debug!("Undecodable FromRadio frame ({} bytes): {}", frame.len(), e),
            }
        }
        Ok(())
    }

    fn handle_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::Text(text) => {
                let from = text.from;
                let outcome = self.listener.on_text(text);
                trace!("Text from {} -> {:?}", node_label(from), outcome);
            }
            RadioEvent::MyNodeNum(id) => {
                info!("Radio reports our node id {}", node_label(id));
                self.directory.set_own_node_id(id);
                let _ = self.writer_ctl.send(ControlMessage::SetNodeId(id));
            }
            RadioEvent::NodeSeen {
                node_id,
                long_name,
                short_name,
            } => {
                debug!(
                    "Node {} is '{}' ({})",
                    node_label(node_id),
                    escape_log(&long_name),
                    escape_log(&short_name)
                );
                self.directory.update_node(node_id, &long_name, &short_name);
            }
            RadioEvent::Ack(id) => {
                let _ = self.writer_ctl.send(ControlMessage::AckReceived(id));
            }
            RadioEvent::RoutingError { id, reason } => {
                let _ = self
                    .writer_ctl
                    .send(ControlMessage::RoutingError { id, reason });
            }
            RadioEvent::ConfigComplete(id) => {
                info!(
                    "Radio config sync complete (id=0x{:08x}, {} nodes known)",
                    id,
                    self.directory.len()
                );
                if let Err(e) = self.directory.save() {
                    warn!("Failed to save node cache: {}", e);
                }
            }
            RadioEvent::Rebooted => warn!("Radio reported a reboot"),
        }
    }
}

struct RadioWriter {
    port: SharedPort,
    outgoing_rx: mpsc::UnboundedReceiver<OutgoingMessage>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    tuning: WriterTuning,
    own_id: Option<u32>,
    last_text_send: Option<Instant>,
    /// Packet id -> destination, for correlating acks.
    pending: HashMap<u32, u32>,
}

impl RadioWriter {
    async fn run(mut self) {
        info!("Starting radio writer task");
        let config_id = nonzero_random();
        info!("Requesting config from radio (want_config_id=0x{:08x})", config_id);
        if let Err(e) = write_toradio(&self.port, &decoder::encode_want_config(config_id)) {
            warn!("Initial config request failed: {}", e);
        }

        let mut heartbeat =
            tokio::time::interval_at(tokio::time::Instant::now() + HEARTBEAT_EVERY, HEARTBEAT_EVERY);

        loop {
            tokio::select! {
                msg = self.outgoing_rx.recv() => {
                    match msg {
                        Some(outgoing) => {
                            if let Err(e) = self.send_text(&outgoing).await {
                                metrics::inc_send_failures();
                                error!("Failed to send to {}: {}", node_label(outgoing.to_node), e);
                            }
                        }
                        None => {
                            debug!("Outgoing channel closed");
                            break;
                        }
                    }
                }
                ctl = self.control_rx.recv() => {
                    match ctl {
                        Some(ControlMessage::Shutdown) | None => break,
                        Some(ControlMessage::SetNodeId(id)) => self.own_id = Some(id),
                        Some(ControlMessage::AckReceived(id)) => {
                            if let Some(to) = self.pending.remove(&id) {
                                metrics::inc_acks_received();
                                debug!("Delivered id=0x{:08x} to {}", id, node_label(to));
                            }
                        }
                        Some(ControlMessage::RoutingError { id, reason }) => {
                            let to = self.pending.remove(&id);
                            warn!(
                                "Routing error for id=0x{:08x}{}: {}",
                                id,
                                to.map(|t| format!(" to {}", node_label(t))).unwrap_or_default(),
                                reason
                            );
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    let nonce = rand::random::<u32>() & 0xffff;
                    if let Err(e) = write_toradio(&self.port, &decoder::encode_heartbeat(nonce)) {
                        warn!("Heartbeat failed: {}", e);
                    }
                }
            }
        }

        if let Err(e) = write_toradio(&self.port, &decoder::encode_disconnect()) {
            debug!("Disconnect frame not sent: {}", e);
        }
        info!("Radio writer task shutting down");
    }

    async fn send_text(&mut self, msg: &OutgoingMessage) -> Result<()> {
        self.enforce_min_send_gap(Duration::from_millis(self.tuning.min_send_gap_ms))
            .await;
        let id = nonzero_random();
        let payload = decoder::encode_text_packet(
            self.own_id.unwrap_or(0),
            msg.to_node,
            msg.channel,
            id,
            &msg.content,
        );
        write_toradio(&self.port, &payload)?;
        self.last_text_send = Some(Instant::now());
        self.pending.insert(id, msg.to_node);
        if self.pending.len() > 256 {
            self.pending.clear();
        }
        debug!(
            "Sent id=0x{:08x} to {} ({} bytes): {}",
            id,
            node_label(msg.to_node),
            msg.content.len(),
            escape_log(&truncate_for_log(&msg.content, 60))
        );
        Ok(())
    }

    /// Ensure at least `min_gap` has elapsed since the last text packet send
    async fn enforce_min_send_gap(&mut self, min_gap: Duration) {
        if let Some(last) = self.last_text_send {
            let elapsed = last.elapsed();
            if elapsed < min_gap {
                let wait = min_gap - elapsed;
                trace!("Gating: waiting {}ms before next send", wait.as_millis());
                sleep(wait).await;
            }
        }
    }
}

/// Running reader and writer tasks for one radio.
pub struct RadioLink {
    outgoing_tx: mpsc::UnboundedSender<OutgoingMessage>,
    reader_ctl: mpsc::UnboundedSender<ControlMessage>,
    writer_ctl: mpsc::UnboundedSender<ControlMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RadioLink {
    /// Queue feeding the writer task.
    pub fn outgoing(&self) -> mpsc::UnboundedSender<OutgoingMessage> {
        self.outgoing_tx.clone()
    }

    /// Stop both tasks. Chunks already queued for the writer are dropped.
    pub async fn shutdown(self) {
        let _ = self.reader_ctl.send(ControlMessage::Shutdown);
        let _ = self.writer_ctl.send(ControlMessage::Shutdown);
        for (name, task) in [("reader", self.reader), ("writer", self.writer)] {
            if timeout(Duration::from_secs(3), task).await.is_err() {
                warn!("Radio {} task did not stop in time", name);
            }
        }
    }
}

/// Open the serial port and start the reader and writer tasks.
///
/// Decoded direct texts go to `listener`; node names and our own id are
/// recorded in `directory`.
pub async fn connect_radio(
    port_name: &str,
    baud_rate: u32,
    tuning: WriterTuning,
    directory: Arc<NodeDirectory>,
    listener: Listener,
) -> Result<RadioLink> {
    let port = open_port(port_name, baud_rate).await?;
    info!("Connected to Meshtastic device on {}", port_name);

    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let (reader_ctl, reader_control_rx) = mpsc::unbounded_channel();
    let (writer_ctl, writer_control_rx) = mpsc::unbounded_channel();

    let reader = RadioReader {
        port: port.clone(),
        frames: FrameDecoder::new(),
        directory,
        listener,
        control_rx: reader_control_rx,
        writer_ctl: writer_ctl.clone(),
    };
    let writer = RadioWriter {
        port,
        outgoing_rx,
        control_rx: writer_control_rx,
        tuning,
        own_id: None,
        last_text_send: None,
        pending: HashMap::new(),
    };

    Ok(RadioLink {
        outgoing_tx,
        reader_ctl,
        writer_ctl,
        reader: tokio::spawn(reader.run()),
        writer: tokio::spawn(writer.run()),
    })
}
