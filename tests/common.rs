//! Test utilities & fixtures shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use meshbot::backend::{BackendRegistry, BackendRouter, ChatBackend, ChatResult, Turn};
use meshbot::config::BotConfig;
use meshbot::error::BotError;
use meshbot::meshtastic::TextEvent;
use meshbot::relay::{
    ConversationManager, Message, NodeIdentity, RelayCore, RelaySettings, SignalQuality,
    TextSender,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A reply long enough to need several 200-byte chunks.
pub const LONG_REPLY: &str = "The relay splits long answers before they go out over the radio. \
Each piece stays under the configured byte budget, so the firmware never has to fragment a packet. \
Sentence ends are preferred as cut points, then clause marks, then plain spaces. \
Multi-byte text such as 你好，世界。 is never cut inside a character. \
Joining every piece in order gives back exactly the original answer.";

#[derive(Debug, Clone)]
pub struct ChatCall {
    pub user_name: String,
    pub message: String,
    pub system_prompt: String,
    pub history: Vec<Turn>,
}

#[derive(Default)]
struct TrackerState {
    calls: Vec<ChatCall>,
    in_flight: usize,
    max_in_flight: usize,
    inits: usize,
    closes: usize,
}

/// Observes what a [`MockBackend`] was asked to do.
#[derive(Clone, Default)]
pub struct Tracker(Arc<Mutex<TrackerState>>);

impl Tracker {
    fn state(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    pub fn inits(&self) -> usize {
        self.state().inits
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }
}

/// Scripted backend. The message text picks the behaviour:
/// `fail` returns a failed result, `panic` panics, `long...` answers with
/// [`LONG_REPLY`], anything else is echoed back.
pub struct MockBackend {
    tracker: Tracker,
    delay: Duration,
}

impl MockBackend {
    pub fn new(tracker: Tracker, delay: Duration) -> Self {
        Self { tracker, delay }
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn init(&mut self) -> Result<(), BotError> {
        self.tracker.state().inits += 1;
        Ok(())
    }

    async fn chat(
        &mut self,
        user_name: &str,
        message: &str,
        system_prompt: &str,
        history: &[Turn],
    ) -> ChatResult {
        {
            let mut s = self.tracker.state();
            s.calls.push(ChatCall {
                user_name: user_name.to_string(),
                message: message.to_string(),
                system_prompt: system_prompt.to_string(),
                history: history.to_vec(),
            });
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
        }
        tokio::time::sleep(self.delay).await;
        let result = match message {
            "fail" => ChatResult::failed("model overloaded"),
            "panic" => {
                self.tracker.state().in_flight -= 1;
                panic!("mock backend exploded");
            }
            m if m.starts_with("long") => ChatResult::ok(LONG_REPLY),
            m => ChatResult::ok(format!("reply to {}: {}", user_name, m)),
        };
        self.tracker.state().in_flight -= 1;
        result
    }

    async fn close(&mut self) {
        self.tracker.state().closes += 1;
    }

    async fn get_models(&mut self) -> Result<Vec<String>, BotError> {
        Ok(vec!["mock-1".to_string()])
    }
}

pub fn mock_registry(tracker: &Tracker, delay: Duration) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    let tracker = tracker.clone();
    registry.register("mock", move |_args| {
        Ok(Box::new(MockBackend::new(tracker.clone(), delay)))
    });
    registry
}

pub async fn mock_router(tracker: &Tracker, delay: Duration) -> BackendRouter {
    BackendRouter::start(mock_registry(tracker, delay), "mock", toml::Table::new())
        .await
        .expect("mock router")
}

/// Records every chunk handed to the radio; optionally fails every send.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(u32, String)>>,
    fail: bool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<(u32, String)> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn sent_to(&self, node: u32) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| *to == node)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl TextSender for RecordingSender {
    async fn send_text(&self, to: u32, text: &str) -> Result<(), BotError> {
        if self.fail {
            return Err(BotError::transport("radio unplugged"));
        }
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((to, text.to_string()));
        Ok(())
    }
}

/// Node identity with a fixed own id and a static name table.
pub struct FixedIdentity {
    pub own: Option<u32>,
    pub names: HashMap<u32, String>,
}

impl FixedIdentity {
    pub fn new(own: u32, names: &[(u32, &str)]) -> Self {
        Self {
            own: Some(own),
            names: names.iter().map(|(id, n)| (*id, n.to_string())).collect(),
        }
    }
}

impl NodeIdentity for FixedIdentity {
    fn own_node_id(&self) -> Option<u32> {
        self.own
    }

    fn display_name(&self, node_id: u32) -> Option<String> {
        self.names.get(&node_id).cloned()
    }
}

pub const OWN_NODE: u32 = 0x0a0b_0c0d;

pub fn message(sender: u32, name: &str, text: &str) -> Message {
    Message {
        sender_id: sender,
        sender_display_name: name.to_string(),
        text: text.to_string(),
        destination_id: OWN_NODE,
        receive_time: Utc::now(),
        signal: SignalQuality {
            rssi: -90,
            snr: 5.5,
        },
    }
}

pub fn text_event(from: u32, to: u32, text: &str) -> TextEvent {
    TextEvent {
        from,
        to,
        channel: 0,
        text: text.to_string(),
        rssi: -95,
        snr: 3.0,
        rx_time: 1_700_000_000,
    }
}

pub fn settings() -> RelaySettings {
    RelaySettings::from(&BotConfig::default())
}

pub async fn relay_core(
    tracker: &Tracker,
    delay: Duration,
    sender: Arc<RecordingSender>,
    exchanges: usize,
) -> RelayCore {
    RelayCore::new(
        mock_router(tracker, delay).await,
        ConversationManager::new(exchanges),
        sender,
        settings(),
    )
}

/// Address nothing listens on.
pub fn closed_port_addr() -> SocketAddr {
    let l = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = l.local_addr().expect("addr");
    drop(l);
    addr
}

/// Minimal HTTP/1.1 server answering every request with `route(method, path)`.
pub async fn canned_http<F>(route: F) -> SocketAddr
where
    F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let route = Arc::new(route);
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            let route = route.clone();
            tokio::spawn(async move {
                let request = read_request(&mut sock).await;
                let mut parts = request.split_whitespace();
                let method = parts.next().unwrap_or("").to_string();
                let path = parts.next().unwrap_or("").to_string();
                let (status, body) = route(&method, &path);
                let response = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    addr
}

async fn read_request(sock: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = match sock.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..pos]).to_string();
            let body_len = head
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= pos + 4 + body_len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}
