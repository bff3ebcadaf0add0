//! Persistent WebSocket bridge.
//!
//! Each request is a JSON text frame tagged with a fresh `request_id`; the reply
//! is the first frame carrying the same id. Frames for other ids are skipped.
use super::{BackendArgs, ChatBackend, ChatResult, Turn};
use crate::error::BotError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct WebSocketBackend {
    uri: String,
    timeout: Duration,
    max_attempts: u32,
    initial_backoff: Duration,
    stream: Option<WsStream>,
}

impl WebSocketBackend {
    pub fn from_args(args: &BackendArgs) -> Result<Self, BotError> {
        let uri = args.str_or("uri", "ws://localhost:9238");
        if !(uri.starts_with("ws://") || uri.starts_with("wss://")) {
            return Err(BotError::config(format!(
                "backends.{}.uri must be a ws:// or wss:// URL (got '{}')",
                args.name(),
                uri
            )));
        }
        Ok(Self {
            uri,
            timeout: args.timeout(30),
            max_attempts: args.u64_or("max_reconnect_attempts", 5).max(1) as u32,
            initial_backoff: Duration::from_millis(args.u64_or("reconnect_delay_ms", 1000)),
            stream: None,
        })
    }

    /// Connect with doubling back-off, giving up after `max_attempts`.
    async fn connect(&mut self) -> Result<(), BotError> {
        let mut delay = self.initial_backoff;
        let mut last_err = String::new();
        for attempt in 1..=self.max_attempts {
            match connect_async(self.uri.as_str()).await {
                Ok((stream, _)) => {
                    if attempt > 1 {
                        info!("WebSocket reconnected to {} (attempt {})", self.uri, attempt);
                    }
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    last_err = e.to_string();
                    warn!(
                        "WebSocket connect to {} failed (attempt {}/{}): {}",
                        self.uri, attempt, self.max_attempts, e
                    );
                    if attempt < self.max_attempts {
                        sleep(delay).await;
                        delay = (delay * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }
        Err(BotError::connection(format!(
            "could not connect to {} after {} attempts: {}",
            self.uri, self.max_attempts, last_err
        )))
    }

    async fn send_frame(&mut self, text: String) -> Result<(), BotError> {
        if self.stream.is_none() {
            self.connect().await?;
        }
        if let Some(stream) = self.stream.as_mut() {
            if stream.send(Message::Text(text.clone())).await.is_ok() {
                return Ok(());
            }
        }
        // Stale socket: reconnect once and resend.
        self.stream = None;
        self.connect().await?;
        match self.stream.as_mut() {
            Some(stream) => stream.send(Message::Text(text)).await.map_err(BotError::from),
            None => Err(BotError::connection("websocket not connected")),
        }
    }

    async fn await_reply(&mut self, request_id: &str) -> Result<String, BotError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| BotError::connection("websocket not connected"))?;
            let next = timeout_at(deadline, stream.next()).await.map_err(|_| {
                BotError::connection(format!(
                    "no reply for request {} within {}s",
                    request_id,
                    self.timeout.as_secs()
                ))
            })?;
            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(e.into());
                }
                None => {
                    self.stream = None;
                    return Err(BotError::connection("websocket closed by peer"));
                }
            };
            let text = match frame {
                Message::Text(t) => t,
                Message::Close(_) => {
                    self.stream = None;
                    return Err(BotError::connection("websocket closed by peer"));
                }
                _ => continue,
            };
            let value: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    debug!("Ignoring non-JSON frame: {}", e);
                    continue;
                }
            };
            if let Some(reply) = match_reply(&value, request_id) {
                return reply;
            }
        }
    }
}

/// `Some` when `value` answers `request_id`: the reply text, or the error it carries.
fn match_reply(value: &Value, request_id: &str) -> Option<Result<String, BotError>> {
    if value.get("request_id").and_then(|v| v.as_str()) != Some(request_id) {
        return None;
    }
    let is_error = value.get("type").and_then(|t| t.as_str()) == Some("error")
        || value.get("success").and_then(|s| s.as_bool()) == Some(false);
    if is_error {
        let msg = value
            .get("error")
            .or_else(|| value.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("bridge reported an error");
        return Some(Err(BotError::chat(msg.to_string())));
    }
    let text = value
        .get("message")
        .or_else(|| value.get("response"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string());
    Some(text.ok_or_else(|| BotError::chat("reply frame has no message field")))
}

#[async_trait]
impl ChatBackend for WebSocketBackend {
    fn name(&self) -> &str {
        "websockets"
    }

    async fn init(&mut self) -> Result<(), BotError> {
        self.connect().await
    }

    async fn chat(
        &mut self,
        user_name: &str,
        message: &str,
        system_prompt: &str,
        history: &[Turn],
    ) -> ChatResult {
        let request_id = uuid::Uuid::new_v4().to_string();
        let frame = json!({
            "type": "chat",
            "user": user_name,
            "message": message,
            "system_prompt": system_prompt,
            "history": history,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "request_id": request_id,
        });
        let result = match self.send_frame(frame.to_string()).await {
            Ok(()) => self.await_reply(&request_id).await,
            Err(e) => Err(e),
        };
        result.into()
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!("WebSocket close: {}", e);
            }
        }
    }
}
