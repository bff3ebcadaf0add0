//! Generic HTTP bridge: a user-run service that speaks the relay's own chat shape.
//!
//! Endpoints: `GET /health`, `POST /api/chat`, `GET /api/models`. The chat
//! response mirrors [`ChatResult`]: `{"success": bool, "response": str, "error": str}`.
use super::http::{build_client, send_json};
use super::{BackendArgs, ChatBackend, ChatResult, Turn};
use crate::error::BotError;
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct BridgeReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpBridgeBackend {
    base_url: String,
    temperature: f64,
    max_tokens: u64,
    timeout: Duration,
    args: BackendArgs,
    client: Option<reqwest::Client>,
}

impl HttpBridgeBackend {
    pub fn from_args(args: &BackendArgs) -> Result<Self, BotError> {
        Ok(Self {
            base_url: args.base_url("http://127.0.0.1:8000"),
            temperature: args.f64_or("temperature", 0.7),
            max_tokens: args.u64_or("max_tokens", 512),
            timeout: args.timeout(60),
            args: args.clone(),
            client: None,
        })
    }

    fn client(&self) -> Result<&reqwest::Client, BotError> {
        self.client
            .as_ref()
            .ok_or_else(|| BotError::connection("fastapi backend is not initialised"))
    }

    async fn request(
        &self,
        user_name: &str,
        message: &str,
        system_prompt: &str,
        history: &[Turn],
    ) -> Result<String, BotError> {
        let url = format!("{}/api/chat", self.base_url);
        let payload = json!({
            "user_name": user_name,
            "message": message,
            "system_prompt": system_prompt,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "request_id": uuid::Uuid::new_v4().to_string(),
            "timestamp": chrono::Utc::now().timestamp(),
            "conversation_history": history,
        });
        let body = send_json(self.client()?.post(&url).json(&payload), self.timeout).await?;
        let reply: BridgeReply = serde_json::from_value(body)?;
        if reply.success {
            Ok(reply.response.unwrap_or_default())
        } else {
            Err(BotError::chat(
                reply
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "bridge reported failure without detail".to_string()),
            ))
        }
    }
}

#[async_trait]
impl ChatBackend for HttpBridgeBackend {
    fn name(&self) -> &str {
        "fastapi"
    }

    async fn init(&mut self) -> Result<(), BotError> {
        let mut headers = self.args.headers();
        if let Some(key) = self.args.api_key() {
            headers.push(("Authorization".to_string(), format!("Bearer {}", key)));
        }
        let client = build_client(&headers)?;
        let url = format!("{}/health", self.base_url);
        send_json(client.get(&url), self.timeout)
            .await
            .map_err(|e| BotError::connection(format!("bridge at {} not healthy: {}", self.base_url, e)))?;
        self.client = Some(client);
        Ok(())
    }

    async fn chat(
        &mut self,
        user_name: &str,
        message: &str,
        system_prompt: &str,
        history: &[Turn],
    ) -> ChatResult {
        debug!("fastapi chat history={}", history.len());
        self.request(user_name, message, system_prompt, history)
            .await
            .into()
    }

    async fn close(&mut self) {
        self.client = None;
    }

    async fn get_models(&mut self) -> Result<Vec<String>, BotError> {
        let url = format!("{}/api/models", self.base_url);
        let body = send_json(self.client()?.get(&url), self.timeout).await?;
        Ok(body
            .get("models")
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.as_str().or_else(|| m.get("name").and_then(|n| n.as_str())))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}
