//! Anthropic Messages API.
use super::http::{build_client, embedded_error, send_json};
use super::{alternating_turns, BackendArgs, ChatBackend, ChatResult, Turn};
use crate::error::BotError;
use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The Messages API has no listing endpoint usable with a plain key.
const KNOWN_MODELS: &[&str] = &[
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
    "claude-3-5-sonnet-20240620",
];

pub struct ClaudeBackend {
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u64,
    timeout: Duration,
    args: BackendArgs,
    client: Option<reqwest::Client>,
}

impl ClaudeBackend {
    pub fn from_args(args: &BackendArgs) -> Result<Self, BotError> {
        Ok(Self {
            base_url: args.base_url("https://api.anthropic.com"),
            model: args.str_or("model", "claude-3-sonnet-20240229"),
            temperature: args.f64_or("temperature", 0.7),
            max_tokens: args.u64_or("max_tokens", 1024),
            timeout: args.timeout(60),
            args: args.clone(),
            client: None,
        })
    }

    fn payload(&self, user_name: &str, message: &str, system_prompt: &str, history: &[Turn]) -> Value {
        let messages: Vec<Value> = alternating_turns(history, user_name, message)
            .iter()
            .map(|t| json!({"role": t.role.as_str(), "content": t.content}))
            .collect();
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        if !system_prompt.is_empty() {
            payload["system"] = Value::String(system_prompt.to_string());
        }
        payload
    }

    async fn request(
        &self,
        user_name: &str,
        message: &str,
        system_prompt: &str,
        history: &[Turn],
    ) -> Result<String, BotError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| BotError::connection("claude backend is not initialised"))?;
        let url = format!("{}/v1/messages", self.base_url);
        let payload = self.payload(user_name, message, system_prompt, history);
        let body = send_json(client.post(&url).json(&payload), self.timeout).await?;
        if let Some(err) = embedded_error(&body) {
            return Err(BotError::chat(err));
        }
        let text: String = body
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| BotError::chat("response has no content blocks"))?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl ChatBackend for ClaudeBackend {
    fn name(&self) -> &str {
        "claude"
    }

    async fn init(&mut self) -> Result<(), BotError> {
        let key = self.args.require_api_key()?;
        let mut headers = vec![
            ("x-api-key".to_string(), key),
            ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
        ];
        headers.extend(self.args.headers());
        self.client = Some(build_client(&headers)?);
        Ok(())
    }

    async fn chat(
        &mut self,
        user_name: &str,
        message: &str,
        system_prompt: &str,
        history: &[Turn],
    ) -> ChatResult {
        debug!("claude chat model={} history={}", self.model, history.len());
        self.request(user_name, message, system_prompt, history)
            .await
            .into()
    }

    async fn close(&mut self) {
        self.client = None;
    }

    async fn get_models(&mut self) -> Result<Vec<String>, BotError> {
        Ok(KNOWN_MODELS.iter().map(|m| m.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_is_top_level_field() {
        let b = ClaudeBackend::from_args(&BackendArgs::new("claude", toml::Table::new())).unwrap();
        let p = b.payload("Alice", "hi", "be brief", &[]);
        assert_eq!(p["system"], "be brief");
        assert_eq!(p["messages"][0]["role"], "user");
        assert_eq!(p["messages"][0]["content"], "Alice:hi");
    }

    #[tokio::test]
    async fn chat_before_init_fails_cleanly() {
        let mut b =
            ClaudeBackend::from_args(&BackendArgs::new("claude", toml::Table::new())).unwrap();
        let r = b.chat("Alice", "hi", "", &[]).await;
        assert!(!r.success());
        assert!(!r.error().is_empty());
        b.close().await;
        b.close().await;
    }
}
