//! Local Ollama runtime (`/api/chat`, `/api/tags`).
use super::http::{build_client, embedded_error, send_json, text_at};
use super::{build_messages, BackendArgs, ChatBackend, ChatResult, Turn};
use crate::error::BotError;
use async_trait::async_trait;
use log::{debug, info};
use serde_json::json;
use std::time::Duration;

pub struct OllamaBackend {
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u64,
    timeout: Duration,
    client: Option<reqwest::Client>,
}

impl OllamaBackend {
    pub fn from_args(args: &BackendArgs) -> Result<Self, BotError> {
        Ok(Self {
            base_url: args.base_url("http://127.0.0.1:11434"),
            model: args.str_or("model", "qwen2.5:7b"),
            temperature: args.f64_or("temperature", 0.7),
            max_tokens: args.u64_or("max_tokens", 512),
            timeout: args.timeout(60),
            client: None,
        })
    }

    fn client(&self) -> Result<&reqwest::Client, BotError> {
        self.client
            .as_ref()
            .ok_or_else(|| BotError::connection("ollama backend is not initialised"))
    }

    async fn list_models(&self) -> Result<Vec<String>, BotError> {
        let url = format!("{}/api/tags", self.base_url);
        let body = send_json(self.client()?.get(&url), self.timeout).await?;
        Ok(body
            .get("models")
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
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
            "model": self.model,
            "messages": build_messages(system_prompt, history, user_name, message),
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
                "num_ctx": 4096,
            }
        });
        let body = send_json(self.client()?.post(&url).json(&payload), self.timeout).await?;
        if let Some(err) = embedded_error(&body) {
            return Err(BotError::chat(err));
        }
        text_at(&body, "/message/content")
            .map(|s| s.trim().to_string())
            .ok_or_else(|| BotError::chat("response has no message.content"))
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn init(&mut self) -> Result<(), BotError> {
        self.client = Some(build_client(&[])?);
        match self.list_models().await {
            Ok(models) => {
                if !models.iter().any(|m| m == &self.model) {
                    info!(
                        "Ollama model '{}' not in local list ({} models); requests may trigger a pull",
                        self.model,
                        models.len()
                    );
                }
                Ok(())
            }
            Err(e) => {
                self.client = None;
                Err(BotError::connection(format!(
                    "ollama at {} unreachable: {}",
                    self.base_url, e
                )))
            }
        }
    }

    async fn chat(
        &mut self,
        user_name: &str,
        message: &str,
        system_prompt: &str,
        history: &[Turn],
    ) -> ChatResult {
        debug!("ollama chat model={} history={}", self.model, history.len());
        self.request(user_name, message, system_prompt, history)
            .await
            .into()
    }

    async fn close(&mut self) {
        self.client = None;
    }

    async fn get_models(&mut self) -> Result<Vec<String>, BotError> {
        self.list_models().await
    }
}
