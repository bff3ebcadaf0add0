//! OpenAI-compatible chat completions: OpenAI, DeepSeek, OpenRouter, SiliconFlow.
use super::http::{build_client, embedded_error, send_json, text_at};
use super::{build_messages, BackendArgs, ChatBackend, ChatResult, Turn};
use crate::error::BotError;
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::json;
use std::time::Duration;

/// Provider defaults for the registry names served by this adapter.
fn preset(name: &str) -> (&'static str, &'static str) {
    match name {
        "deepseek" => ("https://api.deepseek.com/v1", "deepseek-chat"),
        "openrouter" => ("https://openrouter.ai/api/v1", "google/gemini-2.0-flash-exp:free"),
        "siliconflow" => ("https://api.siliconflow.cn/v1", "deepseek-ai/DeepSeek-V2-Chat"),
        _ => ("https://api.openai.com/v1", "gpt-3.5-turbo"),
    }
}

pub struct OpenAiCompatBackend {
    name: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u64,
    timeout: Duration,
    args: BackendArgs,
    client: Option<reqwest::Client>,
}

impl OpenAiCompatBackend {
    pub fn from_args(args: &BackendArgs) -> Result<Self, BotError> {
        let (base, model) = preset(args.name());
        Ok(Self {
            name: args.name().to_string(),
            base_url: args.base_url(base),
            model: args.str_or("model", model),
            temperature: args.f64_or("temperature", 0.7),
            max_tokens: args.u64_or("max_tokens", 512),
            timeout: args.timeout(60),
            args: args.clone(),
            client: None,
        })
    }

    fn headers(&self, api_key: &str) -> Vec<(String, String)> {
        let mut headers = vec![("Authorization".to_string(), format!("Bearer {}", api_key))];
        if self.name == "openrouter" {
            if let Some(site) = self.args.str("site_url") {
                headers.push(("HTTP-Referer".to_string(), site.to_string()));
            }
            headers.push(("X-Title".to_string(), self.args.str_or("app_name", "MeshBot")));
        }
        headers.extend(self.args.headers());
        headers
    }

    fn client(&self) -> Result<&reqwest::Client, BotError> {
        self.client
            .as_ref()
            .ok_or_else(|| BotError::connection(format!("{} backend is not initialised", self.name)))
    }

    async fn list_models(&self) -> Result<Vec<String>, BotError> {
        let url = format!("{}/models", self.base_url);
        let body = send_json(self.client()?.get(&url), self.timeout).await?;
        Ok(body
            .get("data")
            .and_then(|d| d.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.get("id").and_then(|id| id.as_str()))
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
        let url = format!("{}/chat/completions", self.base_url);
        let payload = json!({
            "model": self.model,
            "messages": build_messages(system_prompt, history, user_name, message),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let body = send_json(self.client()?.post(&url).json(&payload), self.timeout).await?;
        if let Some(err) = embedded_error(&body) {
            return Err(BotError::chat(err));
        }
        text_at(&body, "/choices/0/message/content")
            .map(|s| s.trim().to_string())
            .ok_or_else(|| BotError::chat("response has no choices[0].message.content"))
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&mut self) -> Result<(), BotError> {
        let key = self.args.require_api_key()?;
        self.client = Some(build_client(&self.headers(&key))?);
        // Only an unreachable endpoint fails init; some gateways don't serve /models.
        match self.list_models().await {
            Ok(_) => Ok(()),
            Err(BotError::Connection(e)) => {
                self.client = None;
                Err(BotError::connection(format!(
                    "{} at {} unreachable: {}",
                    self.name, self.base_url, e
                )))
            }
            Err(e) => {
                warn!("{}: model listing failed during init: {}", self.name, e);
                Ok(())
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
        debug!("{} chat model={} history={}", self.name, self.model, history.len());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_follow_registry_name() {
        let args = BackendArgs::new("deepseek", toml::Table::new());
        let b = OpenAiCompatBackend::from_args(&args).unwrap();
        assert_eq!(b.model, "deepseek-chat");
        assert_eq!(b.base_url, "https://api.deepseek.com/v1");
    }

    #[test]
    fn openrouter_sends_attribution_headers() {
        let table: toml::Table = toml::from_str("site_url = \"https://example.org\"\n").unwrap();
        let b = OpenAiCompatBackend::from_args(&BackendArgs::new("openrouter", table)).unwrap();
        let headers = b.headers("k");
        assert!(headers.iter().any(|(k, v)| k == "HTTP-Referer" && v == "https://example.org"));
        assert!(headers.iter().any(|(k, v)| k == "X-Title" && v == "MeshBot"));
        assert_eq!(headers[0].1, "Bearer k");
    }

    #[tokio::test]
    async fn init_without_key_is_config_error() {
        let table: toml::Table =
            toml::from_str("api_key_env = \"MESHBOT_TEST_NO_SUCH_KEY\"\n").unwrap();
        let mut b = OpenAiCompatBackend::from_args(&BackendArgs::new("openai", table)).unwrap();
        assert!(matches!(b.init().await, Err(BotError::Config(_))));
        b.close().await;
    }
}
