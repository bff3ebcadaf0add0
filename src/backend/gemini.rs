//! Google Gemini `generateContent`.
use super::http::{build_client, embedded_error, send_json};
use super::{alternating_turns, BackendArgs, ChatBackend, ChatResult, Role, Turn};
use crate::error::BotError;
use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};
use std::time::Duration;

const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiBackend {
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u64,
    timeout: Duration,
    args: BackendArgs,
    api_key: Option<String>,
    client: Option<reqwest::Client>,
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

impl GeminiBackend {
    pub fn from_args(args: &BackendArgs) -> Result<Self, BotError> {
        Ok(Self {
            base_url: args.base_url("https://generativelanguage.googleapis.com/v1beta"),
            model: args.str_or("model", "gemini-pro"),
            temperature: args.f64_or("temperature", 0.7),
            max_tokens: args.u64_or("max_tokens", 512),
            timeout: args.timeout(60),
            args: args.clone(),
            api_key: None,
            client: None,
        })
    }

    fn session(&self) -> Result<(&reqwest::Client, &str), BotError> {
        match (&self.client, &self.api_key) {
            (Some(c), Some(k)) => Ok((c, k.as_str())),
            _ => Err(BotError::connection("gemini backend is not initialised")),
        }
    }

    /// The system prompt goes in as a leading user turn acknowledged by the model.
    fn contents(&self, user_name: &str, message: &str, system_prompt: &str, history: &[Turn]) -> Vec<Value> {
        let mut contents = Vec::new();
        if !system_prompt.is_empty() {
            contents.push(json!({"role": "user", "parts": [{"text": system_prompt}]}));
            contents.push(json!({"role": "model", "parts": [{"text": "OK"}]}));
        }
        for turn in alternating_turns(history, user_name, message) {
            contents.push(json!({"role": gemini_role(turn.role), "parts": [{"text": turn.content}]}));
        }
        contents
    }

    async fn request(
        &self,
        user_name: &str,
        message: &str,
        system_prompt: &str,
        history: &[Turn],
    ) -> Result<String, BotError> {
        let (client, key) = self.session()?;
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let payload = json!({
            "contents": self.contents(user_name, message, system_prompt, history),
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_tokens,
            }
        });
        let request = client.post(&url).header(API_KEY_HEADER, key).json(&payload);
        let body = send_json(request, self.timeout).await?;
        if let Some(err) = embedded_error(&body) {
            return Err(BotError::chat(err));
        }
        if let Some(reason) = body
            .pointer("/promptFeedback/blockReason")
            .and_then(|r| r.as_str())
        {
            return Err(BotError::chat(format!("prompt blocked: {}", reason)));
        }
        let parts = body
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .ok_or_else(|| BotError::chat("response has no candidates[0].content.parts"))?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn init(&mut self) -> Result<(), BotError> {
        self.api_key = Some(self.args.require_api_key()?);
        self.client = Some(build_client(&self.args.headers())?);
        Ok(())
    }

    async fn chat(
        &mut self,
        user_name: &str,
        message: &str,
        system_prompt: &str,
        history: &[Turn],
    ) -> ChatResult {
        debug!("gemini chat model={} history={}", self.model, history.len());
        self.request(user_name, message, system_prompt, history)
            .await
            .into()
    }

    async fn close(&mut self) {
        self.client = None;
        self.api_key = None;
    }

    async fn get_models(&mut self) -> Result<Vec<String>, BotError> {
        let (client, key) = self.session()?;
        let url = format!("{}/models", self.base_url);
        let body = send_json(client.get(&url).header(API_KEY_HEADER, key), self.timeout).await?;
        Ok(body
            .get("models")
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter(|m| {
                        m.get("supportedGenerationMethods")
                            .and_then(|s| s.as_array())
                            .map(|methods| methods.iter().any(|x| x == "generateContent"))
                            .unwrap_or(false)
                    })
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(|n| n.trim_start_matches("models/").to_string())
                    .collect()
            })
            .unwrap_or_default())
    }
}
