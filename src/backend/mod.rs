//! # Chat backends
//!
//! Every AI provider sits behind [`ChatBackend`], a four-call contract:
//! `init`, `chat`, `close` and the optional `get_models`. The relay never talks
//! to a provider directly; it goes through [`router::BackendRouter`], which
//! resolves the configured platform key with a [`router::BackendRegistry`].
//!
//! `chat` is infallible by signature. Timeouts, HTTP error statuses, malformed
//! bodies and rate limits come back as a failed [`ChatResult`].

use crate::error::BotError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod args;
pub mod claude;
pub mod fastapi;
pub mod gemini;
pub mod http;
pub mod ollama;
pub mod openai;
pub mod router;
pub mod websocket;

pub use args::BackendArgs;
pub use router::{BackendFactory, BackendRegistry, BackendRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Content of the user turn sent for a new message, `"<name>:<text>"`.
pub fn user_turn_content(user_name: &str, message: &str) -> String {
    format!("{}:{}", user_name, message)
}

/// Outcome of one `chat` call.
///
/// Built only through [`ChatResult::ok`] and [`ChatResult::failed`], so a
/// success always carries a reply and a failure always carries a non-empty error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResult {
    success: bool,
    response: String,
    error: String,
}

impl ChatResult {
    pub fn ok(response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: response.into(),
            error: String::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown backend error".to_string();
        }
        Self {
            success: false,
            response: String::new(),
            error,
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn error(&self) -> &str {
        &self.error
    }
}

impl From<Result<String, BotError>> for ChatResult {
    fn from(r: Result<String, BotError>) -> Self {
        match r {
            Ok(text) if text.trim().is_empty() => ChatResult::failed("empty response from backend"),
            Ok(text) => ChatResult::ok(text),
            Err(e) => ChatResult::failed(e.to_string()),
        }
    }
}

/// Uniform contract implemented by every provider adapter.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Registry name of this backend, used in logs.
    fn name(&self) -> &str;

    /// Establish any session the provider needs. Unreachable or misconfigured
    /// endpoints fail with [`BotError::Connection`] or [`BotError::Config`].
    async fn init(&mut self) -> Result<(), BotError>;

    /// Ask the provider for a reply. `history` holds prior turns only; the new
    /// user turn is built from `user_name` and `message`.
    async fn chat(
        &mut self,
        user_name: &str,
        message: &str,
        system_prompt: &str,
        history: &[Turn],
    ) -> ChatResult;

    /// Release held resources. Idempotent and safe before a successful `init`.
    async fn close(&mut self);

    /// Available model identifiers, when the provider can list them.
    async fn get_models(&mut self) -> Result<Vec<String>, BotError> {
        Ok(Vec::new())
    }
}

/// Chat-completions style message list: system prompt, history, then the new user turn.
pub fn build_messages(
    system_prompt: &str,
    history: &[Turn],
    user_name: &str,
    message: &str,
) -> Vec<serde_json::Value> {
    let mut out = Vec::with_capacity(history.len() + 2);
    if !system_prompt.is_empty() {
        out.push(serde_json::json!({"role": "system", "content": system_prompt}));
    }
    for turn in history {
        out.push(serde_json::json!({"role": turn.role.as_str(), "content": turn.content}));
    }
    out.push(serde_json::json!({"role": "user", "content": user_turn_content(user_name, message)}));
    out
}

/// History plus the new user turn with consecutive same-role turns merged.
///
/// Providers that require strictly alternating roles (Claude, Gemini) need this
/// when a failed exchange left two user turns in a row. A leading assistant turn
/// is dropped.
pub fn alternating_turns(history: &[Turn], user_name: &str, message: &str) -> Vec<Turn> {
    let mut out: Vec<Turn> = Vec::with_capacity(history.len() + 1);
    let incoming = Turn::user(user_turn_content(user_name, message));
    for turn in history.iter().chain(std::iter::once(&incoming)) {
        match out.last_mut() {
            Some(last) if last.role == turn.role => {
                last.content.push('\n');
                last.content.push_str(&turn.content);
            }
            None if turn.role == Role::Assistant => {}
            _ => out.push(turn.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_result_never_has_empty_error() {
        let r = ChatResult::failed("");
        assert!(!r.success());
        assert!(!r.error().is_empty());
    }

    #[test]
    fn empty_reply_is_a_failure() {
        let r: ChatResult = Ok::<_, BotError>("   ".to_string()).into();
        assert!(!r.success());
        assert!(r.error().contains("empty"));
    }

    #[test]
    fn messages_put_system_first_and_user_last() {
        let history = vec![Turn::user("Alice:hi"), Turn::assistant("hello")];
        let msgs = build_messages("be brief", &history, "Alice", "weather?");
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[2]["role"], "assistant");
        assert_eq!(msgs[3]["content"], "Alice:weather?");
    }

    #[test]
    fn alternating_turns_merges_and_trims() {
        let history = vec![
            Turn::assistant("orphan"),
            Turn::user("Bob:one"),
            Turn::user("Bob:two"),
            Turn::assistant("ok"),
        ];
        let turns = alternating_turns(&history, "Bob", "three");
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0], Turn::user("Bob:one\nBob:two"));
        assert_eq!(turns[1], Turn::assistant("ok"));
        assert_eq!(turns[2], Turn::user("Bob:three"));
    }
}
