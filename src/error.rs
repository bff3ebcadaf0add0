//! Error taxonomy for the relay.
//!
//! Only [`BotError::Config`] is fatal. Every other variant is recovered per
//! message by the dispatch loop and surfaced to the requester as a short notice.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotError {
    /// Unknown or misconfigured platform key, invalid settings. Refuses startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Backend unreachable at init or mid-call.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed, empty, or rate-limited provider response.
    #[error("chat error: {0}")]
    Chat(String),

    /// Outbound radio send failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Anything else raised while handling a single message (including panics).
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl BotError {
    pub fn config(msg: impl Into<String>) -> Self {
        BotError::Config(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        BotError::Connection(msg.into())
    }

    pub fn chat(msg: impl Into<String>) -> Self {
        BotError::Chat(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        BotError::Transport(msg.into())
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        BotError::Unexpected(msg.into())
    }

    /// True only for errors that must stop the process at startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BotError::Config(_))
    }

    /// The message without the kind prefix, for user-facing notices.
    pub fn detail(&self) -> &str {
        match self {
            BotError::Config(m)
            | BotError::Connection(m)
            | BotError::Chat(m)
            | BotError::Transport(m)
            | BotError::Unexpected(m) => m,
        }
    }

    /// Short label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            BotError::Config(_) => "config",
            BotError::Connection(_) => "connection",
            BotError::Chat(_) => "chat",
            BotError::Transport(_) => "transport",
            BotError::Unexpected(_) => "unexpected",
        }
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        // Request URLs can carry credentials; they never reach a notice or a log.
        let e = e.without_url();
        if e.is_connect() || e.is_timeout() {
            BotError::Connection(e.to_string())
        } else if e.is_decode() {
            BotError::Chat(format!("malformed response: {}", e))
        } else {
            BotError::Chat(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BotError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        BotError::Connection(e.to_string())
    }
}

impl From<serde_json::Error> for BotError {
    fn from(e: serde_json::Error) -> Self {
        BotError::Chat(format!("malformed response: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_config_errors_are_fatal() {
        assert!(BotError::config("unknown platform 'x'").is_fatal());
        assert!(!BotError::connection("refused").is_fatal());
        assert!(!BotError::chat("empty").is_fatal());
        assert!(!BotError::transport("serial gone").is_fatal());
        assert!(!BotError::unexpected("panic").is_fatal());
    }

    #[tokio::test]
    async fn http_errors_do_not_carry_the_request_url() {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = l.local_addr().unwrap();
        drop(l);
        let err = reqwest::Client::new()
            .get(format!("http://{}/v1/models?key=hunter2", addr))
            .send()
            .await
            .unwrap_err();
        let e = BotError::from(err);
        assert_eq!(e.kind(), "connection");
        assert!(!e.to_string().contains("hunter2"), "{}", e);
        assert!(!e.to_string().contains("/v1/models"), "{}", e);
    }

    #[test]
    fn display_includes_kind_prefix() {
        let e = BotError::chat("rate limited");
        assert_eq!(e.to_string(), "chat error: rate limited");
        assert_eq!(e.kind(), "chat");
        assert_eq!(e.detail(), "rate limited");
    }
}
