//! # Configuration
//!
//! TOML configuration for the relay. Every section and field has a default, so a
//! partial file (or an empty one) loads cleanly.
//!
//! ```toml
//! [bot]
//! platform = "ollama"
//! max_response_length = 200
//! message_queue_timeout = 1.0
//!
//! [meshtastic]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [backends.ollama]
//! base_url = "http://127.0.0.1:11434"
//! model = "qwen2.5:7b"
//! ```
//!
//! `[backends.<name>]` tables are opaque to the relay: they are handed to the
//! backend factory registered under `<name>`. Keys given in the file override the
//! built-in defaults for that backend key by key.

use crate::error::BotError;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::fs;

pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一个助手,请用简洁的语言(小于200字符)回复。";

/// Names of the adapters compiled into the binary, in the order `init` writes them.
pub const BUILTIN_BACKENDS: &[&str] = &[
    "ollama",
    "openai",
    "deepseek",
    "openrouter",
    "siliconflow",
    "claude",
    "gemini",
    "fastapi",
    "websockets",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Registry key of the active backend.
    pub platform: String,
    pub system_prompt: String,
    /// Largest radio payload per chunk, in bytes.
    pub max_response_length: usize,
    /// Seconds the dispatch loop waits on the queue before re-checking for shutdown.
    pub message_queue_timeout: f64,
    /// Conversation exchanges (user + assistant) kept per sender.
    pub history_exchanges: usize,
    pub failure_notice_prefix: String,
    pub unexpected_notice: String,
    /// Seconds an in-flight message may keep running after shutdown is requested.
    pub shutdown_grace_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            platform: "ollama".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_response_length: 200,
            message_queue_timeout: 1.0,
            history_exchanges: 10,
            failure_notice_prefix: "❌ 处理失败: ".to_string(),
            unexpected_notice: "❌ 处理异常，请稍后重试".to_string(),
            shutdown_grace_secs: 30,
        }
    }
}

impl BotConfig {
    /// Falls back to one second for values `validate` would reject.
    pub fn queue_timeout(&self) -> Duration {
        match Duration::try_from_secs_f64(self.message_queue_timeout) {
            Ok(d) if !d.is_zero() => d,
            _ => Duration::from_secs(1),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshtasticConfig {
    /// Serial device path; empty means "not configured".
    pub port: String,
    pub baud_rate: u32,
    /// Channel index used for outgoing direct messages.
    pub channel: u32,
    /// Minimum gap between consecutive radio sends (ms).
    pub min_send_gap_ms: u64,
    pub node_cache_file: String,
    /// Refuse to start when the radio cannot be opened.
    pub require_device_at_startup: bool,
}

impl Default for MeshtasticConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115200,
            channel: 0,
            min_send_gap_ms: 2000,
            node_cache_file: "data/node_cache.json".to_string(),
            require_device_at_startup: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Per-backend construction arguments, keyed by registry name.
    #[serde(default)]
    pub backends: BTreeMap<String, toml::Table>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;
        Self::from_toml_str(&content).map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Write a default configuration, including a section for every built-in backend.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::with_backend_defaults();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Default config with every built-in backend table filled in.
    pub fn with_backend_defaults() -> Self {
        let mut config = Config::default();
        for name in BUILTIN_BACKENDS {
            config
                .backends
                .insert((*name).to_string(), backend_defaults(name));
        }
        config
    }

    /// Construction arguments for `name`: built-in defaults overlaid with the file's table.
    pub fn backend_args(&self, name: &str) -> toml::Table {
        let mut args = backend_defaults(name);
        if let Some(user) = self.backends.get(name) {
            for (k, v) in user {
                args.insert(k.clone(), v.clone());
            }
        }
        args
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> std::result::Result<(), BotError> {
        if self.bot.platform.trim().is_empty() {
            return Err(BotError::config("bot.platform must not be empty"));
        }
        if self.bot.max_response_length == 0 {
            return Err(BotError::config("bot.max_response_length must be positive"));
        }
        let t = self.bot.message_queue_timeout;
        if t <= 0.0 || Duration::try_from_secs_f64(t).is_err() {
            return Err(BotError::config(format!(
                "bot.message_queue_timeout must be a positive number of seconds (got {})",
                t
            )));
        }
        if self.bot.history_exchanges == 0 {
            return Err(BotError::config("bot.history_exchanges must be at least 1"));
        }
        Ok(())
    }
}

fn table(entries: &[(&str, toml::Value)]) -> toml::Table {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn s(v: &str) -> toml::Value {
    toml::Value::String(v.to_string())
}

/// Built-in defaults for a backend. Unknown names get an empty table.
pub fn backend_defaults(name: &str) -> toml::Table {
    use toml::Value::{Float, Integer};
    match name {
        "ollama" => table(&[
            ("base_url", s("http://127.0.0.1:11434")),
            ("model", s("qwen2.5:7b")),
            ("temperature", Float(0.7)),
            ("max_tokens", Integer(512)),
            ("timeout_secs", Integer(60)),
        ]),
        "openai" => table(&[
            ("base_url", s("https://api.openai.com/v1")),
            ("model", s("gpt-3.5-turbo")),
            ("api_key_env", s("OPENAI_API_KEY")),
            ("temperature", Float(0.7)),
            ("max_tokens", Integer(512)),
            ("timeout_secs", Integer(60)),
        ]),
        "deepseek" => table(&[
            ("base_url", s("https://api.deepseek.com/v1")),
            ("model", s("deepseek-chat")),
            ("api_key_env", s("DEEPSEEK_API_KEY")),
            ("temperature", Float(0.7)),
            ("max_tokens", Integer(512)),
            ("timeout_secs", Integer(60)),
        ]),
        "openrouter" => table(&[
            ("base_url", s("https://openrouter.ai/api/v1")),
            ("model", s("google/gemini-2.0-flash-exp:free")),
            ("api_key_env", s("OPENROUTER_API_KEY")),
            ("app_name", s("MeshBot")),
            ("site_url", s("https://github.com/meshtastic")),
            ("temperature", Float(0.7)),
            ("max_tokens", Integer(512)),
            ("timeout_secs", Integer(60)),
        ]),
        "siliconflow" => table(&[
            ("base_url", s("https://api.siliconflow.cn/v1")),
            ("model", s("deepseek-ai/DeepSeek-V2-Chat")),
            ("api_key_env", s("SILICONFLOW_API_KEY")),
            ("temperature", Float(0.7)),
            ("max_tokens", Integer(512)),
            ("timeout_secs", Integer(60)),
        ]),
        "claude" => table(&[
            ("base_url", s("https://api.anthropic.com")),
            ("model", s("claude-3-sonnet-20240229")),
            ("api_key_env", s("ANTHROPIC_API_KEY")),
            ("temperature", Float(0.7)),
            ("max_tokens", Integer(1024)),
            ("timeout_secs", Integer(60)),
        ]),
        "gemini" => table(&[
            ("base_url", s("https://generativelanguage.googleapis.com/v1beta")),
            ("model", s("gemini-pro")),
            ("api_key_env", s("GEMINI_API_KEY")),
            ("temperature", Float(0.7)),
            ("max_tokens", Integer(512)),
            ("timeout_secs", Integer(60)),
        ]),
        "fastapi" => table(&[
            ("base_url", s("http://127.0.0.1:8000")),
            ("temperature", Float(0.7)),
            ("max_tokens", Integer(512)),
            ("timeout_secs", Integer(60)),
        ]),
        "websockets" => table(&[
            ("uri", s("ws://localhost:9238")),
            ("timeout_secs", Integer(30)),
            ("max_reconnect_attempts", Integer(5)),
        ]),
        _ => toml::Table::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.bot.platform, "ollama");
        assert_eq!(cfg.bot.max_response_length, 200);
        assert_eq!(cfg.bot.history_exchanges, 10);
        assert_eq!(cfg.bot.queue_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.meshtastic.baud_rate, 115200);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg = Config::from_toml_str("[bot]\nplatform = \"claude\"\n").unwrap();
        assert_eq!(cfg.bot.platform, "claude");
        assert_eq!(cfg.bot.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn backend_args_overlay_user_keys() {
        let cfg = Config::from_toml_str(
            "[backends.ollama]\nmodel = \"llama3\"\nextra = 1\n",
        )
        .unwrap();
        let args = cfg.backend_args("ollama");
        assert_eq!(args.get("model").and_then(|v| v.as_str()), Some("llama3"));
        assert_eq!(
            args.get("base_url").and_then(|v| v.as_str()),
            Some("http://127.0.0.1:11434")
        );
        assert_eq!(args.get("extra").and_then(|v| v.as_integer()), Some(1));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.bot.max_response_length = 0;
        assert!(matches!(cfg.validate(), Err(BotError::Config(_))));

        let mut cfg = Config::default();
        cfg.bot.message_queue_timeout = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.bot.message_queue_timeout = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.bot.message_queue_timeout = 1e20;
        assert!(matches!(cfg.validate(), Err(BotError::Config(_))));
        assert_eq!(cfg.bot.queue_timeout(), Duration::from_secs(1));

        let mut cfg = Config::default();
        cfg.bot.platform = "  ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = Config::with_backend_defaults();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let back = Config::from_toml_str(&text).unwrap();
        assert_eq!(back.backends.len(), BUILTIN_BACKENDS.len());
        assert_eq!(back.bot.max_response_length, cfg.bot.max_response_length);
    }

    #[tokio::test]
    async fn create_default_writes_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let cfg = Config::load(path).await.unwrap();
        assert!(cfg.backends.contains_key("websockets"));
    }
}
