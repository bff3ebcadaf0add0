//! Typed access to the opaque `[backends.<name>]` table.
use crate::error::BotError;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct BackendArgs {
    name: String,
    table: toml::Table,
}

impl BackendArgs {
    pub fn new(name: impl Into<String>, table: toml::Table) -> Self {
        Self {
            name: name.into(),
            table,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &toml::Table {
        &self.table
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.table.get(key).and_then(|v| v.as_str())
    }

    pub fn str_or(&self, key: &str, default: &str) -> String {
        self.str(key).unwrap_or(default).to_string()
    }

    /// Required string; missing or empty is a configuration error.
    pub fn require_str(&self, key: &str) -> Result<String, BotError> {
        match self.str(key) {
            Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
            _ => Err(BotError::config(format!(
                "backends.{}.{} is required",
                self.name, key
            ))),
        }
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        match self.table.get(key) {
            Some(toml::Value::Float(f)) => *f,
            Some(toml::Value::Integer(i)) => *i as f64,
            _ => default,
        }
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.table
            .get(key)
            .and_then(|v| v.as_integer())
            .and_then(|i| u64::try_from(i).ok())
            .unwrap_or(default)
    }

    pub fn timeout(&self, default_secs: u64) -> Duration {
        Duration::from_secs(self.u64_or("timeout_secs", default_secs).max(1))
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self, default: &str) -> String {
        self.str_or("base_url", default).trim_end_matches('/').to_string()
    }

    /// `api_key` if present, else the environment variable named by `api_key_env`.
    pub fn api_key(&self) -> Option<String> {
        if let Some(k) = self.str("api_key").filter(|k| !k.is_empty()) {
            return Some(k.to_string());
        }
        self.str("api_key_env")
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }

    pub fn require_api_key(&self) -> Result<String, BotError> {
        self.api_key().ok_or_else(|| {
            let hint = self.str("api_key_env").unwrap_or("api_key_env");
            BotError::config(format!(
                "backends.{}: no api_key configured and {} is not set",
                self.name, hint
            ))
        })
    }

    /// Extra HTTP headers from an optional `[backends.<name>.headers]` table.
    pub fn headers(&self) -> Vec<(String, String)> {
        self.table
            .get("headers")
            .and_then(|v| v.as_table())
            .map(|t| {
                t.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(src: &str) -> BackendArgs {
        BackendArgs::new("test", toml::from_str(src).unwrap())
    }

    #[test]
    fn numeric_getters_accept_ints_for_floats() {
        let a = args("temperature = 1\nmax_tokens = 64\n");
        assert_eq!(a.f64_or("temperature", 0.5), 1.0);
        assert_eq!(a.u64_or("max_tokens", 10), 64);
        assert_eq!(a.u64_or("missing", 10), 10);
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        let a = args("base_url = \"http://host:1/\"\n");
        assert_eq!(a.base_url("x"), "http://host:1");
    }

    #[test]
    fn literal_api_key_wins_over_env() {
        let a = args("api_key = \"k1\"\napi_key_env = \"MESHBOT_TEST_UNSET_VAR\"\n");
        assert_eq!(a.api_key().as_deref(), Some("k1"));
    }

    #[test]
    fn missing_key_is_config_error() {
        let a = args("api_key_env = \"MESHBOT_TEST_DEFINITELY_UNSET\"\n");
        assert!(matches!(a.require_api_key(), Err(BotError::Config(_))));
        assert!(matches!(a.require_str("model"), Err(BotError::Config(_))));
    }

    #[test]
    fn headers_table_is_flattened() {
        let a = args("[headers]\nX-One = \"1\"\n");
        assert_eq!(a.headers(), vec![("X-One".to_string(), "1".to_string())]);
    }
}
