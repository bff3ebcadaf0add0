//! Platform key → backend resolution and backend lifecycle.
use super::claude::ClaudeBackend;
use super::fastapi::HttpBridgeBackend;
use super::gemini::GeminiBackend;
use super::ollama::OllamaBackend;
use super::openai::OpenAiCompatBackend;
use super::websocket::WebSocketBackend;
use super::{BackendArgs, ChatBackend, ChatResult, Turn};
use crate::error::BotError;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type BackendFactory =
    Arc<dyn Fn(&BackendArgs) -> Result<Box<dyn ChatBackend>, BotError> + Send + Sync>;

/// Table of backend factories, populated at startup.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every adapter shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut r = Self::new();
        r.register("ollama", |a| Ok(Box::new(OllamaBackend::from_args(a)?)));
        for name in ["openai", "deepseek", "openrouter", "siliconflow"] {
            r.register(name, |a| Ok(Box::new(OpenAiCompatBackend::from_args(a)?)));
        }
        r.register("claude", |a| Ok(Box::new(ClaudeBackend::from_args(a)?)));
        r.register("gemini", |a| Ok(Box::new(GeminiBackend::from_args(a)?)));
        r.register("fastapi", |a| Ok(Box::new(HttpBridgeBackend::from_args(a)?)));
        r.register("websockets", |a| Ok(Box::new(WebSocketBackend::from_args(a)?)));
        r
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&BackendArgs) -> Result<Box<dyn ChatBackend>, BotError> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build (but do not init) the backend registered under `name`.
    pub fn build(&self, name: &str, args: toml::Table) -> Result<Box<dyn ChatBackend>, BotError> {
        let factory = self.factories.get(name).ok_or_else(|| {
            BotError::config(format!(
                "unknown platform '{}' (available: {})",
                name,
                self.names().join(", ")
            ))
        })?;
        factory(&BackendArgs::new(name, args))
    }
}

/// Owns the single live backend.
///
/// A backend whose `init` could not connect stays installed; the next `chat` retries `init`
/// and reports a connection failure if it still cannot connect.
pub struct BackendRouter {
    registry: BackendRegistry,
    platform: String,
    active: Option<Box<dyn ChatBackend>>,
    ready: bool,
}

impl BackendRouter {
    /// Resolve `platform` and initialise it. An unknown platform or a
    /// configuration error from `init` is returned; any other `init` failure
    /// is logged and retried on the next `chat`.
    pub async fn start(
        registry: BackendRegistry,
        platform: &str,
        args: toml::Table,
    ) -> Result<Self, BotError> {
        let backend = registry.build(platform, args)?;
        let mut router = Self {
            registry,
            platform: platform.to_string(),
            active: Some(backend),
            ready: false,
        };
        if let Err(e) = router.ensure_ready().await {
            if e.is_fatal() {
                router.close().await;
                return Err(e);
            }
            warn!("Backend '{}' init failed: {} (will retry on first message)", platform, e);
        }
        Ok(router)
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_closed(&self) -> bool {
        self.active.is_none()
    }

    async fn ensure_ready(&mut self) -> Result<(), BotError> {
        if self.ready {
            return Ok(());
        }
        let backend = self
            .active
            .as_mut()
            .ok_or_else(|| BotError::connection("backend router is closed"))?;
        backend.init().await?;
        self.ready = true;
        info!("Backend '{}' initialised", self.platform);
        match backend.get_models().await {
            Ok(models) if !models.is_empty() => {
                info!("Backend '{}' models: {}", self.platform, models.join(", "))
            }
            Ok(_) => debug!("Backend '{}' returned no model list", self.platform),
            Err(e) => debug!("Backend '{}' model listing failed: {}", self.platform, e),
        }
        Ok(())
    }

    pub async fn chat(
        &mut self,
        user_name: &str,
        message: &str,
        system_prompt: &str,
        history: &[Turn],
    ) -> ChatResult {
        if let Err(e) = self.ensure_ready().await {
            return ChatResult::failed(e.to_string());
        }
        match self.active.as_mut() {
            Some(backend) => backend.chat(user_name, message, system_prompt, history).await,
            None => ChatResult::failed("backend router is closed"),
        }
    }

    /// Models of the live backend; failures and absence yield an empty list.
    pub async fn get_models(&mut self) -> Vec<String> {
        if self.ensure_ready().await.is_err() {
            return Vec::new();
        }
        match self.active.as_mut() {
            Some(backend) => backend.get_models().await.unwrap_or_else(|e| {
                debug!("get_models failed: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    /// Replace the live backend. The replacement is built and initialised first;
    /// on failure the current backend stays in place.
    pub async fn switch(&mut self, platform: &str, args: toml::Table) -> Result<(), BotError> {
        let mut next = self.registry.build(platform, args)?;
        if let Err(e) = next.init().await {
            next.close().await;
            return Err(e);
        }
        if let Some(mut old) = self.active.take() {
            old.close().await;
        }
        info!("Switched backend '{}' -> '{}'", self.platform, platform);
        self.platform = platform.to_string();
        self.active = Some(next);
        self.ready = true;
        Ok(())
    }

    /// Close the live backend. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut backend) = self.active.take() {
            backend.close().await;
            info!("Backend '{}' closed", self.platform);
        }
        self.ready = false;
    }
}

impl Drop for BackendRouter {
    fn drop(&mut self) {
        if let Some(mut backend) = self.active.take() {
            warn!("Backend '{}' dropped without close; closing in background", self.platform);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { backend.close().await });
            }
        }
    }
}
