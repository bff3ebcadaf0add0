//! # MeshBot
//!
//! Wires the pieces together: configuration, the backend router, the node
//! directory, the ingestion queue, the optional radio link and the dispatch loop.
//!
//! ```rust,no_run
//! use meshbot::config::Config;
//! use meshbot::relay::MeshBot;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut bot = MeshBot::new(config).await?;
//!     bot.connect_device("/dev/ttyUSB0").await?;
//!     bot.run().await?;
//!     Ok(())
//! }
//! ```
use super::dispatch::{DispatchLoop, DispatchSummary, RelayCore, RelaySettings};
use super::history::ConversationManager;
use super::listener::{Listener, NodeIdentity};
use super::queue::{ingestion_queue, QueueReceiver, QueueSender};
use super::sender::{DisconnectedSender, TextSender};
use crate::backend::{BackendRegistry, BackendRouter};
use crate::config::Config;
use crate::meshtastic::NodeDirectory;
use crate::metrics;
use anyhow::{anyhow, Result};
use log::{info, warn};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

pub struct MeshBot {
    config: Config,
    directory: Arc<NodeDirectory>,
    queue_tx: QueueSender,
    queue_rx: QueueReceiver,
    router: BackendRouter,
    sender: Arc<dyn TextSender>,
    #[cfg(all(feature = "serial", feature = "meshtastic-proto"))]
    radio: Option<crate::meshtastic::RadioLink>,
}

impl MeshBot {
    /// Validate the configuration and bring up the configured backend.
    ///
    /// Fails on invalid configuration or an unknown platform. A backend that is
    /// known but unreachable is only logged; the first message retries it.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let router = BackendRouter::start(
            BackendRegistry::with_builtin(),
            &config.bot.platform,
            config.backend_args(&config.bot.platform),
        )
        .await?;
        Ok(Self::with_router(config, router))
    }

    /// Assemble around an already started router, e.g. one built from a custom registry.
    pub fn with_router(config: Config, router: BackendRouter) -> Self {
        let cache = config.meshtastic.node_cache_file.trim();
        let directory = if cache.is_empty() {
            NodeDirectory::new(None)
        } else {
            NodeDirectory::load(PathBuf::from(cache))
        };
        let (queue_tx, queue_rx) = ingestion_queue();
        Self {
            config,
            directory: Arc::new(directory),
            queue_tx,
            queue_rx,
            router,
            sender: Arc::new(DisconnectedSender),
            #[cfg(all(feature = "serial", feature = "meshtastic-proto"))]
            radio: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn directory(&self) -> Arc<NodeDirectory> {
        self.directory.clone()
    }

    /// A filter feeding this bot's queue, identifying us through the node directory.
    pub fn listener(&self) -> Listener {
        let identity: Arc<dyn NodeIdentity> = self.directory.clone();
        Listener::new(identity, self.queue_tx.clone())
    }

    /// A listener with a caller supplied identity (tests, alternative radios).
    pub fn listener_with(&self, identity: Arc<dyn NodeIdentity>) -> Listener {
        Listener::new(identity, self.queue_tx.clone())
    }

    /// Route replies through `sender` instead of the radio.
    pub fn set_sender(&mut self, sender: Arc<dyn TextSender>) {
        self.sender = sender;
    }

    /// Open the radio on `port` and start its reader and writer tasks.
    #[cfg(all(feature = "serial", feature = "meshtastic-proto"))]
    pub async fn connect_device(&mut self, port: &str) -> Result<()> {
        use super::sender::RadioSender;
        use crate::meshtastic::{connect_radio, WriterTuning};

        let mcfg = &self.config.meshtastic;
        let link = connect_radio(
            port,
            mcfg.baud_rate,
            WriterTuning::from(mcfg),
            self.directory.clone(),
            self.listener(),
        )
        .await?;
        self.sender = Arc::new(RadioSender::new(link.outgoing(), mcfg.channel));
        self.radio = Some(link);
        Ok(())
    }

    #[cfg(not(all(feature = "serial", feature = "meshtastic-proto")))]
    pub async fn connect_device(&mut self, port: &str) -> Result<()> {
        Err(anyhow!(
            "cannot open {}: built without the 'serial' and 'meshtastic-proto' features",
            port
        ))
    }

    /// Run until Ctrl-C, then drain the in-flight message and stop.
    pub async fn run(self) -> Result<DispatchSummary> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
        })
        .await
    }

    /// Run until `stop` completes or every listener is gone.
    pub async fn run_until<F>(self, stop: F) -> Result<DispatchSummary>
    where
        F: Future<Output = ()>,
    {
        let MeshBot {
            config,
            directory,
            queue_tx,
            queue_rx,
            router,
            sender,
            #[cfg(all(feature = "serial", feature = "meshtastic-proto"))]
            radio,
        } = self;
        // Only listeners handed out earlier keep the queue open now.
        drop(queue_tx);

        info!(
            "meshbot relaying DMs to '{}' (history {} exchanges, chunk {} bytes)",
            router.platform(),
            config.bot.history_exchanges,
            config.bot.max_response_length
        );
        let core = RelayCore::new(
            router,
            ConversationManager::new(config.bot.history_exchanges),
            sender,
            RelaySettings::from(&config.bot),
        );
        let (dispatch, handle) = DispatchLoop::new(
            queue_rx,
            core,
            config.bot.queue_timeout(),
            config.bot.shutdown_grace(),
        );
        let mut task = tokio::spawn(dispatch.run());

        tokio::pin!(stop);
        let joined = tokio::select! {
            r = &mut task => r,
            _ = &mut stop => {
                handle.shutdown();
                (&mut task).await
            }
        };
        let summary = joined.map_err(|e| anyhow!("dispatch loop failed: {}", e))?;

        #[cfg(all(feature = "serial", feature = "meshtastic-proto"))]
        if let Some(link) = radio {
            link.shutdown().await;
        }
        if let Err(e) = directory.save() {
            warn!("Failed to save node cache: {}", e);
        }
        info!(
            "meshbot stopped: {} processed, {} left in queue{}",
            summary.processed,
            summary.left_in_queue,
            if summary.abandoned { ", in-flight message abandoned" } else { "" }
        );
        info!("{}", metrics::snapshot());
        Ok(summary)
    }
}
