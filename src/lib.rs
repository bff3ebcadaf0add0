//! # meshbot - AI chat relay for Meshtastic networks
//!
//! meshbot listens for direct messages on a Meshtastic radio, forwards each one
//! to a configurable AI chat backend with a short per-sender conversation
//! history, and sends the reply back in radio-sized chunks.
//!
//! ## Quick Start
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
//!
//! ## Module Organization
//!
//! - [`relay`] - listener, ingestion queue, dispatch loop, history, chunking
//! - [`backend`] - the chat backend contract, registry/router and adapters
//! - [`meshtastic`] - serial device link and node name cache
//! - [`config`] - TOML configuration and validation
//! - [`error`] - error taxonomy shared by every layer
//! - [`protobuf`] - generated Meshtastic protobuf types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Meshtastic    │ ← serial reader / writer tasks
//! └─────────────────┘
//!          │ TextEvent            ▲ OutgoingMessage
//! ┌─────────────────┐    ┌─────────────────┐
//! │ Listener+Queue  │───→│  Dispatch Loop  │ ← one message at a time
//! └─────────────────┘    └─────────────────┘
//!                                 │
//!                        ┌─────────────────┐
//!                        │ Backend Router  │ ← ollama, openai, claude, ...
//!                        └─────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod logutil;
pub mod meshtastic;
pub mod metrics;
pub mod protobuf;
pub mod relay;

pub use error::BotError;
