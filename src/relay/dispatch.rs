//! # Dispatch loop
//!
//! Single consumer of the ingestion queue. Each message is processed end to end
//! (history, backend call, chunking, sending) inside one task that holds the
//! relay lock, so at most one backend `chat` is ever in flight and history has
//! a single writer. The loop awaits that task before pulling the next message.
//!
//! Failures of one message (backend error, panic) are turned into a short notice
//! to the sender; the loop itself only stops on shutdown or when the queue closes.
//! On exit the backend is closed, whatever the exit path.

use super::chunker::chunk_reply;
use super::history::ConversationManager;
use super::message::Message;
use super::queue::{QueueReceiver, Recv};
use super::sender::TextSender;
use crate::backend::BackendRouter;
use crate::config::BotConfig;
use crate::error::BotError;
use crate::logutil::{escape_log, node_label, truncate_for_log};
use crate::metrics;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinError;

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub system_prompt: String,
    pub max_response_length: usize,
    pub failure_notice_prefix: String,
    pub unexpected_notice: String,
}

impl From<&BotConfig> for RelaySettings {
    fn from(cfg: &BotConfig) -> Self {
        Self {
            system_prompt: cfg.system_prompt.clone(),
            max_response_length: cfg.max_response_length,
            failure_notice_prefix: cfg.failure_notice_prefix.clone(),
            unexpected_notice: cfg.unexpected_notice.clone(),
        }
    }
}

/// State shared by every step of message processing, guarded as one unit.
pub struct RelayCore {
    router: BackendRouter,
    history: ConversationManager,
    sender: Arc<dyn TextSender>,
    settings: RelaySettings,
}

impl RelayCore {
    pub fn new(
        router: BackendRouter,
        history: ConversationManager,
        sender: Arc<dyn TextSender>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            router,
            history,
            sender,
            settings,
        }
    }

    pub fn history(&self) -> &ConversationManager {
        &self.history
    }

    pub fn router(&self) -> &BackendRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut BackendRouter {
        &mut self.router
    }

    /// Process one message end to end. A failed backend call is returned as an
    /// error after the user turn is recorded; send failures are only logged.
    pub async fn handle(&mut self, msg: &Message) -> Result<(), BotError> {
        let sender = msg.sender_id;
        self.history
            .push_user(sender, &msg.sender_display_name, &msg.text);
        // Prior turns only; the backend adds the new user turn itself.
        let mut context = self.history.history(sender);
        context.pop();

        let result = self
            .router
            .chat(
                &msg.sender_display_name,
                &msg.text,
                &self.settings.system_prompt,
                &context,
            )
            .await;
        if !result.success() {
            metrics::inc_chat_failed();
            return Err(BotError::chat(result.error()));
        }
        metrics::inc_chat_ok();

        let reply = result.response();
        self.history.push_assistant(sender, reply);

        let chunks = chunk_reply(reply, self.settings.max_response_length);
        info!(
            "Reply to {} ({} bytes, {} chunk(s)): {}",
            node_label(sender),
            reply.len(),
            chunks.len(),
            truncate_for_log(&escape_log(reply), 120)
        );
        self.send_chunks(sender, &chunks).await;
        Ok(())
    }

    async fn send_chunks(&self, to: u32, chunks: &[String]) {
        for (i, chunk) in chunks.iter().enumerate() {
            match self.sender.send_text(to, chunk).await {
                Ok(()) => metrics::inc_chunks_sent(),
                Err(e) => {
                    metrics::inc_send_failures();
                    warn!(
                        "Chunk {}/{} to {} not sent: {}",
                        i + 1,
                        chunks.len(),
                        node_label(to),
                        e
                    );
                }
            }
        }
    }

    /// Send a single-chunk notice, cut to the radio budget.
    pub async fn notify(&self, to: u32, notice: &str) {
        if let Some(first) = chunk_reply(notice, self.settings.max_response_length)
            .into_iter()
            .next()
        {
            self.send_chunks(to, &[first]).await;
        }
    }

    fn notice_for(&self, err: &BotError) -> Option<String> {
        match err {
            BotError::Transport(_) => None,
            BotError::Unexpected(_) => Some(self.settings.unexpected_notice.clone()),
            other => Some(format!(
                "{}{}",
                self.settings.failure_notice_prefix,
                other.detail()
            )),
        }
    }

    pub async fn shutdown(&mut self) {
        self.router.close().await;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Messages taken off the queue.
    pub processed: usize,
    /// Messages still queued when the loop stopped.
    pub left_in_queue: usize,
    /// In-flight message abandoned after the shutdown grace period.
    pub abandoned: bool,
}

/// Requests a graceful stop of the loop. Dropping every handle also stops it.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl DispatchHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct DispatchLoop {
    queue: QueueReceiver,
    core: Arc<Mutex<RelayCore>>,
    shutdown: watch::Receiver<bool>,
    poll: Duration,
    grace: Duration,
}

impl DispatchLoop {
    pub fn new(
        queue: QueueReceiver,
        core: RelayCore,
        poll: Duration,
        grace: Duration,
    ) -> (Self, DispatchHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                queue,
                core: Arc::new(Mutex::new(core)),
                shutdown: rx,
                poll,
                grace,
            },
            DispatchHandle { tx: Arc::new(tx) },
        )
    }

    /// Shared handle to the relay state, e.g. for a platform switch.
    pub fn core(&self) -> Arc<Mutex<RelayCore>> {
        self.core.clone()
    }

    pub async fn run(mut self) -> DispatchSummary {
        info!("Dispatch loop started");
        let mut summary = DispatchSummary::default();
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let msg = tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = self.queue.next(self.poll) => match next {
                    Recv::Message(m) => m,
                    Recv::Timeout => continue,
                    Recv::Closed => {
                        info!("Ingestion queue closed");
                        break;
                    }
                },
            };
            summary.processed += 1;
            if !self.process(msg).await {
                summary.abandoned = true;
                break;
            }
        }

        self.queue.close();
        summary.left_in_queue = self.queue.pending();
        if summary.left_in_queue > 0 {
            info!("Dispatch stopping with {} message(s) unprocessed", summary.left_in_queue);
        }
        self.core.lock().await.shutdown().await;
        info!("Dispatch loop stopped after {} message(s)", summary.processed);
        summary
    }

    /// Run one message under the relay lock. Returns false if it had to be
    /// abandoned because shutdown outlasted the grace period.
    async fn process(&mut self, msg: Message) -> bool {
        let sender = msg.sender_id;
        debug!("Processing message from {}", node_label(sender));
        let core = self.core.clone();
        let mut task = tokio::spawn(async move {
            let mut guard = core.lock().await;
            guard.handle(&msg).await
        });

        let joined = tokio::select! {
            r = &mut task => r,
            _ = shutdown_requested(&mut self.shutdown) => {
                info!(
                    "Shutdown requested; waiting up to {}s for in-flight message",
                    self.grace.as_secs()
                );
                match tokio::time::timeout(self.grace, &mut task).await {
                    Ok(r) => r,
                    Err(_) => {
                        warn!("Abandoning in-flight message from {}", node_label(sender));
                        task.abort();
                        let _ = task.await;
                        return false;
                    }
                }
            }
        };

        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.report_failure(sender, e).await,
            Err(join_err) => {
                let e = unexpected_from_join(join_err);
                metrics::inc_unexpected_failures();
                self.report_failure(sender, e).await;
            }
        }
        true
    }

    async fn report_failure(&self, sender: u32, err: BotError) {
        match &err {
            BotError::Unexpected(_) => {
                error!("Message from {} failed: {}", node_label(sender), err)
            }
            _ => warn!("Message from {} failed: {}", node_label(sender), err),
        }
        let core = self.core.lock().await;
        if let Some(notice) = core.notice_for(&err) {
            core.notify(sender, &notice).await;
        }
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn unexpected_from_join(err: JoinError) -> BotError {
    if err.is_panic() {
        let payload = err.into_panic();
        let text = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string());
        BotError::unexpected(format!("handler panicked: {}", text))
    } else {
        BotError::unexpected("handler task cancelled")
    }
}
