//! Notification trigger: raise the push signal on confirmed transitions
//!
//! The lifecycle manager requests a notification evaluation after each
//! confirmed connectivity change. The request is fire-and-forget: it is
//! queued to a small actor which forwards it to a `NotificationDispatcher`.
//! Actual delivery to devices happens in an external system; the hub only
//! raises the signal.
//!
//! ## Message Flow
//!
//! ```text
//! ConnectionManager ── request ──> NotifyActor ──> NotificationDispatcher
//!                                      │
//!                                      └── Shutdown
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// External push-dispatch boundary
///
/// Implementations must not block the hub on delivery problems; failures are
/// logged and swallowed.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Request a push for an agent's new connectivity state
    async fn dispatch(&self, agent_id: &str, is_online: bool);
}

/// Dispatcher that drops every request (default when no webhook is configured)
pub struct NoopDispatcher;

#[async_trait]
impl NotificationDispatcher for NoopDispatcher {
    async fn dispatch(&self, agent_id: &str, is_online: bool) {
        debug!("notification suppressed for {agent_id} (online: {is_online})");
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    agent_id: &'a str,
    is_online: bool,
    title: String,
}

/// Dispatcher that POSTs connectivity changes to a configured webhook
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    #[instrument(skip(self))]
    async fn dispatch(&self, agent_id: &str, is_online: bool) {
        let title = if is_online {
            format!("\"{agent_id}\" is online")
        } else {
            format!("\"{agent_id}\" went offline")
        };

        let payload = WebhookPayload {
            agent_id,
            is_online,
            title,
        };

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("webhook accepted notification for {agent_id}");
            }
            Ok(response) => {
                warn!("webhook rejected notification: HTTP {}", response.status());
            }
            Err(e) => {
                warn!("webhook request failed: {e}");
            }
        }
    }
}

/// Commands understood by the notify actor
#[derive(Debug)]
enum NotifyCommand {
    Evaluate { agent_id: String, is_online: bool },
    Shutdown,
}

/// Actor that serializes notification requests towards the dispatcher
struct NotifyActor {
    command_rx: mpsc::Receiver<NotifyCommand>,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl NotifyActor {
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting notify actor");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                NotifyCommand::Evaluate {
                    agent_id,
                    is_online,
                } => {
                    self.dispatcher.dispatch(&agent_id, is_online).await;
                }
                NotifyCommand::Shutdown => {
                    debug!("received shutdown command");
                    break;
                }
            }
        }

        debug!("notify actor stopped");
    }
}

/// Handle for requesting notification evaluations
#[derive(Clone)]
pub struct NotifyHandle {
    sender: mpsc::Sender<NotifyCommand>,
}

impl NotifyHandle {
    /// Spawn the notify actor around a dispatcher
    pub fn spawn(dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let actor = NotifyActor {
            command_rx: cmd_rx,
            dispatcher,
        };

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Request an evaluation, fire-and-forget
    ///
    /// A full queue means notifications are being produced faster than the
    /// dispatcher drains them; the request is dropped with a warning rather
    /// than blocking a connection task.
    pub fn request(&self, agent_id: &str, is_online: bool) {
        let cmd = NotifyCommand::Evaluate {
            agent_id: agent_id.to_string(),
            is_online,
        };

        if self.sender.try_send(cmd).is_err() {
            warn!("notify queue full, dropping notification for {agent_id}");
        }
    }

    /// Shutdown the notify actor
    pub async fn shutdown(&self) {
        let _ = self.sender.send(NotifyCommand::Shutdown).await;
    }
}
