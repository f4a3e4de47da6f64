//! Connection lifecycle manager
//!
//! Owns one state machine per agent:
//!
//! ```text
//! Disconnected ──connect──> Connected ──disconnect──> PendingDisconnect
//!       ▲                       ▲                            │
//!       │                       │ reconnect (timer cancelled)│
//!       └──────grace period elapsed, offline confirmed───────┘
//! ```
//!
//! A raw disconnect never marks the agent offline immediately. The manager
//! starts a grace timer instead; a reconnect inside the window cancels it and
//! nothing is published. Real agents reconnect within seconds during ordinary
//! network hiccups, and without the debounce every blip would produce a
//! spurious offline/online notification pair.
//!
//! ## Sessions and supersession
//!
//! At most one authoritative session exists per agent. A new connection for
//! an agent that already has a session force-closes the prior one before
//! proceeding, so two writers can never race on the same service rows. Each
//! accepted connection bumps the agent's session epoch; inbound calls carry
//! the epoch of the session that made them, and stale epochs are inert.
//!
//! ## Locking
//!
//! Per-agent state lives in a shared map of independently lockable slots.
//! Every check/cancel/fire operation for one agent serializes on that agent's
//! slot, never on a process-wide lock. State-transition publishes happen
//! while the slot is held, which is what gives subscribers per-agent events
//! in commit order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::auth::CredentialVerifier;
use crate::error::{HubError, HubResult};
use crate::notify::NotifyHandle;
use crate::protocol::{AgentSnapshot, ServiceSnapshot, ServiceStatus};
use crate::router::BroadcastRouter;
use crate::storage::{StatusStore, StorageError, StorageResult, schema::ServiceUpsert};

/// Upper bound on agent-local service identifiers
const MAX_SERVICE_ID_LEN: usize = 255;

/// Upper bound on free-text status messages
const MAX_MESSAGE_LEN: usize = 4096;

/// Delay before retrying a failed store write
const STORE_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Per-agent connection state
///
/// `epoch` is bumped on every accepted connection; a session whose epoch no
/// longer matches has been superseded and its calls are ignored.
struct AgentSlot {
    epoch: u64,

    /// Close signal for the live session's socket task
    close_tx: Option<watch::Sender<bool>>,

    /// Pending grace timer, present only in PendingDisconnect
    grace_timer: Option<JoinHandle<()>>,
}

/// Handle for the authoritative connection of one agent
///
/// Returned by [`ConnectionManager::connect`]; every subsequent call for the
/// connection presents it. Dropping the session does nothing by itself - the
/// socket task is expected to call [`ConnectionManager::disconnect`].
#[derive(Debug)]
pub struct Session {
    agent_id: String,
    agent_name: String,
    owner_id: i64,
    epoch: u64,
    closed: watch::Receiver<bool>,
}

impl Session {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn owner_id(&self) -> i64 {
        self.owner_id
    }

    /// Resolves once the session has been superseded by a newer connection
    pub async fn superseded(&mut self) {
        while !*self.closed.borrow_and_update() {
            if self.closed.changed().await.is_err() {
                return;
            }
        }
    }

    /// Standalone copy of the supersession signal
    ///
    /// Lets a socket task wait for supersession in one `select!` arm while
    /// the session itself is used in another.
    pub fn supersession_signal(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }
}

/// The connection-lifecycle and state-transition engine
pub struct ConnectionManager {
    store: Arc<dyn StatusStore>,
    verifier: Arc<dyn CredentialVerifier>,
    router: BroadcastRouter,
    notify: NotifyHandle,
    grace_period: Duration,
    agents: RwLock<HashMap<String, Arc<Mutex<AgentSlot>>>>,
}

impl ConnectionManager {
    pub fn new(
        store: Arc<dyn StatusStore>,
        verifier: Arc<dyn CredentialVerifier>,
        router: BroadcastRouter,
        notify: NotifyHandle,
        grace_period: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            verifier,
            router,
            notify,
            grace_period,
            agents: RwLock::new(HashMap::new()),
        })
    }

    /// Accept an inbound agent connection
    ///
    /// Verifies the credential, supersedes any prior session, cancels a
    /// pending grace timer, and commits the online transition if the agent
    /// was offline. Returns the new authoritative session.
    #[instrument(skip(self, secret))]
    pub async fn connect(&self, agent_id: &str, secret: &str) -> HubResult<Session> {
        let identity = self.verifier.verify(agent_id, secret).await?;

        let slot_arc = self.slot(agent_id).await;
        let mut slot = slot_arc.lock().await;

        // Supersede the prior session: its socket task is told to close and
        // its epoch goes stale. A signal that cannot be delivered means the
        // old task is already gone; either way the new session proceeds.
        if let Some(close_tx) = slot.close_tx.take()
            && close_tx.send(true).is_err()
        {
            // Supersession could not be completed cleanly; the new
            // connection is authoritative either way
            warn!("session conflict: superseded session for {agent_id} was already gone");
        }

        if let Some(timer) = slot.grace_timer.take() {
            timer.abort();
            debug!("cancelled pending disconnect for {agent_id}");
        }

        slot.epoch += 1;
        let epoch = slot.epoch;

        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| HubError::Authentication("agent no longer registered".to_string()))?;

        if !agent.is_online {
            let store = self.store.clone();
            let id = agent.id.clone();
            let now = Utc::now();
            let updated = retry_once(move || {
                let store = store.clone();
                let id = id.clone();
                async move { store.set_agent_online(&id, true, now).await }
            })
            .await?;

            self.router
                .agent_status_changed(identity.owner_id, AgentSnapshot::from(&updated))
                .await;
            self.notify.request(agent_id, true);
        }

        let (close_tx, close_rx) = watch::channel(false);
        slot.close_tx = Some(close_tx);

        debug!("agent {agent_id} connected (epoch {epoch})");

        Ok(Session {
            agent_id: identity.agent_id,
            agent_name: identity.name,
            owner_id: identity.owner_id,
            epoch,
            closed: close_rx,
        })
    }

    /// Record one inbound status report
    ///
    /// Validates the payload, upserts the service row, touches the agent's
    /// `last_seen`, and publishes the full updated snapshot. Service-level
    /// flapping is not debounced; only agent connectivity is.
    #[instrument(skip(self, session, message), fields(agent_id = %session.agent_id))]
    pub async fn status_report(
        &self,
        session: &Session,
        service_id: &str,
        status: ServiceStatus,
        message: &str,
    ) -> HubResult<ServiceSnapshot> {
        if service_id.is_empty() {
            return Err(HubError::Validation("service_id must not be empty".to_string()));
        }
        if service_id.len() > MAX_SERVICE_ID_LEN {
            return Err(HubError::Validation(format!(
                "service_id exceeds {MAX_SERVICE_ID_LEN} bytes"
            )));
        }
        if message.len() > MAX_MESSAGE_LEN {
            return Err(HubError::Validation(format!(
                "message exceeds {MAX_MESSAGE_LEN} bytes"
            )));
        }

        let slot_arc = self.slot(&session.agent_id).await;
        let slot = slot_arc.lock().await;

        if slot.epoch != session.epoch {
            // Superseded sessions are inert; the report is ignored
            return Err(HubError::Conflict(format!(
                "session for {} was superseded",
                session.agent_id
            )));
        }

        let now = Utc::now();
        let upsert = ServiceUpsert {
            agent_id: session.agent_id.clone(),
            agent_service_id: service_id.to_string(),
            status,
            message: message.to_string(),
            last_seen: now,
        };

        let store = self.store.clone();
        let record = retry_once(move || {
            let store = store.clone();
            let upsert = upsert.clone();
            async move { store.upsert_service(upsert).await }
        })
        .await?;

        let store = self.store.clone();
        let id = session.agent_id.clone();
        retry_once(move || {
            let store = store.clone();
            let id = id.clone();
            async move { store.touch_agent(&id, now).await }
        })
        .await?;

        let snapshot = ServiceSnapshot::from(&record);
        self.router
            .service_status_changed(session.owner_id, &session.agent_id, snapshot.clone())
            .await;

        drop(slot);
        Ok(snapshot)
    }

    /// Handle a raw socket disconnect
    ///
    /// Does not mark the agent offline. `last_seen` is captured now, and the
    /// offline transition is deferred behind the grace timer so a quick
    /// reconnect produces no events at all.
    #[instrument(skip(self, session), fields(agent_id = %session.agent_id))]
    pub async fn disconnect(self: Arc<Self>, session: Session, reason: &str) {
        let slot_arc = self.slot(&session.agent_id).await;
        let mut slot = slot_arc.lock().await;

        if slot.epoch != session.epoch {
            debug!(
                "ignoring disconnect of superseded session for {} ({reason})",
                session.agent_id
            );
            return;
        }

        // The socket is gone; nothing left to force-close
        slot.close_tx = None;

        // Uptime accounting reflects actual last contact, not timer expiry
        let disconnected_at = Utc::now();

        debug!(
            "agent {} disconnected ({reason}), grace period {:?}",
            session.agent_id, self.grace_period
        );

        if self.grace_period.is_zero() {
            drop(slot);
            self.confirm_offline(&session.agent_id, session.epoch, disconnected_at)
                .await;
            return;
        }

        let manager = self.clone();
        let agent_id = session.agent_id.clone();
        let epoch = session.epoch;
        let grace = self.grace_period;

        slot.grace_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            manager.confirm_offline(&agent_id, epoch, disconnected_at).await;
        }));
    }

    /// Grace timer expiry: re-validate, then commit the offline transition
    ///
    /// The epoch is checked again under the slot lock because the timer may
    /// race with a fast reconnect; a newer session aborts the transition.
    async fn confirm_offline(&self, agent_id: &str, epoch: u64, last_seen: DateTime<Utc>) {
        let slot_arc = self.slot(agent_id).await;
        let mut slot = slot_arc.lock().await;

        if slot.epoch != epoch {
            debug!("agent {agent_id} reconnected within grace period, skipping offline transition");
            return;
        }

        slot.grace_timer = None;

        let agent = match self.store.get_agent(agent_id).await {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                warn!("agent {agent_id} vanished from the store before offline confirmation");
                return;
            }
            Err(e) => {
                error!("could not re-read agent {agent_id} at grace expiry: {e}");
                return;
            }
        };

        if !agent.is_online {
            return;
        }

        let store = self.store.clone();
        let id = agent_id.to_string();
        let updated = retry_once(move || {
            let store = store.clone();
            let id = id.clone();
            async move { store.set_agent_online(&id, false, last_seen).await }
        })
        .await;

        match updated {
            Ok(updated) => {
                debug!("agent {agent_id} confirmed offline");
                self.router
                    .agent_status_changed(agent.owner_id, AgentSnapshot::from(&updated))
                    .await;
                self.notify.request(agent_id, false);
            }
            Err(e) => {
                // State stays online in the store; the next disconnect or
                // reconnect will converge it
                error!("offline transition for {agent_id} failed: {e}");
            }
        }
    }

    async fn slot(&self, agent_id: &str) -> Arc<Mutex<AgentSlot>> {
        {
            let agents = self.agents.read().await;
            if let Some(slot) = agents.get(agent_id) {
                return slot.clone();
            }
        }

        let mut agents = self.agents.write().await;
        agents
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(AgentSlot {
                    epoch: 0,
                    close_tx: None,
                    grace_timer: None,
                }))
            })
            .clone()
    }
}

/// Retry a failed store write once after a short backoff
///
/// `NotFound` is not retried - a missing row will not appear on its own.
async fn retry_once<T, F, Fut>(op: F) -> Result<T, HubError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(StorageError::NotFound(msg)) => Err(StorageError::NotFound(msg).into()),
        Err(first) => {
            warn!("store write failed, retrying once: {first}");
            tokio::time::sleep(STORE_RETRY_BACKOFF).await;
            op().await.map_err(HubError::from)
        }
    }
}
