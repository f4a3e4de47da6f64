//! Event bus: named-group publish/subscribe for status events
//!
//! Producers (the broadcast router) and consumers (streaming clients, live
//! listeners) are decoupled through named groups. The trait keeps the core's
//! contract independent of the transport: the in-process implementation here
//! maps each group to a `tokio::sync::broadcast` channel; a broker-backed
//! implementation could replace it without touching the lifecycle manager.
//!
//! ## Delivery semantics
//!
//! - **At-most-once, best-effort**: a publish with no attached subscriber is
//!   dropped. There is no replay for late subscribers.
//! - **Bounded buffering**: each subscriber owns a bounded ring of pending
//!   events. A subscriber that falls behind loses the oldest buffered events
//!   first; the publisher is never blocked.
//! - **Ordering**: events published to one group by one producer arrive in
//!   publish order. Nothing is guaranteed across groups or across producers.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, trace};

use crate::protocol::StatusEvent;

/// Global group receiving every status event (debug/raw listeners)
pub const AGENT_STATUS_GROUP: &str = "agent-status";

/// Group name scoping events to one owner's agents
pub fn owner_group(owner_id: i64) -> String {
    format!("owner:{}", owner_id)
}

/// Errors surfaced by bus implementations
///
/// The in-process bus cannot fail; broker-backed implementations surface
/// connectivity problems here. Callers treat any publish error as a dropped
/// broadcast, never as a reason to abort the store commit.
#[derive(Debug)]
pub enum BusError {
    Unavailable(String),
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusError::Unavailable(msg) => write!(f, "event bus unavailable: {}", msg),
        }
    }
}

impl std::error::Error for BusError {}

/// Process/host-spanning publish-subscribe addressed by named groups
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to a group
    ///
    /// Returns the number of subscribers the event was handed to; zero means
    /// the event was dropped because nobody is attached.
    async fn publish(&self, group: &str, event: StatusEvent) -> Result<usize, BusError>;

    /// Attach a new subscriber to a group
    async fn subscribe(&self, group: &str) -> BusSubscriber;
}

/// A single group subscription
///
/// Wraps the broadcast receiver so callers never see channel internals.
/// Dropping the subscriber releases the group membership.
pub struct BusSubscriber {
    rx: broadcast::Receiver<StatusEvent>,
}

impl BusSubscriber {
    /// Receive the next event
    ///
    /// Overflowed (lagged) positions are skipped transparently: the oldest
    /// buffered events were dropped in favor of newer ones, per the bus
    /// buffering policy. Returns `None` once the group is gone.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("subscriber lagged, dropped {skipped} oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Unwrap the underlying receiver for stream adapters
    pub fn into_receiver(self) -> broadcast::Receiver<StatusEvent> {
        self.rx
    }
}

/// In-process bus for single-instance deployments
///
/// Groups are created lazily on first subscribe or publish and torn down when
/// a publish finds no remaining receivers, so idle groups do not accumulate.
pub struct InProcessBus {
    groups: RwLock<HashMap<String, broadcast::Sender<StatusEvent>>>,

    /// Per-subscriber ring capacity
    capacity: usize,
}

impl InProcessBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            capacity,
        }
    }
}

#[async_trait]
impl EventBus for InProcessBus {
    async fn publish(&self, group: &str, event: StatusEvent) -> Result<usize, BusError> {
        let delivered = {
            let groups = self.groups.read().await;
            match groups.get(group) {
                Some(sender) => sender.send(event).unwrap_or(0),
                None => 0,
            }
        };

        if delivered == 0 {
            trace!("no subscribers on group {group}, event dropped");

            // Last receiver is gone; drop the channel entry
            let mut groups = self.groups.write().await;
            if let Some(sender) = groups.get(group)
                && sender.receiver_count() == 0
            {
                groups.remove(group);
            }
        }

        Ok(delivered)
    }

    async fn subscribe(&self, group: &str) -> BusSubscriber {
        let mut groups = self.groups.write().await;
        let sender = groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);

        debug!("subscriber joined group {group}");
        BusSubscriber {
            rx: sender.subscribe(),
        }
    }
}
