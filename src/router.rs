//! Broadcast router: confirmed store mutations -> event bus publishes
//!
//! Pure translation. After the lifecycle manager commits a state change it
//! calls the router explicitly (no implicit hook chains); the router fans the
//! event out to the global `agent-status` group and to the owning account's
//! `owner:{id}` group. Clients subscribed to their owner group only ever see
//! events for agents they own; staff listeners subscribe to the global group.
//!
//! A failed or subscriber-less publish is logged and dropped. The store
//! commit has already happened, so losing the broadcast loses only the
//! real-time notification, never state.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::bus::{AGENT_STATUS_GROUP, EventBus, owner_group};
use crate::protocol::{AgentSnapshot, ServiceSnapshot, StatusEvent};

/// Routes domain events to bus groups
#[derive(Clone)]
pub struct BroadcastRouter {
    bus: Arc<dyn EventBus>,
}

impl BroadcastRouter {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// Publish a confirmed agent connectivity change
    pub async fn agent_status_changed(&self, owner_id: i64, snapshot: AgentSnapshot) {
        let event = StatusEvent::AgentStatus {
            agent_id: snapshot.id.clone(),
            payload: snapshot,
        };

        self.fan_out(owner_id, event).await;
    }

    /// Publish a confirmed service status change
    pub async fn service_status_changed(
        &self,
        owner_id: i64,
        agent_id: &str,
        snapshot: ServiceSnapshot,
    ) {
        let event = StatusEvent::ServiceStatus {
            agent_id: agent_id.to_string(),
            payload: snapshot,
        };

        self.fan_out(owner_id, event).await;
    }

    async fn fan_out(&self, owner_id: i64, event: StatusEvent) {
        let owner = owner_group(owner_id);

        for group in [AGENT_STATUS_GROUP, owner.as_str()] {
            match self.bus.publish(group, event.clone()).await {
                Ok(0) => trace!("no listeners on {group}, event dropped"),
                Ok(delivered) => trace!("delivered to {delivered} listeners on {group}"),
                Err(e) => {
                    // Dropped broadcast; authoritative state is already committed
                    warn!("publish to {group} failed: {e}");
                }
            }
        }
    }
}
