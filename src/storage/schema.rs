//! Row types for the status store
//!
//! Two durable tables back the hub: `agents` (identity, owner, connectivity
//! state) and `services` (last known health per monitored unit, keyed by the
//! agent-local service id). Rows are mutated only by the connection lifecycle
//! manager; every other component reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::ServiceStatus;

/// One agent row
///
/// `last_seen` is the timestamp of last contact, captured at disconnect time
/// rather than at grace-timer expiry so uptime accounting reflects actual
/// last contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Opaque unique identifier, chosen at registration
    pub id: String,

    /// Friendly display name
    pub name: String,

    /// Owning account reference
    pub owner_id: i64,

    /// Whether the agent currently has a confirmed live connection
    pub is_online: bool,

    /// Last confirmed contact
    pub last_seen: Option<DateTime<Utc>>,
}

/// One service row, unique per `(agent_id, agent_service_id)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Store-assigned row id
    pub id: i64,

    /// Owning agent
    pub agent_id: String,

    /// Agent-local service identifier (unique within its agent)
    pub agent_service_id: String,

    /// Last reported status
    pub last_status: ServiceStatus,

    /// Last reported free-text message
    pub last_message: String,

    /// Timestamp of the last status report
    pub last_seen: Option<DateTime<Utc>>,
}

/// Registration data for provisioning an agent
///
/// Registration itself is an external concern; the store only exposes the
/// upsert the registration flow (or startup provisioning) calls into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSeed {
    pub id: String,
    pub name: String,
    pub secret: String,
    pub owner_id: i64,
}

/// A single status report, as written by the lifecycle manager
#[derive(Debug, Clone)]
pub struct ServiceUpsert {
    pub agent_id: String,
    pub agent_service_id: String,
    pub status: ServiceStatus,
    pub message: String,
    pub last_seen: DateTime<Utc>,
}
