//! Wire types for the agent and client protocols
//!
//! Agents speak typed JSON envelopes over their persistent connection;
//! clients receive typed JSON frames over the streaming endpoint. Both sides
//! dispatch on the `type` discriminator, so every frame carries one.
//!
//! ## Inbound (agent -> hub)
//!
//! ```json
//! {"type": "status_update", "payload": {"service_id": "disk", "status": "ok", "message": ""}}
//! ```
//!
//! Malformed envelopes are answered with an `error` acknowledgment and the
//! connection stays open.
//!
//! ## Outbound (hub -> subscribers)
//!
//! `agent_status` and `service_status` events travel over the event bus and
//! the streaming endpoint; `initial_state` is produced by the streaming
//! gateway only and never enters the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::schema::{AgentRecord, ServiceRecord};

/// Last reported health of a monitored service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Ok,
    Warning,
    Error,
    Unknown,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Ok => "ok",
            ServiceStatus::Warning => "warning",
            ServiceStatus::Error => "error",
            ServiceStatus::Unknown => "unknown",
        }
    }

    /// Parse the stored representation, falling back to `Unknown`
    /// for values written by a newer schema.
    pub fn from_stored(value: &str) -> Self {
        match value {
            "ok" => ServiceStatus::Ok,
            "warning" => ServiceStatus::Warning,
            "error" => ServiceStatus::Error,
            _ => ServiceStatus::Unknown,
        }
    }
}

/// Envelope received from an agent over its persistent connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEnvelope {
    StatusUpdate { payload: StatusUpdatePayload },
}

/// Payload of a `status_update` envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdatePayload {
    pub service_id: String,
    pub status: ServiceStatus,
    #[serde(default)]
    pub message: String,
}

/// Per-message acknowledgment sent back to an agent when an inbound
/// envelope is rejected. The connection itself is not affected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAck {
    Error { message: String },
}

/// Snapshot of an agent's connectivity state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub name: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl From<&AgentRecord> for AgentSnapshot {
    fn from(record: &AgentRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            is_online: record.is_online,
            last_seen: record.last_seen,
        }
    }
}

/// Snapshot of a service's last known state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub id: i64,
    pub agent_service_id: String,
    pub last_status: ServiceStatus,
    pub last_message: String,
    pub last_seen: Option<DateTime<Utc>>,
}

impl From<&ServiceRecord> for ServiceSnapshot {
    fn from(record: &ServiceRecord) -> Self {
        Self {
            id: record.id,
            agent_service_id: record.agent_service_id.clone(),
            last_status: record.last_status,
            last_message: record.last_message.clone(),
            last_seen: record.last_seen,
        }
    }
}

/// Event published on the bus after a confirmed store mutation
///
/// Events for a single agent are published in commit order; no ordering is
/// guaranteed across agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    AgentStatus {
        agent_id: String,
        payload: AgentSnapshot,
    },
    ServiceStatus {
        agent_id: String,
        payload: ServiceSnapshot,
    },
}

impl StatusEvent {
    pub fn agent_id(&self) -> &str {
        match self {
            StatusEvent::AgentStatus { agent_id, .. } => agent_id,
            StatusEvent::ServiceStatus { agent_id, .. } => agent_id,
        }
    }
}

/// An agent with its nested services, as shipped in `initial_state`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentWithServices {
    #[serde(flatten)]
    pub agent: AgentSnapshot,
    pub services: Vec<ServiceSnapshot>,
}

/// First frame of a streaming response: everything the requester may see
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    InitialState { agents: Vec<AgentWithServices> },
}
