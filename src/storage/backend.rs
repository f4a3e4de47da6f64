//! Status store trait definition
//!
//! All store backends (SQLite, in-memory) implement this trait. The trait is
//! designed to be:
//!
//! - **Async**: all methods are async for compatibility with Tokio tasks
//! - **Upsert-oriented**: agent and service writes are idempotent upserts
//! - **Fan-out friendly**: `list_agents` + `list_services` together fetch a
//!   requester's complete view in a bounded, constant number of queries
//!
//! ## Thread Safety
//!
//! Implementations must be `Send + Sync`; a single instance is shared by
//! every connection task.
//!
//! ## Write Ownership
//!
//! Agent and service rows are mutated only by the connection lifecycle
//! manager acting for the currently-authoritative session. That exclusivity
//! is enforced by session supersession, not by database locking, so backends
//! do not need row-level coordination beyond ordinary transactional safety.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{AgentRecord, AgentSeed, ServiceRecord, ServiceUpsert};

/// Health status of the store backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for status store backends
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Create or update an agent row from registration data
    ///
    /// Connectivity state (`is_online`, `last_seen`) is preserved when the
    /// agent already exists; only identity fields are refreshed.
    async fn upsert_agent(&self, seed: AgentSeed) -> StorageResult<AgentRecord>;

    /// Fetch a single agent
    async fn get_agent(&self, agent_id: &str) -> StorageResult<Option<AgentRecord>>;

    /// Fetch the shared secret used to authenticate an agent connection
    async fn get_agent_secret(&self, agent_id: &str) -> StorageResult<Option<String>>;

    /// Commit a connectivity transition
    ///
    /// Returns the updated row. Fails with `NotFound` for unknown agents.
    async fn set_agent_online(
        &self,
        agent_id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> StorageResult<AgentRecord>;

    /// Update `last_seen` without touching connectivity state
    ///
    /// Called on every accepted status report.
    async fn touch_agent(&self, agent_id: &str, last_seen: DateTime<Utc>) -> StorageResult<()>;

    /// Insert or update a service row, keyed by `(agent_id, agent_service_id)`
    ///
    /// Last write wins; returns the full updated row for broadcasting.
    async fn upsert_service(&self, upsert: ServiceUpsert) -> StorageResult<ServiceRecord>;

    /// List agents, optionally restricted to one owner
    ///
    /// `None` returns every agent (staff visibility).
    async fn list_agents(&self, owner_id: Option<i64>) -> StorageResult<Vec<AgentRecord>>;

    /// List all services belonging to the given agents in one query
    async fn list_services(&self, agent_ids: &[String]) -> StorageResult<Vec<ServiceRecord>>;

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend is operational.
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
