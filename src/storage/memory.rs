//! In-memory status store (no persistence)
//!
//! Keeps agent and service rows in maps behind an async lock. Useful for:
//! - Testing without database dependencies
//! - Single-instance deployments that can tolerate losing state on restart
//!
//! ## Limitations
//!
//! - **No persistence**: all data lost on restart
//! - **Single process**: cannot be shared across hub instances

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StatusStore};
use super::error::{StorageError, StorageResult};
use super::schema::{AgentRecord, AgentSeed, ServiceRecord, ServiceUpsert};

#[derive(Default)]
struct Tables {
    /// Agent rows plus the secret used for credential checks
    agents: HashMap<String, (AgentRecord, String)>,

    /// Service rows keyed by (agent_id, agent_service_id)
    services: HashMap<(String, String), ServiceRecord>,

    /// Row-id sequence for services
    next_service_id: i64,
}

/// In-memory status store backend
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                next_service_id: 1,
                ..Tables::default()
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn upsert_agent(&self, seed: AgentSeed) -> StorageResult<AgentRecord> {
        let mut tables = self.tables.write().await;

        let entry = tables
            .agents
            .entry(seed.id.clone())
            .or_insert_with(|| {
                debug!("provisioning agent {}", seed.id);
                (
                    AgentRecord {
                        id: seed.id.clone(),
                        name: seed.name.clone(),
                        owner_id: seed.owner_id,
                        is_online: false,
                        last_seen: None,
                    },
                    seed.secret.clone(),
                )
            });

        // Refresh identity fields, keep connectivity state
        entry.0.name = seed.name;
        entry.0.owner_id = seed.owner_id;
        entry.1 = seed.secret;

        Ok(entry.0.clone())
    }

    async fn get_agent(&self, agent_id: &str) -> StorageResult<Option<AgentRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.agents.get(agent_id).map(|(record, _)| record.clone()))
    }

    async fn get_agent_secret(&self, agent_id: &str) -> StorageResult<Option<String>> {
        let tables = self.tables.read().await;
        Ok(tables.agents.get(agent_id).map(|(_, secret)| secret.clone()))
    }

    async fn set_agent_online(
        &self,
        agent_id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> StorageResult<AgentRecord> {
        let mut tables = self.tables.write().await;

        let (record, _) = tables
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| StorageError::NotFound(format!("agent {}", agent_id)))?;

        record.is_online = is_online;
        record.last_seen = Some(last_seen);

        Ok(record.clone())
    }

    async fn touch_agent(&self, agent_id: &str, last_seen: DateTime<Utc>) -> StorageResult<()> {
        let mut tables = self.tables.write().await;

        let (record, _) = tables
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| StorageError::NotFound(format!("agent {}", agent_id)))?;

        record.last_seen = Some(last_seen);
        Ok(())
    }

    async fn upsert_service(&self, upsert: ServiceUpsert) -> StorageResult<ServiceRecord> {
        let mut tables = self.tables.write().await;

        if !tables.agents.contains_key(&upsert.agent_id) {
            return Err(StorageError::NotFound(format!("agent {}", upsert.agent_id)));
        }

        let id = {
            let key = (upsert.agent_id.clone(), upsert.agent_service_id.clone());
            match tables.services.get(&key) {
                Some(existing) => existing.id,
                None => {
                    let id = tables.next_service_id;
                    tables.next_service_id += 1;
                    id
                }
            }
        };

        let record = ServiceRecord {
            id,
            agent_id: upsert.agent_id.clone(),
            agent_service_id: upsert.agent_service_id.clone(),
            last_status: upsert.status,
            last_message: upsert.message,
            last_seen: Some(upsert.last_seen),
        };

        tables.services.insert(
            (upsert.agent_id, upsert.agent_service_id),
            record.clone(),
        );

        Ok(record)
    }

    async fn list_agents(&self, owner_id: Option<i64>) -> StorageResult<Vec<AgentRecord>> {
        let tables = self.tables.read().await;

        let mut agents: Vec<AgentRecord> = tables
            .agents
            .values()
            .filter(|(record, _)| owner_id.is_none_or(|owner| record.owner_id == owner))
            .map(|(record, _)| record.clone())
            .collect();

        agents.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(agents)
    }

    async fn list_services(&self, agent_ids: &[String]) -> StorageResult<Vec<ServiceRecord>> {
        let tables = self.tables.read().await;

        let mut services: Vec<ServiceRecord> = tables
            .services
            .values()
            .filter(|record| agent_ids.contains(&record.agent_id))
            .cloned()
            .collect();

        services.sort_by(|a, b| a.agent_service_id.cmp(&b.agent_service_id));
        Ok(services)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let tables = self.tables.read().await;

        Ok(HealthStatus {
            healthy: true,
            message: "in-memory store operational".to_string(),
            metadata: std::collections::HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("agents".to_string(), tables.agents.len().to_string()),
                ("services".to_string(), tables.services.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
