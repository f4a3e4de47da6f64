//! Helper functions for integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_hub::auth::StoreCredentialVerifier;
use sentinel_hub::bus::{BusSubscriber, InProcessBus};
use sentinel_hub::lifecycle::ConnectionManager;
use sentinel_hub::notify::{NoopDispatcher, NotifyHandle};
use sentinel_hub::protocol::StatusEvent;
use sentinel_hub::router::BroadcastRouter;
use sentinel_hub::storage::{
    AgentRecord, AgentSeed, HealthStatus, MemoryStore, ServiceRecord, ServiceUpsert, StatusStore,
    StorageResult,
};

pub const SECRET: &str = "test-secret";

/// Fully wired in-memory hub core
pub struct TestHub {
    pub store: Arc<MemoryStore>,
    pub bus: Arc<InProcessBus>,
    pub manager: Arc<ConnectionManager>,
}

pub async fn test_hub(grace: Duration) -> TestHub {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InProcessBus::new(64));

    let manager = ConnectionManager::new(
        store.clone(),
        Arc::new(StoreCredentialVerifier::new(store.clone())),
        BroadcastRouter::new(bus.clone()),
        NotifyHandle::spawn(Arc::new(NoopDispatcher)),
        grace,
    );

    TestHub {
        store,
        bus,
        manager,
    }
}

pub async fn register_agent(store: &MemoryStore, id: &str, owner_id: i64) {
    store
        .upsert_agent(AgentSeed {
            id: id.to_string(),
            name: format!("Agent {id}"),
            secret: SECRET.to_string(),
            owner_id,
        })
        .await
        .unwrap();
}

/// Collect every event arriving on a subscription within `window`
pub async fn drain_events(sub: &mut BusSubscriber, window: Duration) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, sub.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => break,
            Err(_) => break,
        }
    }

    events
}

pub fn agent_status_events(events: &[StatusEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|e| match e {
            StatusEvent::AgentStatus { payload, .. } => Some(payload.is_online),
            _ => None,
        })
        .collect()
}

/// Store wrapper that fails the next N service upserts before delegating
pub struct FlakyStore {
    inner: MemoryStore,
    failures_left: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl StatusStore for FlakyStore {
    async fn upsert_agent(&self, seed: AgentSeed) -> StorageResult<AgentRecord> {
        self.inner.upsert_agent(seed).await
    }

    async fn get_agent(&self, agent_id: &str) -> StorageResult<Option<AgentRecord>> {
        self.inner.get_agent(agent_id).await
    }

    async fn get_agent_secret(&self, agent_id: &str) -> StorageResult<Option<String>> {
        self.inner.get_agent_secret(agent_id).await
    }

    async fn set_agent_online(
        &self,
        agent_id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> StorageResult<AgentRecord> {
        self.inner.set_agent_online(agent_id, is_online, last_seen).await
    }

    async fn touch_agent(&self, agent_id: &str, last_seen: DateTime<Utc>) -> StorageResult<()> {
        self.inner.touch_agent(agent_id, last_seen).await
    }

    async fn upsert_service(&self, upsert: ServiceUpsert) -> StorageResult<ServiceRecord> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(sentinel_hub::storage::StorageError::QueryFailed(
                "injected transient failure".to_string(),
            ));
        }

        self.inner.upsert_service(upsert).await
    }

    async fn list_agents(&self, owner_id: Option<i64>) -> StorageResult<Vec<AgentRecord>> {
        self.inner.list_agents(owner_id).await
    }

    async fn list_services(&self, agent_ids: &[String]) -> StorageResult<Vec<ServiceRecord>> {
        self.inner.list_services(agent_ids).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}

/// Store wrapper that counts every query issued against it
pub struct CountingStore {
    inner: MemoryStore,
    queries: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.queries.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatusStore for CountingStore {
    async fn upsert_agent(&self, seed: AgentSeed) -> StorageResult<AgentRecord> {
        self.count();
        self.inner.upsert_agent(seed).await
    }

    async fn get_agent(&self, agent_id: &str) -> StorageResult<Option<AgentRecord>> {
        self.count();
        self.inner.get_agent(agent_id).await
    }

    async fn get_agent_secret(&self, agent_id: &str) -> StorageResult<Option<String>> {
        self.count();
        self.inner.get_agent_secret(agent_id).await
    }

    async fn set_agent_online(
        &self,
        agent_id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> StorageResult<AgentRecord> {
        self.count();
        self.inner.set_agent_online(agent_id, is_online, last_seen).await
    }

    async fn touch_agent(&self, agent_id: &str, last_seen: DateTime<Utc>) -> StorageResult<()> {
        self.count();
        self.inner.touch_agent(agent_id, last_seen).await
    }

    async fn upsert_service(&self, upsert: ServiceUpsert) -> StorageResult<ServiceRecord> {
        self.count();
        self.inner.upsert_service(upsert).await
    }

    async fn list_agents(&self, owner_id: Option<i64>) -> StorageResult<Vec<AgentRecord>> {
        self.count();
        self.inner.list_agents(owner_id).await
    }

    async fn list_services(&self, agent_ids: &[String]) -> StorageResult<Vec<ServiceRecord>> {
        self.count();
        self.inner.list_services(agent_ids).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.count();
        self.inner.health_check().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}
