//! Streaming gateway behavior: snapshot queries and fan-out isolation

use std::sync::Arc;
use std::time::Duration;

use sentinel_hub::api::stream::initial_state;
use sentinel_hub::bus::{EventBus, owner_group};
use sentinel_hub::protocol::ServiceStatus;
use sentinel_hub::storage::{MemoryStore, StatusStore};

use super::helpers::*;

#[tokio::test]
async fn test_initial_state_query_count_is_constant() {
    // The snapshot must not degrade to one query per agent
    for agent_count in [1usize, 5, 25] {
        let inner = MemoryStore::new();
        for i in 0..agent_count {
            register_agent(&inner, &format!("a{i}"), 7).await;
        }

        let counting = CountingStore::new(inner);
        for i in 0..agent_count {
            counting
                .upsert_service(sentinel_hub::storage::ServiceUpsert {
                    agent_id: format!("a{i}"),
                    agent_service_id: "disk".to_string(),
                    status: ServiceStatus::Ok,
                    message: String::new(),
                    last_seen: chrono::Utc::now(),
                })
                .await
                .unwrap();
        }

        let before = counting.query_count();
        let view = initial_state(&counting, Some(7)).await.unwrap();
        let issued = counting.query_count() - before;

        assert_eq!(view.len(), agent_count);
        assert_eq!(
            issued, 2,
            "snapshot for {agent_count} agents issued {issued} queries"
        );
    }
}

#[tokio::test]
async fn test_owner_groups_are_isolated() {
    let hub = test_hub(Duration::from_millis(100)).await;
    register_agent(&hub.store, "mine", 1).await;
    register_agent(&hub.store, "theirs", 2).await;

    let mut mine = hub.bus.subscribe(&owner_group(1)).await;
    let mut theirs = hub.bus.subscribe(&owner_group(2)).await;

    let session = hub.manager.connect("mine", SECRET).await.unwrap();
    hub.manager
        .status_report(&session, "disk", ServiceStatus::Ok, "")
        .await
        .unwrap();

    let my_events = drain_events(&mut mine, Duration::from_millis(200)).await;
    let their_events = drain_events(&mut theirs, Duration::from_millis(200)).await;

    assert!(!my_events.is_empty());
    assert!(their_events.is_empty(), "owner 2 saw owner 1's events");
}

#[tokio::test]
async fn test_global_group_sees_every_owner() {
    let hub = test_hub(Duration::from_millis(100)).await;
    register_agent(&hub.store, "mine", 1).await;
    register_agent(&hub.store, "theirs", 2).await;

    let mut global = hub
        .bus
        .subscribe(sentinel_hub::bus::AGENT_STATUS_GROUP)
        .await;

    hub.manager.connect("mine", SECRET).await.unwrap();
    hub.manager.connect("theirs", SECRET).await.unwrap();

    let events = drain_events(&mut global, Duration::from_millis(200)).await;
    let mut agents: Vec<&str> = events.iter().map(|e| e.agent_id()).collect();
    agents.sort_unstable();
    agents.dedup();

    assert_eq!(agents, vec!["mine", "theirs"]);
}

#[tokio::test]
async fn test_dropped_subscription_releases_group() {
    let hub = test_hub(Duration::from_millis(100)).await;
    register_agent(&hub.store, "a1", 7).await;

    let sub = hub.bus.subscribe(&owner_group(7)).await;
    drop(sub);

    // With the subscriber gone, publishing drops the event instead of
    // accumulating it anywhere
    let session = hub.manager.connect("a1", SECRET).await.unwrap();
    hub.manager
        .status_report(&session, "disk", ServiceStatus::Ok, "")
        .await
        .unwrap();

    // A fresh subscriber starts from an empty ring
    let mut fresh = hub.bus.subscribe(&owner_group(7)).await;
    let events = drain_events(&mut fresh, Duration::from_millis(150)).await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_initial_state_on_shared_store_arc() {
    // The gateway consumes the store as a trait object; make sure the free
    // function composes with Arc<dyn StatusStore> the way the handler does
    let store: Arc<dyn StatusStore> = Arc::new(MemoryStore::new());

    let view = initial_state(store.as_ref(), Some(1)).await.unwrap();
    assert!(view.is_empty());
}
