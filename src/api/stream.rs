//! Streaming gateway: snapshot plus live tail over Server-Sent Events
//!
//! One request opens a single-direction, append-only stream. The first frame
//! is `initial_state` with every agent the requester may see (nested
//! services included); after that, live `agent_status` / `service_status`
//! events are forwarded from the requester's bus group. Closing the
//! underlying connection is the only cancellation mechanism: dropping the
//! response stream drops the bus subscription with it, so group membership
//! is released promptly.
//!
//! ## Visibility
//!
//! Non-staff clients subscribe to their `owner:{id}` group and see only
//! their own agents. Staff clients subscribe to the global group instead,
//! which is a strict superset of their own (subscribing to both would only
//! duplicate frames).
//!
//! ## Slow readers
//!
//! Each subscriber owns a bounded event ring on the bus. A reader that
//! cannot keep up loses the oldest buffered events first; publishers are
//! never blocked by a slow subscriber. This buffering policy is a deliberate
//! design choice of this gateway.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::{
    extract::State,
    http::HeaderMap,
    response::{
        Sse,
        sse::{Event as SseEvent, KeepAlive},
    },
};
use tokio_stream::{StreamExt as _, wrappers::BroadcastStream};
use tracing::{debug, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::auth::ClientIdentity;
use crate::bus::{AGENT_STATUS_GROUP, EventBus, owner_group};
use crate::protocol::{AgentSnapshot, AgentWithServices, ServiceSnapshot, StreamFrame};
use crate::storage::{StatusStore, StorageResult};

/// Interval for SSE keep-alive comments while the stream is idle
const KEEP_ALIVE_SECS: u64 = 30;

/// SSE stream handler
///
/// GET /api/v1/stream
pub async fn stream_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>>> {
    let identity = authenticate(&state, &headers)?;

    debug!(
        "stream client connected (owner {}, staff: {})",
        identity.owner_id, identity.staff
    );

    // Subscribe before the snapshot so no event between the two is lost;
    // an event may be seen both in the snapshot and the tail, which
    // at-most-once consumers already tolerate
    let group = if identity.staff {
        AGENT_STATUS_GROUP.to_string()
    } else {
        owner_group(identity.owner_id)
    };
    let subscriber = state.bus.subscribe(&group).await;

    let owner_filter = if identity.staff {
        None
    } else {
        Some(identity.owner_id)
    };
    let agents = initial_state(state.store.as_ref(), owner_filter).await?;

    let first_frame = StreamFrame::InitialState { agents };
    let snapshot_event: Result<SseEvent, Infallible> = serde_json::to_string(&first_frame)
        .map(|data| Ok(SseEvent::default().data(data)))
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let live_stream = BroadcastStream::new(subscriber.into_receiver()).filter_map(|result| {
        match result {
            Ok(event) => {
                let data = serde_json::to_string(&event).ok()?;
                Some(Ok(SseEvent::default().data(data)))
            }
            // Lagged: the oldest buffered events were dropped for this
            // subscriber, newer ones follow
            Err(e) => {
                warn!("stream subscriber lagged: {e}");
                None
            }
        }
    });

    let combined = tokio_stream::iter([snapshot_event]).chain(live_stream);

    Ok(Sse::new(combined)
        .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(KEEP_ALIVE_SECS))))
}

fn authenticate(state: &ApiState, headers: &HeaderMap) -> ApiResult<ClientIdentity> {
    let auth_header = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        ApiError::Unauthorized("Invalid Authorization format (expected: Bearer <token>)".to_string())
    })?;

    state
        .client_tokens
        .resolve(token)
        .ok_or_else(|| ApiError::Unauthorized("Invalid token".to_string()))
}

/// Fetch the complete view a requester may see
///
/// Issues a bounded, constant number of store queries (one for agents, one
/// for all their services) regardless of how many agents or services exist.
pub async fn initial_state(
    store: &dyn StatusStore,
    owner_id: Option<i64>,
) -> StorageResult<Vec<AgentWithServices>> {
    let agents = store.list_agents(owner_id).await?;

    let agent_ids: Vec<String> = agents.iter().map(|a| a.id.clone()).collect();
    let services = store.list_services(&agent_ids).await?;

    let mut by_agent: HashMap<String, Vec<ServiceSnapshot>> = HashMap::new();
    for service in &services {
        by_agent
            .entry(service.agent_id.clone())
            .or_default()
            .push(ServiceSnapshot::from(service));
    }

    Ok(agents
        .iter()
        .map(|agent| AgentWithServices {
            agent: AgentSnapshot::from(agent),
            services: by_agent.remove(&agent.id).unwrap_or_default(),
        })
        .collect())
}
