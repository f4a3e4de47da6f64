//! API shared state

use std::sync::Arc;

use crate::auth::ClientTokens;
use crate::bus::EventBus;
use crate::lifecycle::ConnectionManager;
use crate::storage::StatusStore;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// The connection-lifecycle engine (agent endpoint)
    pub manager: Arc<ConnectionManager>,

    /// Status store, read by the streaming gateway and health check
    pub store: Arc<dyn StatusStore>,

    /// Event bus, subscribed to by the streaming gateway
    pub bus: Arc<dyn EventBus>,

    /// Bearer tokens accepted on the streaming endpoint
    pub client_tokens: ClientTokens,
}
