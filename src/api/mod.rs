//! HTTP surface of the hub
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **WebSocket** endpoint for inbound agent connections
//! - **SSE** endpoint for pull-style streaming subscribers
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check (store health included)
//! - `WS  /api/v1/agents/{agent_id}/connect` - Agent inbound connection
//! - `GET /api/v1/stream` - Snapshot plus live status stream

pub mod agent_ws;
pub mod error;
pub mod state;
pub mod stream;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use tracing::info;

use crate::storage::StatusStore;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Enable CORS for browser dashboards
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().expect("valid literal address"),
            enable_cors: true,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: String,
    pub timestamp: String,
}

/// GET /api/v1/health
async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let store = match state.store.health_check().await {
        Ok(health) => health.message,
        Err(e) => format!("unhealthy: {e}"),
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        store,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Build the hub router
///
/// Exposed separately from [`spawn_api_server`] so tests can serve it on an
/// ephemeral port.
pub fn build_router(state: ApiState) -> Router {
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/api/v1/health", get(health_check))
        .route(
            "/api/v1/agents/:agent_id/connect",
            get(agent_ws::agent_connect_handler),
        )
        .route("/api/v1/stream", get(stream::stream_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// Starts an Axum HTTP server in a background task and returns the bound
/// address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    use tower_http::cors::{Any, CorsLayer};

    info!("starting API server on {}", config.bind_addr);

    let mut app = build_router(state);

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
