//! WebSocket endpoint for inbound agent connections
//!
//! The credential is checked before the upgrade, so a bad secret is refused
//! with 401 and no session ever exists. After the upgrade the socket task
//! owns the session: it feeds inbound envelopes to the lifecycle manager and
//! waits on the supersession signal in parallel, closing its own socket when
//! a newer connection for the same agent takes over.

use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tracing::{debug, info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::error::HubError;
use crate::lifecycle::Session;
use crate::protocol::{AgentAck, AgentEnvelope};

/// Header carrying the agent's shared secret
pub const AGENT_SECRET_HEADER: &str = "x-agent-secret";

/// WebSocket upgrade handler
///
/// GET /api/v1/agents/{agent_id}/connect
pub async fn agent_connect_handler(
    ws: WebSocketUpgrade,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> ApiResult<Response> {
    let secret = headers
        .get(AGENT_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing agent secret header".to_string()))?;

    let session = state.manager.connect(&agent_id, secret).await?;

    Ok(ws.on_upgrade(move |socket| handle_agent_socket(socket, state, session)))
}

/// Drive one agent connection until the socket closes or the session is
/// superseded
async fn handle_agent_socket(socket: WebSocket, state: ApiState, session: Session) {
    info!("agent {} connected", session.agent_id());

    let (mut sender, mut receiver) = socket.split();
    let mut supersede_rx = session.supersession_signal();

    let reason = loop {
        tokio::select! {
            // A newer connection took over; this socket is closed without
            // starting a grace timer
            _ = supersede_rx.changed() => {
                debug!("agent {} superseded by a newer connection", session.agent_id());
                let _ = sender.send(Message::Close(None)).await;
                return;
            }

            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(ack) = handle_frame(&state, &session, &text).await {
                        let payload = serde_json::to_string(&ack)
                            .expect("ack serialization cannot fail");
                        if sender.send(Message::Text(payload)).await.is_err() {
                            break "send failed";
                        }
                    }
                }

                Some(Ok(Message::Close(_))) => break "close frame",

                // Pongs are handled by axum; binary frames are not part of
                // the protocol
                Some(Ok(_)) => {}

                Some(Err(e)) => {
                    debug!("agent socket error: {e}");
                    break "socket error";
                }

                None => break "stream ended",
            }
        }
    };

    info!("agent {} disconnected ({reason})", session.agent_id());
    state.manager.clone().disconnect(session, reason).await;
}

/// Process one inbound text frame
///
/// Returns the acknowledgment to send back, if any. Every failure here is
/// per-message: the connection always survives.
async fn handle_frame(state: &ApiState, session: &Session, text: &str) -> Option<AgentAck> {
    let envelope: AgentEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("malformed envelope from agent {}: {e}", session.agent_id());
            return Some(AgentAck::Error {
                message: format!("malformed envelope: {e}"),
            });
        }
    };

    let AgentEnvelope::StatusUpdate { payload } = envelope;

    match state
        .manager
        .status_report(session, &payload.service_id, payload.status, &payload.message)
        .await
    {
        Ok(_) => None,

        Err(HubError::Validation(msg)) => Some(AgentAck::Error { message: msg }),

        Err(HubError::TransientStore(e)) => {
            warn!("status report from {} not persisted: {e}", session.agent_id());
            Some(AgentAck::Error {
                message: "status report could not be persisted".to_string(),
            })
        }

        // Superseded session; the close signal is already on its way
        Err(HubError::Conflict(_)) => None,

        Err(e) => {
            warn!("status report from {} failed: {e}", session.agent_id());
            None
        }
    }
}
