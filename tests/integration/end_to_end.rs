//! Full-stack tests: real server, WebSocket agent, SSE subscriber

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use sentinel_hub::api::{ApiConfig, ApiState, spawn_api_server};
use sentinel_hub::auth::{ClientTokens, StoreCredentialVerifier};
use sentinel_hub::bus::InProcessBus;
use sentinel_hub::config::ClientTokenConfig;
use sentinel_hub::lifecycle::ConnectionManager;
use sentinel_hub::notify::{NoopDispatcher, NotifyHandle};
use sentinel_hub::router::BroadcastRouter;
use sentinel_hub::storage::{MemoryStore, StatusStore};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::helpers::*;

const CLIENT_TOKEN: &str = "client-token";

async fn start_hub(grace: Duration) -> (SocketAddr, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    register_agent(&store, "a1", 7).await;

    let bus = Arc::new(InProcessBus::new(64));
    let manager = ConnectionManager::new(
        store.clone(),
        Arc::new(StoreCredentialVerifier::new(store.clone())),
        BroadcastRouter::new(bus.clone()),
        NotifyHandle::spawn(Arc::new(NoopDispatcher)),
        grace,
    );

    let state = ApiState {
        manager,
        store: store.clone(),
        bus,
        client_tokens: ClientTokens::new(&[ClientTokenConfig {
            token: CLIENT_TOKEN.to_string(),
            owner_id: 7,
            staff: false,
        }]),
    };

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        enable_cors: false,
    };

    let addr = spawn_api_server(config, state).await.unwrap();
    (addr, store)
}

async fn connect_agent(
    addr: SocketAddr,
    agent_id: &str,
    secret: &str,
) -> Result<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    WsError,
> {
    let mut request = format!("ws://{addr}/api/v1/agents/{agent_id}/connect")
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("x-agent-secret", secret.parse().unwrap());

    let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(socket)
}

/// Read SSE frames from a streaming response, skipping keep-alive comments
struct SseReader {
    response: reqwest::Response,
    buffer: String,
}

impl SseReader {
    async fn open(addr: SocketAddr, token: &str) -> Self {
        let response = reqwest::Client::new()
            .get(format!("http://{addr}/api/v1/stream"))
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .unwrap();

        assert!(response.status().is_success());

        Self {
            response,
            buffer: String::new(),
        }
    }

    async fn next_frame(&mut self) -> serde_json::Value {
        loop {
            if let Some(pos) = self.buffer.find("\n\n") {
                let frame = self.buffer[..pos].to_string();
                self.buffer.drain(..pos + 2);

                let data: Vec<&str> = frame
                    .lines()
                    .filter_map(|line| line.strip_prefix("data: "))
                    .collect();
                if data.is_empty() {
                    // keep-alive comment
                    continue;
                }

                return serde_json::from_str(&data.join("\n")).unwrap();
            }

            let chunk = self
                .response
                .chunk()
                .await
                .unwrap()
                .expect("stream ended unexpectedly");
            self.buffer.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }
}

async fn expect_frame(reader: &mut SseReader) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), reader.next_frame())
        .await
        .expect("no SSE frame within timeout")
}

#[tokio::test]
async fn test_agent_report_reaches_subscriber() {
    let (addr, _store) = start_hub(Duration::from_millis(200)).await;

    let mut agent = connect_agent(addr, "a1", SECRET).await.unwrap();
    let mut reader = SseReader::open(addr, CLIENT_TOKEN).await;

    // First frame is always the snapshot
    let first = expect_frame(&mut reader).await;
    assert_eq!(first["type"], "initial_state");
    assert_eq!(first["agents"][0]["id"], "a1");

    // The connect transition follows (published before the subscription in
    // rare interleavings; tolerate it being absent)
    agent
        .send(Message::Text(
            r#"{"type":"status_update","payload":{"service_id":"disk","status":"ok","message":"healthy"}}"#
                .to_string(),
        ))
        .await
        .unwrap();

    let frame = loop {
        let frame = expect_frame(&mut reader).await;
        if frame["type"] == "service_status" {
            break frame;
        }
    };

    assert_eq!(frame["agent_id"], "a1");
    assert_eq!(frame["payload"]["agent_service_id"], "disk");
    assert_eq!(frame["payload"]["last_status"], "ok");
    assert_eq!(frame["payload"]["last_message"], "healthy");
}

#[tokio::test]
async fn test_bad_agent_secret_is_refused() {
    let (addr, _store) = start_hub(Duration::from_millis(200)).await;

    let result = connect_agent(addr, "a1", "wrong").await;

    match result {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected HTTP 401 rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_requires_token() {
    let (addr, _store) = start_hub(Duration::from_millis(200)).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/api/v1/stream"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/api/v1/stream"))
        .header("Authorization", "Bearer nope")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_malformed_envelope_keeps_connection_open() {
    let (addr, store) = start_hub(Duration::from_millis(200)).await;

    let mut agent = connect_agent(addr, "a1", SECRET).await.unwrap();

    agent
        .send(Message::Text("not json at all".to_string()))
        .await
        .unwrap();

    // An error acknowledgment comes back on the same connection
    let reply = tokio::time::timeout(Duration::from_secs(5), agent.next())
        .await
        .expect("no ack within timeout")
        .unwrap()
        .unwrap();

    let ack: serde_json::Value = match reply {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected text ack, got {other:?}"),
    };
    assert_eq!(ack["type"], "error");

    // The connection survived: a valid report still goes through
    agent
        .send(Message::Text(
            r#"{"type":"status_update","payload":{"service_id":"disk","status":"warning","message":""}}"#
                .to_string(),
        ))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let services = store.list_services(&["a1".to_string()]).await.unwrap();
    assert_eq!(services.len(), 1);
}

#[tokio::test]
async fn test_new_connection_supersedes_old_socket() {
    let (addr, _store) = start_hub(Duration::from_millis(200)).await;

    let mut first = connect_agent(addr, "a1", SECRET).await.unwrap();
    let _second = connect_agent(addr, "a1", SECRET).await.unwrap();

    // The superseded socket is closed by the server
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;

    assert!(closed.is_ok(), "superseded socket was not closed");
}

#[tokio::test]
async fn test_health_endpoint_reports_store() {
    let (addr, _store) = start_hub(Duration::from_millis(200)).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/api/v1/health"))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}
