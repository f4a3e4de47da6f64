//! Credential verification boundaries
//!
//! Two thin authentication seams, both consumed as traits so the hub never
//! depends on how credentials are managed:
//!
//! - agents present `(agent id, secret)` when opening their connection
//! - streaming clients present a bearer token resolved to an owner identity
//!
//! Account and token management live outside this service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::config::ClientTokenConfig;
use crate::error::{HubError, HubResult};
use crate::storage::StatusStore;

/// Identity attached to a verified agent connection
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub owner_id: i64,
    pub name: String,
}

/// Verifies the credential an agent presents when connecting
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Returns the agent's identity, or `Authentication` for an unknown
    /// agent or a wrong secret. Store failures are surfaced as-is so the
    /// caller can distinguish "bad credential" from "cannot check".
    async fn verify(&self, agent_id: &str, secret: &str) -> HubResult<AgentIdentity>;
}

/// Store-backed verifier comparing against the registered secret
pub struct StoreCredentialVerifier {
    store: Arc<dyn StatusStore>,
}

impl StoreCredentialVerifier {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CredentialVerifier for StoreCredentialVerifier {
    async fn verify(&self, agent_id: &str, secret: &str) -> HubResult<AgentIdentity> {
        let expected = self.store.get_agent_secret(agent_id).await?;

        match expected {
            Some(expected) if expected == secret => {
                // The record must exist when the secret does
                let agent = self
                    .store
                    .get_agent(agent_id)
                    .await?
                    .ok_or_else(|| HubError::Authentication("unknown agent".to_string()))?;

                Ok(AgentIdentity {
                    agent_id: agent.id,
                    owner_id: agent.owner_id,
                    name: agent.name,
                })
            }
            Some(_) => {
                warn!("connection attempt with wrong secret for agent {agent_id}");
                Err(HubError::Authentication("invalid credential".to_string()))
            }
            None => {
                warn!("connection attempt with unknown agent id {agent_id}");
                Err(HubError::Authentication("invalid credential".to_string()))
            }
        }
    }
}

/// Identity attached to a streaming client
#[derive(Debug, Clone, Copy)]
pub struct ClientIdentity {
    pub owner_id: i64,

    /// Staff clients get raw visibility over every agent
    pub staff: bool,
}

/// Resolves streaming-client bearer tokens from the static config table
#[derive(Clone, Default)]
pub struct ClientTokens {
    tokens: HashMap<String, ClientIdentity>,
}

impl ClientTokens {
    pub fn new(configs: &[ClientTokenConfig]) -> Self {
        let tokens = configs
            .iter()
            .map(|c| {
                (
                    c.token.clone(),
                    ClientIdentity {
                        owner_id: c.owner_id,
                        staff: c.staff,
                    },
                )
            })
            .collect();

        Self { tokens }
    }

    pub fn resolve(&self, token: &str) -> Option<ClientIdentity> {
        self.tokens.get(token).copied()
    }
}
