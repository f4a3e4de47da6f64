use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./hub.db")
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Address the API server binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Seconds between a raw disconnect and a confirmed offline transition.
    /// Zero disables debouncing. An operational default, not tuned law.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Per-subscriber event ring capacity on the in-process bus
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    /// Webhook receiving connectivity-change notifications
    pub notifier: Option<NotifierConfig>,

    /// Agents provisioned at startup
    #[serde(default)]
    pub agents: Vec<AgentProvisionConfig>,

    /// Bearer tokens accepted on the streaming endpoint
    #[serde(default)]
    pub clients: Vec<ClientTokenConfig>,
}

impl Config {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NotifierConfig {
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AgentProvisionConfig {
    pub id: String,
    pub name: Option<String>,
    pub secret: String,
    pub owner_id: i64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ClientTokenConfig {
    pub token: String,
    pub owner_id: i64,
    #[serde(default)]
    pub staff: bool,
}

fn default_bind_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().expect("valid literal address")
}

fn default_grace_period_secs() -> u64 {
    5
}

fn default_bus_capacity() -> usize {
    256
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
