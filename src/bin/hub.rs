use std::sync::Arc;

use clap::Parser;
use sentinel_hub::{
    api::{ApiConfig, ApiState, spawn_api_server},
    auth::{ClientTokens, StoreCredentialVerifier},
    bus::InProcessBus,
    config::{Config, StorageConfig, read_config_file},
    lifecycle::ConnectionManager,
    notify::{NoopDispatcher, NotificationDispatcher, NotifyHandle, WebhookDispatcher},
    router::BroadcastRouter,
    storage::{AgentSeed, MemoryStore, StatusStore},
};
use tracing::{debug, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("sentinel_hub", LevelFilter::TRACE),
        ("hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let store = build_store(&config).await?;
    provision_agents(&config, store.as_ref()).await?;

    let bus = Arc::new(InProcessBus::new(config.bus_capacity));
    let router = BroadcastRouter::new(bus.clone());

    let dispatcher: Arc<dyn NotificationDispatcher> = match &config.notifier {
        Some(notifier) => {
            debug!("webhook notifications enabled ({})", notifier.url);
            Arc::new(WebhookDispatcher::new(notifier.url.clone()))
        }
        None => Arc::new(NoopDispatcher),
    };
    let notify = NotifyHandle::spawn(dispatcher);

    let manager = ConnectionManager::new(
        store.clone(),
        Arc::new(StoreCredentialVerifier::new(store.clone())),
        router,
        notify.clone(),
        config.grace_period(),
    );

    let state = ApiState {
        manager,
        store: store.clone(),
        bus,
        client_tokens: ClientTokens::new(&config.clients),
    };

    let api_config = ApiConfig {
        bind_addr: config.bind_addr,
        enable_cors: true,
    };
    spawn_api_server(api_config, state).await?;

    info!(
        "hub running (grace period: {}s)",
        config.grace_period_secs
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    notify.shutdown().await;
    store.close().await.ok();

    Ok(())
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn StatusStore>> {
    match config.storage.clone().unwrap_or_default() {
        StorageConfig::None => {
            debug!("using in-memory status store");
            Ok(Arc::new(MemoryStore::new()))
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            debug!("using SQLite status store at {}", path.display());
            let store = sentinel_hub::storage::sqlite::SqliteStore::new(&path).await?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("SQLite storage requires the 'storage-sqlite' feature")
        }
    }
}

async fn provision_agents(config: &Config, store: &dyn StatusStore) -> anyhow::Result<()> {
    for agent in &config.agents {
        let record = store
            .upsert_agent(AgentSeed {
                id: agent.id.clone(),
                name: agent.name.clone().unwrap_or_else(|| agent.id.clone()),
                secret: agent.secret.clone(),
                owner_id: agent.owner_id,
            })
            .await?;

        debug!("provisioned agent {} ({})", record.id, record.name);
    }

    if !config.agents.is_empty() {
        info!("provisioned {} agents from config", config.agents.len());
    }

    Ok(())
}
