//! SQLite status store implementation
//!
//! ## Features
//!
//! - **Embedded**: no separate database server required
//! - **WAL mode**: concurrent reads while the lifecycle manager writes
//! - **Connection pooling**: one pool shared by every connection task
//! - **Migrations**: automatic schema versioning with sqlx
//!
//! Timestamps are stored as Unix milliseconds so range comparisons stay
//! integer comparisons.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use crate::protocol::ServiceStatus;

use super::backend::{HealthStatus, StatusStore};
use super::error::{StorageError, StorageResult};
use super::schema::{AgentRecord, AgentSeed, ServiceRecord, ServiceUpsert};

/// SQLite-backed status store
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database file and run migrations
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: Option<i64>) -> Option<DateTime<Utc>> {
        millis.and_then(DateTime::from_timestamp_millis)
    }

    fn agent_from_row(row: &sqlx::sqlite::SqliteRow) -> AgentRecord {
        AgentRecord {
            id: row.get("id"),
            name: row.get("name"),
            owner_id: row.get("owner_id"),
            is_online: row.get::<i64, _>("is_online") != 0,
            last_seen: Self::millis_to_timestamp(row.get("last_seen")),
        }
    }

    fn service_from_row(row: &sqlx::sqlite::SqliteRow) -> ServiceRecord {
        let status: String = row.get("last_status");

        ServiceRecord {
            id: row.get("id"),
            agent_id: row.get("agent_id"),
            agent_service_id: row.get("agent_service_id"),
            last_status: ServiceStatus::from_stored(&status),
            last_message: row.get("last_message"),
            last_seen: Self::millis_to_timestamp(row.get("last_seen")),
        }
    }

    async fn fetch_agent(&self, agent_id: &str) -> StorageResult<Option<AgentRecord>> {
        let row = sqlx::query(
            "SELECT id, name, owner_id, is_online, last_seen FROM agents WHERE id = ?",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::agent_from_row))
    }
}

#[async_trait]
impl StatusStore for SqliteStore {
    #[instrument(skip(self, seed), fields(agent_id = %seed.id))]
    async fn upsert_agent(&self, seed: AgentSeed) -> StorageResult<AgentRecord> {
        sqlx::query(
            r#"
            INSERT INTO agents (id, name, secret, owner_id, is_online, last_seen)
            VALUES (?, ?, ?, ?, 0, NULL)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                secret = excluded.secret,
                owner_id = excluded.owner_id
            "#,
        )
        .bind(&seed.id)
        .bind(&seed.name)
        .bind(&seed.secret)
        .bind(seed.owner_id)
        .execute(&self.pool)
        .await?;

        self.fetch_agent(&seed.id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("agent {}", seed.id)))
    }

    async fn get_agent(&self, agent_id: &str) -> StorageResult<Option<AgentRecord>> {
        self.fetch_agent(agent_id).await
    }

    async fn get_agent_secret(&self, agent_id: &str) -> StorageResult<Option<String>> {
        let row = sqlx::query("SELECT secret FROM agents WHERE id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("secret")))
    }

    #[instrument(skip(self))]
    async fn set_agent_online(
        &self,
        agent_id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> StorageResult<AgentRecord> {
        let result = sqlx::query("UPDATE agents SET is_online = ?, last_seen = ? WHERE id = ?")
            .bind(is_online as i64)
            .bind(Self::timestamp_to_millis(&last_seen))
            .bind(agent_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("agent {}", agent_id)));
        }

        self.fetch_agent(agent_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("agent {}", agent_id)))
    }

    async fn touch_agent(&self, agent_id: &str, last_seen: DateTime<Utc>) -> StorageResult<()> {
        let result = sqlx::query("UPDATE agents SET last_seen = ? WHERE id = ?")
            .bind(Self::timestamp_to_millis(&last_seen))
            .bind(agent_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("agent {}", agent_id)));
        }

        Ok(())
    }

    #[instrument(skip(self, upsert), fields(agent_id = %upsert.agent_id, service = %upsert.agent_service_id))]
    async fn upsert_service(&self, upsert: ServiceUpsert) -> StorageResult<ServiceRecord> {
        let last_seen = Self::timestamp_to_millis(&upsert.last_seen);

        let result = sqlx::query(
            r#"
            INSERT INTO services (agent_id, agent_service_id, last_status, last_message, last_seen)
            SELECT ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM agents WHERE id = ?)
            ON CONFLICT (agent_id, agent_service_id) DO UPDATE SET
                last_status = excluded.last_status,
                last_message = excluded.last_message,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(&upsert.agent_id)
        .bind(&upsert.agent_service_id)
        .bind(upsert.status.as_str())
        .bind(&upsert.message)
        .bind(last_seen)
        .bind(&upsert.agent_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("agent {}", upsert.agent_id)));
        }

        let row = sqlx::query(
            r#"
            SELECT id, agent_id, agent_service_id, last_status, last_message, last_seen
            FROM services
            WHERE agent_id = ? AND agent_service_id = ?
            "#,
        )
        .bind(&upsert.agent_id)
        .bind(&upsert.agent_service_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Self::service_from_row(&row))
    }

    async fn list_agents(&self, owner_id: Option<i64>) -> StorageResult<Vec<AgentRecord>> {
        let rows = match owner_id {
            Some(owner) => {
                sqlx::query(
                    "SELECT id, name, owner_id, is_online, last_seen FROM agents \
                     WHERE owner_id = ? ORDER BY name, id",
                )
                .bind(owner)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, name, owner_id, is_online, last_seen FROM agents ORDER BY name, id",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(Self::agent_from_row).collect())
    }

    async fn list_services(&self, agent_ids: &[String]) -> StorageResult<Vec<ServiceRecord>> {
        if agent_ids.is_empty() {
            return Ok(Vec::new());
        }

        // One IN query for the whole agent set; sqlx has no array binding
        // for SQLite, so the placeholder list is built from the id count.
        let placeholders = vec!["?"; agent_ids.len()].join(", ");
        let sql = format!(
            "SELECT id, agent_id, agent_service_id, last_status, last_message, last_seen \
             FROM services WHERE agent_id IN ({}) ORDER BY agent_id, agent_service_id",
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for agent_id in agent_ids {
            query = query.bind(agent_id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(Self::service_from_row).collect())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let agents: i64 = sqlx::query("SELECT COUNT(*) AS count FROM agents")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        Ok(HealthStatus {
            healthy: true,
            message: format!("SQLite: {} agents at {}", agents, self.db_path),
            metadata: HashMap::from([
                ("backend".to_string(), "sqlite".to_string()),
                ("path".to_string(), self.db_path.clone()),
                ("agents".to_string(), agents.to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing SQLite pool");
        self.pool.close().await;
        Ok(())
    }
}
