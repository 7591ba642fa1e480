//! SQLite connection pool: WAL mode, foreign keys on, a bounded pool,
//! and startup migrations.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::errors::PersistenceError;
use crate::domain::ports::PersistenceAdapter;
use crate::services::config::DatabaseConfig;

pub struct DatabaseConnection {
    pool: SqlitePool,
    max_connections: u32,
}

impl DatabaseConnection {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| PersistenceError::QueryFailed(format!("invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(config.max_lifetime_seconds))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect_with(options)
            .await
            .map_err(|e| PersistenceError::QueryFailed(format!("failed to create connection pool: {e}")))?;

        Ok(Self {
            pool,
            max_connections: config.max_connections,
        })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceAdapter for DatabaseConnection {
    async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PersistenceError::MigrationFailed(e.to_string()))
    }

    fn in_use_connections(&self) -> u32 {
        self.pool.size() - self.pool.num_idle() as u32
    }

    fn max_connections(&self) -> u32 {
        self.max_connections
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
