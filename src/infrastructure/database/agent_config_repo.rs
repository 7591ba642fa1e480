//! `sqlx`-backed `AgentConfigRepository`, backed by `agent_configurations`.
//! Overrides are stored as a single JSON object column, keyed by
//! `agent_id`; a missing row is simply an empty override set.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::PersistenceError;
use crate::domain::ports::{AgentConfigOverrides, AgentConfigRepository};

pub struct SqliteAgentConfigRepository {
    pool: SqlitePool,
}

impl SqliteAgentConfigRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn query_failed(err: sqlx::Error) -> PersistenceError {
    PersistenceError::QueryFailed(err.to_string())
}

#[async_trait]
impl AgentConfigRepository for SqliteAgentConfigRepository {
    async fn get_overrides(&self, agent_id: &str) -> Result<AgentConfigOverrides, PersistenceError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT overrides FROM agent_configurations WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed)?;

        let Some((overrides,)) = row else {
            return Ok(AgentConfigOverrides::default());
        };

        let values = serde_json::from_str(&overrides).map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
        Ok(AgentConfigOverrides { values })
    }

    async fn set_overrides(&self, agent_id: &str, overrides: &AgentConfigOverrides) -> Result<(), PersistenceError> {
        let serialized = serde_json::to_string(&overrides.values).map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
        sqlx::query(
            r"INSERT INTO agent_configurations (agent_id, overrides) VALUES (?, ?)
              ON CONFLICT(agent_id) DO UPDATE SET overrides = excluded.overrides",
        )
        .bind(agent_id)
        .bind(serialized)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;
        Ok(())
    }
}
