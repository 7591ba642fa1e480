//! Persistence port for `agent_configurations`.

use async_trait::async_trait;

use crate::domain::errors::PersistenceError;
use crate::domain::ports::agent::AgentConfigOverrides;

#[async_trait]
pub trait AgentConfigRepository: Send + Sync {
    async fn get_overrides(&self, agent_id: &str) -> Result<AgentConfigOverrides, PersistenceError>;
    async fn set_overrides(
        &self,
        agent_id: &str,
        overrides: &AgentConfigOverrides,
    ) -> Result<(), PersistenceError>;
}
