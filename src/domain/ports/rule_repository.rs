//! Persistence port for `advanced_rules` / `rule_evaluation_results`.

use async_trait::async_trait;

use crate::domain::errors::PersistenceError;
use crate::domain::models::{Rule, RuleResult};

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn upsert_rule(&self, rule: &Rule) -> Result<(), PersistenceError>;
    async fn delete_rule(&self, rule_id: &str) -> Result<(), PersistenceError>;
    async fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<(), PersistenceError>;
    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>, PersistenceError>;
    async fn load_all(&self) -> Result<Vec<Rule>, PersistenceError>;
    async fn save_result(&self, result: &RuleResult) -> Result<(), PersistenceError>;
}
