//! Read-only ports for `customer_profiles` / `transactions` /
//! `transaction_risk_assessments`. Agents never write through these.

use async_trait::async_trait;

use crate::domain::errors::PersistenceError;
use crate::domain::models::{CustomerProfile, TransactionHistory};

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn get_profile(&self, customer_id: &str) -> Result<Option<CustomerProfile>, PersistenceError>;

    async fn get_transaction_history(
        &self,
        customer_id: &str,
        window: chrono::Duration,
    ) -> Result<TransactionHistory, PersistenceError>;

    async fn update_risk_profile(&self, customer_id: &str, new_risk: f64) -> Result<(), PersistenceError>;
}
