//! Read-only `sqlx`-backed `CustomerRepository`, backed by
//! `customer_profiles` / `transactions`. Agents only read through this;
//! the one write path is the EMA risk-profile update after an escalation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::PersistenceError;
use crate::domain::models::{AmlStatus, CustomerProfile, TransactionHistory, TransactionRecord};
use crate::domain::ports::CustomerRepository;

pub struct SqliteCustomerRepository {
    pool: SqlitePool,
}

impl SqliteCustomerRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn query_failed(err: sqlx::Error) -> PersistenceError {
    PersistenceError::QueryFailed(err.to_string())
}

#[derive(sqlx::FromRow)]
struct CustomerProfileRow {
    customer_id: String,
    aml_status: String,
    daily_limit: f64,
    risk_profile: f64,
    usual_countries: String,
    kyc_verified: bool,
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    amount: f64,
    timestamp: DateTime<Utc>,
    destination_country: Option<String>,
    event_type: String,
}

#[async_trait]
impl CustomerRepository for SqliteCustomerRepository {
    async fn get_profile(&self, customer_id: &str) -> Result<Option<CustomerProfile>, PersistenceError> {
        let row: Option<CustomerProfileRow> = sqlx::query_as(
            "SELECT customer_id, aml_status, daily_limit, risk_profile, usual_countries, kyc_verified FROM customer_profiles WHERE customer_id = ?",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        let Some(row) = row else { return Ok(None) };
        let usual_countries: Vec<String> = serde_json::from_str(&row.usual_countries).map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;

        Ok(Some(CustomerProfile {
            customer_id: row.customer_id,
            aml_status: aml_status_from_str(&row.aml_status),
            daily_limit: row.daily_limit,
            risk_profile: row.risk_profile,
            usual_countries,
            kyc_verified: row.kyc_verified,
        }))
    }

    async fn get_transaction_history(&self, customer_id: &str, window: chrono::Duration) -> Result<TransactionHistory, PersistenceError> {
        let cutoff = Utc::now() - window;
        let rows: Vec<TransactionRow> = sqlx::query_as(
            "SELECT amount, timestamp, destination_country, event_type FROM transactions WHERE customer_id = ? AND timestamp >= ? ORDER BY timestamp ASC",
        )
        .bind(customer_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(TransactionHistory {
            records: rows
                .into_iter()
                .map(|r| TransactionRecord {
                    amount: r.amount,
                    timestamp: r.timestamp,
                    destination_country: r.destination_country,
                    event_type: r.event_type,
                })
                .collect(),
        })
    }

    async fn update_risk_profile(&self, customer_id: &str, new_risk: f64) -> Result<(), PersistenceError> {
        let result = sqlx::query("UPDATE customer_profiles SET risk_profile = ? WHERE customer_id = ?")
            .bind(new_risk)
            .bind(customer_id)
            .execute(&self.pool)
            .await
            .map_err(query_failed)?;
        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(format!("customer {customer_id}")));
        }
        Ok(())
    }
}

fn aml_status_from_str(s: &str) -> AmlStatus {
    match s {
        "watch" => AmlStatus::Watch,
        "high_risk" => AmlStatus::HighRisk,
        "blocked" => AmlStatus::Blocked,
        _ => AmlStatus::Clear,
    }
}
