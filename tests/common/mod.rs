//! Shared fixtures for black-box integration tests.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use compliance_core::domain::models::{
    AmlStatus, Event, EventSource, EventType, Severity,
};
use compliance_core::domain::ports::PersistenceAdapter;
use compliance_core::infrastructure::database::DatabaseConnection;
use compliance_core::services::config::DatabaseConfig;

/// A fresh in-memory database with migrations applied.
pub async fn setup_test_db() -> SqlitePool {
    let conn = DatabaseConnection::new(&DatabaseConfig {
        url: "sqlite::memory:".into(),
        ..DatabaseConfig::default()
    })
    .await
    .expect("failed to create test database");
    conn.migrate().await.expect("failed to run migrations");
    conn.pool().clone()
}

pub async fn seed_customer(
    pool: &SqlitePool,
    customer_id: &str,
    aml_status: AmlStatus,
    daily_limit: f64,
    usual_countries: &[&str],
) {
    let usual = serde_json::to_string(usual_countries).unwrap();
    let aml = match aml_status {
        AmlStatus::Clear => "clear",
        AmlStatus::Watch => "watch",
        AmlStatus::HighRisk => "high_risk",
        AmlStatus::Blocked => "blocked",
    };
    sqlx::query(
        "INSERT INTO customer_profiles (customer_id, aml_status, daily_limit, risk_profile, usual_countries, kyc_verified) \
         VALUES (?, ?, ?, 0.1, ?, 1)",
    )
    .bind(customer_id)
    .bind(aml)
    .bind(daily_limit)
    .bind(usual)
    .execute(pool)
    .await
    .expect("failed to seed customer");
}

pub async fn seed_transaction(
    pool: &SqlitePool,
    customer_id: &str,
    amount: f64,
    timestamp: chrono::DateTime<Utc>,
) {
    sqlx::query(
        "INSERT INTO transactions (transaction_id, customer_id, amount, timestamp, destination_country, event_type) \
         VALUES (?, ?, ?, ?, NULL, 'TRANSACTION')",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(customer_id)
    .bind(amount)
    .bind(timestamp)
    .execute(pool)
    .await
    .expect("failed to seed transaction");
}

/// Build a `TRANSACTION` event with the given metadata (customer_id,
/// amount, and any additional key/value pairs serialized as strings or
/// numbers).
#[must_use]
pub fn transaction_event(severity: Severity, metadata: Vec<(&str, serde_json::Value)>) -> Event {
    Event {
        event_id: Uuid::new_v4(),
        event_type: EventType::Transaction,
        severity,
        source: EventSource {
            system: "core-banking".into(),
            kind: "payment".into(),
            origin: "api".into(),
        },
        description: "transaction event".into(),
        metadata: metadata.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        occurred_at: Utc::now(),
    }
}

