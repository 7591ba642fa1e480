//! External read models consulted by agents. Agents never write these —
//! they are owned by the banking/core system of record and only read here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmlStatus {
    Clear,
    Watch,
    HighRisk,
    Blocked,
}

impl AmlStatus {
    #[must_use]
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Blocked | Self::HighRisk)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub customer_id: String,
    pub aml_status: AmlStatus,
    pub daily_limit: f64,
    /// Rolling EMA risk score updated by `TransactionGuardian::
    /// update_customer_risk_profile` after every escalation.
    pub risk_profile: f64,
    pub usual_countries: Vec<String>,
    pub kyc_verified: bool,
}

impl CustomerProfile {
    /// Conservative fallback used when the circuit breaker guarding the
    /// customer-profile read is open.
    #[must_use]
    pub fn fallback(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            aml_status: AmlStatus::Watch,
            daily_limit: 0.0,
            risk_profile: 0.5,
            usual_countries: Vec::new(),
            kyc_verified: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub destination_country: Option<String>,
    pub event_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionHistory {
    pub records: Vec<TransactionRecord>,
}

impl TransactionHistory {
    #[must_use]
    pub fn mean_amount(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        self.records.iter().map(|r| r.amount).sum::<f64>() / self.records.len() as f64
    }

    /// Count of records within `window` of `now`, used for velocity
    /// banding.
    #[must_use]
    pub fn count_within(&self, now: DateTime<Utc>, window: chrono::Duration) -> usize {
        let cutoff = now - window;
        self.records.iter().filter(|r| r.timestamp >= cutoff).count()
    }
}
