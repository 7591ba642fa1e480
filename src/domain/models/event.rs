//! The `Event` entity: the only thing the orchestrator ever dispatches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Transaction,
    AuditRecord,
    RegulatoryChange,
    ComplianceSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Normalized ordinal position in `[0, 1]`, used by Audit Intelligence's
    /// severity-distance similarity feature.
    #[must_use]
    pub fn normalized(self) -> f64 {
        match self {
            Self::Low => 0.0,
            Self::Medium => 1.0 / 3.0,
            Self::High => 2.0 / 3.0,
            Self::Critical => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub system: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub origin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub severity: Severity,
    pub source: EventSource,
    pub description: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    /// Validate an `Event`'s basic shape: a non-nil `event_id` and a
    /// non-empty description. Uniqueness and the
    /// monotonic-per-source `occurred_at` invariant are enforced by the
    /// persistence layer (they require looking at other rows), not here.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_id.is_nil() {
            return Err(ValidationError::MissingField {
                field: "event_id".into(),
            });
        }
        if self.description.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "description".into(),
            });
        }
        Ok(())
    }

    /// Convenience accessor into `metadata`, used throughout the agent
    /// pipeline (`customer_id`, `amount`, `destination_country`, ...).
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(Value::as_f64)
    }

    /// Scan `event_type`'s textual representation for the risk tokens used
    /// in the common risk-score formula.
    #[must_use]
    pub fn event_type_token_risk(&self) -> f64 {
        let haystack = format!("{:?} {}", self.event_type, self.description).to_uppercase();
        if haystack.contains("FRAUD") || haystack.contains("BREACH") {
            0.7
        } else if haystack.contains("VIOLATION") || haystack.contains("NON_COMPLIANCE")
            || haystack.contains("NON-COMPLIANCE")
        {
            0.5
        } else if haystack.contains("SUSPICIOUS") || haystack.contains("ANOMALY") {
            0.3
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event {
            event_id: Uuid::new_v4(),
            event_type: EventType::Transaction,
            severity: Severity::Low,
            source: EventSource {
                system: "core-banking".into(),
                kind: "payment".into(),
                origin: "api".into(),
            },
            description: "domestic transfer".into(),
            metadata: HashMap::new(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn nil_event_id_rejected() {
        let mut e = sample();
        e.event_id = Uuid::nil();
        assert!(e.validate().is_err());
    }

    #[test]
    fn token_risk_scan() {
        let mut e = sample();
        e.description = "possible FRAUD ring".into();
        assert_eq!(e.event_type_token_risk(), 0.7);

        let mut e2 = sample();
        e2.description = "SUSPICIOUS login pattern".into();
        assert_eq!(e2.event_type_token_risk(), 0.3);
    }
}
