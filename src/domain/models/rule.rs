//! `Rule`, `RuleResult`, `EvaluationContext`, `EvaluationBatch`: the data
//! model the Advanced Rule Engine owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::errors::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleCategory {
    FraudDetection,
    ComplianceCheck,
    RiskAssessment,
    BusinessLogic,
    SecurityPolicy,
    AuditProcedure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Deny,
    Escalate,
    Monitor,
    Alert,
    Quarantine,
}

/// Supported condition operators. An operator not recognized at
/// deserialization time still parses (falls into `Unknown`) so that an
/// evaluation never throws — it simply never matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Regex,
    InArray,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Dot-notation path into the entity's data, e.g. `"customer.aml_status"`.
    pub field_path: String,
    pub operator: ConditionOperator,
    pub value: Value,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub name: String,
    pub category: RuleCategory,
    pub severity: RuleSeverity,
    pub conditions: Vec<RuleCondition>,
    pub action: RuleAction,
    pub threshold_score: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Validation run on create/update: at least one
    /// condition, non-empty id/name, threshold in `[0, 1]`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.rule_id.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "rule_id".into(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "name".into(),
            });
        }
        if self.conditions.is_empty() {
            return Err(ValidationError::NoConditions {
                rule_id: self.rule_id.clone(),
            });
        }
        if !(0.0..=1.0).contains(&self.threshold_score) {
            return Err(ValidationError::OutOfRange {
                field: "threshold_score".into(),
                value: self.threshold_score,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationContext {
    pub entity_id: String,
    pub entity_type: String,
    pub data: Value,
    pub source_system: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl EvaluationContext {
    #[must_use]
    pub fn new(entity_id: impl Into<String>, entity_type: impl Into<String>, data: Value) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            data,
            source_system: String::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    pub evaluation_id: uuid::Uuid,
    pub rule_id: String,
    pub entity_id: String,
    pub score: f64,
    pub triggered: bool,
    pub action: RuleAction,
    pub matched_conditions: Vec<String>,
    pub condition_scores: HashMap<String, f64>,
    pub processing_time: chrono::Duration,
    pub evaluated_at: DateTime<Utc>,
}

impl RuleResult {
    /// The untriggered, `ALLOW` result used when no enabled rule exists or
    /// none triggered.
    #[must_use]
    pub fn none_triggered(entity_id: impl Into<String>, processing_time: chrono::Duration) -> Self {
        Self {
            evaluation_id: uuid::Uuid::new_v4(),
            rule_id: String::new(),
            entity_id: entity_id.into(),
            score: 0.0,
            triggered: false,
            action: RuleAction::Allow,
            matched_conditions: Vec::new(),
            condition_scores: HashMap::new(),
            processing_time,
            evaluated_at: Utc::now(),
        }
    }
}

/// Cumulative per-rule counters exposed by `RuleEngine::get_rule_execution_stats`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RuleExecutionStats {
    pub evaluations: u64,
    pub triggers: u64,
    pub total_processing_time: chrono::Duration,
}

impl Default for RuleExecutionStats {
    fn default() -> Self {
        Self {
            evaluations: 0,
            triggers: 0,
            total_processing_time: chrono::Duration::zero(),
        }
    }
}

impl RuleExecutionStats {
    #[must_use]
    pub fn average_processing_time(&self) -> chrono::Duration {
        if self.evaluations == 0 {
            return chrono::Duration::zero();
        }
        self.total_processing_time / i32::try_from(self.evaluations).unwrap_or(i32::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationBatch {
    pub batch_id: uuid::Uuid,
    pub results: Vec<RuleResult>,
    pub total_processing_time: chrono::Duration,
    pub rules_evaluated: usize,
    pub rules_triggered: usize,
}
