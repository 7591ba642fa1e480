//! The `Decision` entity: one agent's verdict on one event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use super::confidence::Confidence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    Approve,
    Deny,
    Escalate,
    Investigate,
    Alert,
    Monitor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningFactor {
    pub factor: String,
    pub evidence: String,
    pub weight: f64,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionPriority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub action_type: String,
    pub description: String,
    pub priority: ActionPriority,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
}

impl RecommendedAction {
    #[must_use]
    pub fn new(action_type: impl Into<String>, description: impl Into<String>, priority: ActionPriority) -> Self {
        Self {
            action_type: action_type.into(),
            description: description.into(),
            priority,
            deadline: None,
            parameters: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            Self::High
        } else if score >= 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<String>,
    pub assessment_time: DateTime<Utc>,
}

impl RiskAssessment {
    #[must_use]
    pub fn new(risk_score: f64, risk_factors: Vec<String>) -> Self {
        let risk_score = risk_score.clamp(0.0, 1.0);
        Self {
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            risk_factors,
            assessment_time: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: Uuid,
    pub event_id: Uuid,
    pub agent_id: String,
    #[serde(rename = "type")]
    pub decision_type: DecisionType,
    pub confidence: Confidence,
    pub reasoning: Vec<ReasoningFactor>,
    pub actions: Vec<RecommendedAction>,
    pub risk_assessment: RiskAssessment,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    /// `D.risk_assessment.risk_score in [0,1]` quantified
    /// invariant, checked at construction so it can never be violated once
    /// a `Decision` exists.
    #[must_use]
    pub fn new(
        event_id: Uuid,
        agent_id: impl Into<String>,
        decision_type: DecisionType,
        confidence: Confidence,
        reasoning: Vec<ReasoningFactor>,
        actions: Vec<RecommendedAction>,
        risk_assessment: RiskAssessment,
    ) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            event_id,
            agent_id: agent_id.into(),
            decision_type,
            confidence,
            reasoning,
            actions,
            risk_assessment,
            created_at: Utc::now(),
        }
    }
}
