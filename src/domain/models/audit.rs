//! `AuditTrail` / `AuditStep` / `Explanation`: the append-only reasoning
//! record behind every `Decision`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use super::confidence::Confidence;
use super::decision::RiskAssessment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    DecisionStarted,
    DataRetrieval,
    PatternAnalysis,
    RiskAssessment,
    KnowledgeQuery,
    LlmInference,
    RuleEvaluation,
    ConfidenceCalculation,
    DecisionFinalized,
    HumanReviewRequested,
    HumanFeedbackReceived,
}

impl AuditEventType {
    /// Base confidence-impact factor per step type. These
    /// are the *unscaled* factors; `AuditTrailManager::confidence_impact`
    /// applies the output-quality and reliability multipliers on top.
    #[must_use]
    pub fn base_confidence_factor(self) -> f64 {
        match self {
            Self::DataRetrieval => 0.05,
            Self::PatternAnalysis => 0.15,
            Self::RiskAssessment => 0.20,
            Self::ConfidenceCalculation => 0.25,
            Self::HumanFeedbackReceived => 0.30,
            Self::HumanReviewRequested => -0.10,
            Self::KnowledgeQuery | Self::RuleEvaluation | Self::LlmInference => 0.10,
            Self::DecisionStarted | Self::DecisionFinalized => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStep {
    pub step_id: Uuid,
    pub trail_id: Uuid,
    pub event_type: AuditEventType,
    pub description: String,
    #[serde(default)]
    pub input_data: Value,
    #[serde(default)]
    pub output_data: Value,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Wall-clock duration of the step.
    pub processing_time: chrono::Duration,
    /// Derived, never supplied directly by the caller: clamped to
    /// `[-0.5, 0.5]` by construction.
    pub confidence_impact: f64,
    pub timestamp: DateTime<Utc>,
}

impl AuditStep {
    #[must_use]
    pub fn new(
        trail_id: Uuid,
        event_type: AuditEventType,
        description: impl Into<String>,
        input_data: Value,
        output_data: Value,
        metadata: HashMap<String, Value>,
        processing_time: chrono::Duration,
        confidence_impact: f64,
    ) -> Self {
        Self {
            step_id: Uuid::new_v4(),
            trail_id,
            event_type,
            description: description.into(),
            input_data,
            output_data,
            metadata,
            processing_time,
            confidence_impact: confidence_impact.clamp(-0.5, 0.5),
            timestamp: Utc::now(),
        }
    }

    /// `true` when this step recorded a circuit-breaker fallback in its
    /// metadata. Distinct from [`Self::is_timeout`], which is its own
    /// `status` value; use [`Self::is_degraded`] where either counts.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.metadata
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s == "fallback")
            .unwrap_or(false)
    }

    /// `true` when this step missed its per-step deadline.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.metadata
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s == "timeout")
            .unwrap_or(false)
    }

    /// `true` when the step degraded in either way a circuit breaker can
    /// force it to: an ordinary fallback or a missed deadline.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.is_fallback() || self.is_timeout()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditTrail {
    pub trail_id: Uuid,
    pub decision_id: Uuid,
    pub agent_type: String,
    pub agent_name: String,
    pub trigger_event: Uuid,
    pub original_input: Value,
    pub steps: Vec<AuditStep>,
    pub final_decision: Option<Value>,
    pub final_confidence: Option<Confidence>,
    pub decision_tree: Option<Value>,
    pub risk_assessment: Option<RiskAssessment>,
    pub alternative_options: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_processing_time: Option<chrono::Duration>,
    pub requires_human_review: bool,
    pub human_review_reason: Option<String>,
    pub human_feedback: Option<HumanFeedback>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanFeedback {
    pub reviewer_id: String,
    pub feedback: String,
    pub approved: bool,
    pub reviewed_at: DateTime<Utc>,
}

impl AuditTrail {
    #[must_use]
    pub fn new(
        agent_type: impl Into<String>,
        agent_name: impl Into<String>,
        trigger_event: Uuid,
        original_input: Value,
    ) -> Self {
        Self {
            trail_id: Uuid::new_v4(),
            decision_id: Uuid::new_v4(),
            agent_type: agent_type.into(),
            agent_name: agent_name.into(),
            trigger_event,
            original_input,
            steps: Vec::new(),
            final_decision: None,
            final_confidence: None,
            decision_tree: None,
            risk_assessment: None,
            alternative_options: None,
            started_at: Utc::now(),
            completed_at: None,
            total_processing_time: None,
            requires_human_review: false,
            human_review_reason: None,
            human_feedback: None,
        }
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }

    /// `true` iff `len(steps) >= 2` and step timestamps are monotonically
    /// non-decreasing — the shape every finalized trail must hold.
    #[must_use]
    pub fn steps_well_formed(&self) -> bool {
        self.steps.len() >= 2
            && self
                .steps
                .windows(2)
                .all(|w| w[0].timestamp <= w[1].timestamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExplanationLevel {
    HighLevel,
    Detailed,
    Technical,
    Debug,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowchartNode {
    pub step_id: Uuid,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowchartEdge {
    pub from: Uuid,
    pub to: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionFlowchart {
    pub nodes: Vec<FlowchartNode>,
    pub edges: Vec<FlowchartEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedFactor {
    pub description: String,
    pub impact: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTiming {
    pub step_id: Uuid,
    pub event_type: AuditEventType,
    pub processing_time: chrono::Duration,
    pub confidence_impact: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub explanation_id: Uuid,
    pub decision_id: Uuid,
    pub level: ExplanationLevel,
    pub natural_language_summary: String,
    pub key_factors: Vec<String>,
    pub risk_indicators: Vec<String>,
    pub confidence_factors: Vec<SignedFactor>,
    pub decision_flowchart: Option<DecisionFlowchart>,
    pub step_timings: Option<Vec<StepTiming>>,
    pub raw_steps: Option<Vec<AuditStep>>,
    pub generated_at: DateTime<Utc>,
}
