//! Shared pipeline-step wrapper and the common risk-score composition
//! formula, used by all three concrete agents: times a unit of work and
//! records the outcome against a shared audit ledger.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Timelike, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AuditEventType, Event, Severity};
use crate::services::audit_trail_manager::AuditTrailManager;
use crate::services::config::RiskWeights;

/// What one pipeline step produced: the value the agent keeps working
/// with, the `output` payload recorded into the audit trail, and any
/// metadata (e.g. `status=fallback`) the trail manager inspects when
/// deriving `confidence_impact` and the human-review trigger.
pub struct StepOutput<T> {
    pub value: T,
    pub output: Value,
    pub metadata: HashMap<String, Value>,
}

impl<T> StepOutput<T> {
    #[must_use]
    pub fn new(value: T, output: Value) -> Self {
        Self {
            value,
            output,
            metadata: HashMap::new(),
        }
    }

    /// Mark this step as a circuit-breaker fallback, recording that fact
    /// in the step's metadata.
    #[must_use]
    pub fn fallback(mut self, reason: impl Into<String>) -> Self {
        self.metadata.insert("status".into(), Value::from("fallback"));
        self.metadata.insert("fallback_reason".into(), Value::from(reason.into()));
        self
    }

    /// Mark this step as having missed its per-step deadline, so the
    /// step's confidence_impact comes out negative. Distinct from a
    /// plain circuit-breaker fallback so the trail
    /// manager can force a negative impact rather than merely discount
    /// one.
    #[must_use]
    pub fn timed_out(mut self, reason: impl Into<String>) -> Self {
        self.metadata.insert("status".into(), Value::from("timeout"));
        self.metadata.insert("fallback_reason".into(), Value::from(reason.into()));
        self
    }
}

/// Run one named pipeline step against `decision_id`'s audit trail: time
/// it, record input/output/metadata, and hand back the value. The trail
/// manager derives `confidence_impact` from `event_type` and whether the
/// step's metadata marks it a fallback.
pub async fn run_step<T, Fut>(
    audit: &AuditTrailManager,
    decision_id: Uuid,
    event_type: AuditEventType,
    description: impl Into<String>,
    input: Value,
    work: Fut,
) -> DomainResult<T>
where
    Fut: Future<Output = StepOutput<T>>,
{
    let started = Utc::now();
    let description = description.into();
    let StepOutput { value, output, metadata } = work.await;
    let elapsed = Utc::now() - started;
    audit
        .record_decision_step(decision_id, event_type, description, input, output, metadata, elapsed)
        .await?;
    Ok(value)
}

/// `risk_score = clamp01(base_severity_risk + event_type_risk +
/// w_hist*historical_risk + w_ctx*llm_contextual_risk +
/// agent_specific_adjustments)`. All constants come from
/// `weights`; none are hard-coded here.
#[must_use]
pub fn compose_risk_score(
    weights: &RiskWeights,
    severity: Severity,
    event: &Event,
    historical_risk: f64,
    llm_contextual_risk: f64,
    agent_specific_adjustments: f64,
) -> f64 {
    let score = base_severity_risk(weights, severity)
        + event.event_type_token_risk()
        + weights.w_hist * historical_risk
        + weights.w_ctx * llm_contextual_risk
        + agent_specific_adjustments;
    score.clamp(0.0, 1.0)
}

#[must_use]
pub fn base_severity_risk(weights: &RiskWeights, severity: Severity) -> f64 {
    match severity {
        Severity::Low => weights.severity_low,
        Severity::Medium => weights.severity_medium,
        Severity::High => weights.severity_high,
        Severity::Critical => weights.severity_critical,
    }
}

/// Unusual-hours contribution to `agent_specific_adjustments`: events
/// outside 06:00-22:00 UTC add `unusual_hours_risk`.
#[must_use]
pub fn unusual_hours_adjustment(weights: &RiskWeights, occurred_at: DateTime<Utc>) -> f64 {
    let hour = occurred_at.hour();
    if (6..22).contains(&hour) {
        0.0
    } else {
        weights.unusual_hours_risk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EventSource, EventType};
    use std::collections::HashMap as StdHashMap;

    fn sample_event(description: &str, occurred_at: DateTime<Utc>) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            event_type: EventType::Transaction,
            severity: Severity::Medium,
            source: EventSource {
                system: "core-banking".into(),
                kind: "payment".into(),
                origin: "api".into(),
            },
            description: description.into(),
            metadata: StdHashMap::new(),
            occurred_at,
        }
    }

    #[test]
    fn composite_score_clamps_to_one() {
        let weights = RiskWeights {
            severity_critical: 0.6,
            w_hist: 0.4,
            w_ctx: 0.3,
            ..RiskWeights::default()
        };
        let event = sample_event("possible FRAUD ring", Utc::now());
        let score = compose_risk_score(&weights, Severity::Critical, &event, 1.0, 1.0, 1.0);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn base_severity_risk_reads_configured_constant() {
        let weights = RiskWeights::default();
        assert_eq!(base_severity_risk(&weights, Severity::Low), weights.severity_low);
        assert_eq!(base_severity_risk(&weights, Severity::Critical), weights.severity_critical);
    }

    #[test]
    fn unusual_hours_adds_configured_risk_outside_daytime_window() {
        let weights = RiskWeights::default();
        let night = Utc::now().date_naive().and_hms_opt(3, 0, 0).unwrap().and_utc();
        let day = Utc::now().date_naive().and_hms_opt(14, 0, 0).unwrap().and_utc();
        assert_eq!(unusual_hours_adjustment(&weights, night), weights.unusual_hours_risk);
        assert_eq!(unusual_hours_adjustment(&weights, day), 0.0);
    }
}
