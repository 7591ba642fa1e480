//! Regulatory Assessor: LLM-assisted impact assessment of
//! regulatory-change events. Every decision this agent produces requires
//! human review (`AuditTrailManager`'s agent-type trigger takes care of
//! that at finalization), so the pipeline itself only has to get the
//! impact score and the monitor-list routing right.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::info;

use crate::application::pipeline::{compose_risk_score, run_step, StepOutput};
use crate::domain::errors::DomainError;
use crate::domain::models::{
    ActionPriority, AuditEventType, Confidence, Decision, DecisionType, Event, EventType,
    ReasoningFactor, RecommendedAction, RiskAssessment,
};
use crate::domain::ports::{Agent, AgentConfigOverrides, LlmProvider};
use crate::services::audit_trail_manager::AuditTrailManager;
use crate::services::circuit_breaker::{CircuitBreakerRegistry, CircuitScope};
use crate::services::config::RegulatoryAssessorConfig;

/// `reasoning_steps` passed to the LLM provider for the structured
/// impact-assessment call; arbitrary but fixed so retries are comparable.
const IMPACT_ASSESSMENT_REASONING_STEPS: u32 = 3;

pub struct RegulatoryAssessorAgent {
    agent_id: String,
    event_types: Vec<EventType>,
    config: RwLock<RegulatoryAssessorConfig>,
    llm: Arc<dyn LlmProvider>,
    audit: Arc<AuditTrailManager>,
    circuit_breakers: Arc<CircuitBreakerRegistry>,
    monitor_list: RwLock<Vec<Value>>,
}

impl RegulatoryAssessorAgent {
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        config: RegulatoryAssessorConfig,
        llm: Arc<dyn LlmProvider>,
        audit: Arc<AuditTrailManager>,
        circuit_breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            event_types: vec![EventType::RegulatoryChange],
            config: RwLock::new(config),
            llm,
            audit,
            circuit_breakers,
            monitor_list: RwLock::new(Vec::new()),
        }
    }

    async fn config(&self) -> RegulatoryAssessorConfig {
        self.config.read().await.clone()
    }

    /// Snapshot of changes routed to the monitor list so far, for
    /// operational queries outside the decision pipeline itself.
    pub async fn monitor_list(&self) -> Vec<Value> {
        self.monitor_list.read().await.clone()
    }
}

#[async_trait]
impl Agent for RegulatoryAssessorAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn agent_type(&self) -> &str {
        crate::services::audit_trail_manager::REGULATORY_ASSESSOR_AGENT_TYPE
    }

    fn event_types(&self) -> &[EventType] {
        &self.event_types
    }

    async fn initialize(&self, overrides: AgentConfigOverrides) -> Result<(), DomainError> {
        let mut config = self.config.write().await;
        if let Some(v) = overrides.get_f64("high_impact_threshold") {
            config.high_impact_threshold = v;
        }
        Ok(())
    }

    async fn on_event(&self, event: Event) -> Result<Decision, DomainError> {
        let config = self.config().await;
        let decision_id = self
            .audit
            .start_decision_audit(self.agent_type(), &self.agent_id, event.event_id, json!(&event))
            .await;

        let change_text = event.description.clone();

        // 1. LLM_INFERENCE: structured impact assessment, circuit-breaker
        // guarded; falls back to keyword extraction when the breaker is
        // open or the provider declines to answer.
        let assessment = run_step(
            &self.audit,
            decision_id,
            AuditEventType::LlmInference,
            "regulatory impact assessment",
            json!({"change_text": change_text}),
            async {
                let (outcome, used_fallback, timed_out) = self
                    .circuit_breakers
                    .with_breaker_deadline(
                        CircuitScope::Llm,
                        std::time::Duration::from_millis(config.llm_step_timeout_ms),
                        || async {
                            self.llm
                                .complex_reasoning_task(
                                    "regulatory_impact_assessment",
                                    json!({"change_text": change_text}),
                                    IMPACT_ASSESSMENT_REASONING_STEPS,
                                )
                                .await
                                .map_err(|_| ())
                        },
                        || async { None },
                    )
                    .await;

                let assessment = outcome
                    .as_deref()
                    .and_then(parse_llm_assessment)
                    .unwrap_or_else(|| keyword_fallback_assessment(&change_text, &config));

                let output = json!({
                    "impact_score": assessment.impact_score,
                    "risk_level": assessment.risk_level,
                    "confidence_score": assessment.confidence,
                    "source": assessment.source,
                });
                let step = StepOutput::new(assessment, output);
                if timed_out {
                    step.timed_out("llm inference exceeded its deadline, used keyword extraction")
                } else if used_fallback {
                    step.fallback("llm breaker open or declined, used keyword extraction")
                } else {
                    step
                }
            },
        )
        .await?;

        // 2. RISK_ASSESSMENT: impact score feeds the contextual term of
        // the shared composite formula.
        let risk_score = compose_risk_score(
            &config.risk_weights,
            event.severity,
            &event,
            0.0,
            assessment.impact_score,
            0.0,
        );
        run_step(
            &self.audit,
            decision_id,
            AuditEventType::RiskAssessment,
            "regulatory impact risk score",
            json!({}),
            async { StepOutput::new((), json!({"confidence_score": assessment.confidence, "risk_score": risk_score})) },
        )
        .await?;

        // 3. CONFIDENCE_CALCULATION (aggregation happens in finalize).
        run_step(
            &self.audit,
            decision_id,
            AuditEventType::ConfidenceCalculation,
            "confidence aggregation",
            json!({}),
            async { StepOutput::new((), json!({"confidence_score": assessment.confidence})) },
        )
        .await?;

        let high_impact = assessment.impact_score >= config.high_impact_threshold;
        if high_impact {
            let entry = json!({
                "event_id": event.event_id,
                "change_text": change_text,
                "impact_score": assessment.impact_score,
                "risk_level": assessment.risk_level,
            });
            self.monitor_list.write().await.push(entry);
            info!(event_id = %event.event_id, impact_score = assessment.impact_score, "routed regulatory change to monitor list");
        }

        let (decision_type, actions) = classify_decision(high_impact);
        let risk_assessment = RiskAssessment::new(risk_score, risk_factor_labels(high_impact, &assessment));

        // 4. DECISION_FINALIZED. `requires_human_review` is forced true by
        // `AuditTrailManager` because `agent_type() == REGULATORY_ASSESSOR`.
        let final_decision = json!({"type": decision_type, "risk_score": risk_score, "impact_score": assessment.impact_score});
        let trail = self
            .audit
            .finalize_decision_audit(decision_id, final_decision, None, Some(risk_assessment.clone()), None)
            .await?;

        Ok(Decision::new(
            event.event_id,
            self.agent_id.clone(),
            decision_type,
            trail.final_confidence.unwrap_or(Confidence::Medium),
            vec![ReasoningFactor {
                factor: "regulatory_impact_score".into(),
                evidence: format!("impact_score={:.3} via {}", assessment.impact_score, assessment.source),
                weight: 1.0,
                source: "regulatory_assessor".into(),
            }],
            actions,
            risk_assessment,
        ))
    }

    async fn shutdown(&self) {}
}

#[derive(Debug, Clone)]
struct ImpactAssessment {
    impact_score: f64,
    risk_level: String,
    confidence: f64,
    source: &'static str,
}

/// Parse the LLM's structured `{"impact_score":.., "risk_level":..,
/// "confidence":..}` response. Returns `None` on any shape mismatch so
/// the caller falls back to keyword extraction rather than erroring.
fn parse_llm_assessment(response: &str) -> Option<ImpactAssessment> {
    let value: Value = serde_json::from_str(response).ok()?;
    let impact_score = value.get("impact_score")?.as_f64()?.clamp(0.0, 1.0);
    let risk_level = value.get("risk_level").and_then(Value::as_str).unwrap_or("unknown").to_string();
    let confidence = value.get("confidence").and_then(Value::as_f64).unwrap_or(0.7).clamp(0.0, 1.0);
    Some(ImpactAssessment {
        impact_score,
        risk_level,
        confidence,
        source: "llm",
    })
}

/// Keyword-based impact estimate used when the LLM is unavailable or
/// declines to answer.
fn keyword_fallback_assessment(change_text: &str, config: &RegulatoryAssessorConfig) -> ImpactAssessment {
    let haystack = change_text.to_lowercase();
    let impact_score = if config.fallback_impact_keywords_high.iter().any(|k| haystack.contains(k.as_str())) {
        0.85
    } else if config.fallback_impact_keywords_medium.iter().any(|k| haystack.contains(k.as_str())) {
        0.55
    } else {
        0.25
    };
    ImpactAssessment {
        impact_score,
        risk_level: if impact_score >= config.high_impact_threshold { "high".into() } else { "moderate".into() },
        confidence: config.llm_step_confidence_floor,
        source: "keyword_fallback",
    }
}

fn risk_factor_labels(high_impact: bool, assessment: &ImpactAssessment) -> Vec<String> {
    let mut factors = vec![format!("impact_score={:.2}", assessment.impact_score)];
    if high_impact {
        factors.push("high_impact_regulatory_change".to_string());
    }
    factors
}

fn classify_decision(high_impact: bool) -> (DecisionType, Vec<RecommendedAction>) {
    if high_impact {
        (
            DecisionType::Escalate,
            vec![RecommendedAction::new("escalate_regulatory_change", "high-impact regulatory change flagged", ActionPriority::High)],
        )
    } else {
        (
            DecisionType::Investigate,
            vec![RecommendedAction::new("review_regulatory_change", "regulatory change queued for human review", ActionPriority::Medium)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::PersistenceError;
    use crate::domain::models::{AuditStep, AuditTrail, EventSource, Explanation, HumanReview, Severity};
    use crate::domain::ports::{AuditRepository, MockLlmProvider, NullLlmProvider};
    use crate::services::config::AuditTrailConfig;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex as TokioMutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct InMemoryAuditRepository {
        trails: TokioMutex<HashMap<Uuid, AuditTrail>>,
    }

    #[async_trait]
    impl AuditRepository for InMemoryAuditRepository {
        async fn save_finalized_trail(&self, trail: &AuditTrail, _explanation: &Explanation) -> Result<(), PersistenceError> {
            self.trails.lock().await.insert(trail.decision_id, trail.clone());
            Ok(())
        }
        async fn append_steps(&self, _trail_id: Uuid, _steps: &[AuditStep]) -> Result<(), PersistenceError> {
            Ok(())
        }
        async fn get_trail(&self, decision_id: Uuid) -> Result<Option<AuditTrail>, PersistenceError> {
            Ok(self.trails.lock().await.get(&decision_id).cloned())
        }
        async fn get_agent_decisions(&self, _agent_type: &str, _agent_name: &str, _since: chrono::DateTime<chrono::Utc>) -> Result<Vec<AuditTrail>, PersistenceError> {
            Ok(vec![])
        }
        async fn get_decisions_requiring_review(&self) -> Result<Vec<AuditTrail>, PersistenceError> {
            Ok(self.trails.lock().await.values().filter(|t| t.requires_human_review).cloned().collect())
        }
        async fn save_human_review(&self, _review: &HumanReview) -> Result<(), PersistenceError> {
            Ok(())
        }
        async fn mark_review_resolved(&self, _decision_id: Uuid) -> Result<(), PersistenceError> {
            Ok(())
        }
        async fn mark_requires_review(&self, _decision_id: Uuid, _reason: &str) -> Result<(), PersistenceError> {
            Ok(())
        }
        async fn attach_human_feedback(&self, _decision_id: Uuid, _feedback: &crate::domain::models::HumanFeedback) -> Result<(), PersistenceError> {
            Ok(())
        }
        async fn get_trails_in_range(&self, _start: chrono::DateTime<chrono::Utc>, _end: chrono::DateTime<chrono::Utc>) -> Result<Vec<AuditTrail>, PersistenceError> {
            Ok(vec![])
        }
    }

    fn sample_event(description: &str) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            event_type: EventType::RegulatoryChange,
            severity: Severity::Medium,
            source: EventSource {
                system: "regulatory-feed".into(),
                kind: "rule_change".into(),
                origin: "watcher".into(),
            },
            description: description.into(),
            metadata: HashMap::new(),
            occurred_at: chrono::Utc::now(),
        }
    }

    fn agent_with(llm: Arc<dyn LlmProvider>) -> RegulatoryAssessorAgent {
        RegulatoryAssessorAgent::new(
            "ra-1",
            RegulatoryAssessorConfig::default(),
            llm,
            Arc::new(AuditTrailManager::new(Arc::new(InMemoryAuditRepository::default()), AuditTrailConfig::default())),
            Arc::new(CircuitBreakerRegistry::with_defaults()),
        )
    }

    #[tokio::test]
    async fn low_impact_change_is_queued_for_investigation() {
        let agent = agent_with(Arc::new(NullLlmProvider));
        let decision = agent.on_event(sample_event("minor reporting update")).await.unwrap();
        assert_eq!(decision.decision_type, DecisionType::Investigate);
    }

    #[tokio::test]
    async fn high_impact_keyword_routes_to_monitor_list() {
        let agent = agent_with(Arc::new(NullLlmProvider));
        let decision = agent.on_event(sample_event("new mandatory disclosure and criminal penalty regime")).await.unwrap();
        assert_eq!(decision.decision_type, DecisionType::Escalate);
        assert_eq!(agent.monitor_list().await.len(), 1);
    }

    #[tokio::test]
    async fn llm_structured_response_is_used_when_available() {
        let llm = MockLlmProvider::new().with_response(
            "regulatory_impact_assessment",
            r#"{"impact_score": 0.9, "risk_level": "high", "confidence": 0.8}"#,
        );
        let agent = agent_with(Arc::new(llm));
        let decision = agent.on_event(sample_event("routine update")).await.unwrap();
        assert_eq!(decision.decision_type, DecisionType::Escalate);
    }
}
