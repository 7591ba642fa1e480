//! Transaction Guardian: velocity monitoring, AML/sanctioned
//! country checks, and the common risk-score formula applied to inbound
//! transaction events.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::application::pipeline::{compose_risk_score, run_step, unusual_hours_adjustment, StepOutput};
use crate::domain::errors::DomainError;
use crate::domain::models::{
    ActionPriority, AmlStatus, AuditEventType, Confidence, CustomerProfile, Decision, DecisionType,
    Event, EventType, ReasoningFactor, RecommendedAction, RiskAssessment, RuleAction,
};
use crate::domain::ports::{Agent, AgentConfigOverrides, CustomerRepository};
use crate::services::audit_trail_manager::AuditTrailManager;
use crate::services::circuit_breaker::{CircuitBreakerRegistry, CircuitScope};
use crate::services::config::TransactionGuardianConfig;
use crate::services::rule_engine::RuleEngine;

pub struct TransactionGuardianAgent {
    agent_id: String,
    event_types: Vec<EventType>,
    config: RwLock<TransactionGuardianConfig>,
    customer_repo: Arc<dyn CustomerRepository>,
    rule_engine: Arc<RuleEngine>,
    audit: Arc<AuditTrailManager>,
    circuit_breakers: Arc<CircuitBreakerRegistry>,
}

impl TransactionGuardianAgent {
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        config: TransactionGuardianConfig,
        customer_repo: Arc<dyn CustomerRepository>,
        rule_engine: Arc<RuleEngine>,
        audit: Arc<AuditTrailManager>,
        circuit_breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            event_types: vec![EventType::Transaction],
            config: RwLock::new(config),
            customer_repo,
            rule_engine,
            audit,
            circuit_breakers,
        }
    }

    async fn config(&self) -> TransactionGuardianConfig {
        self.config.read().await.clone()
    }
}

#[async_trait]
impl Agent for TransactionGuardianAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn agent_type(&self) -> &str {
        "transaction_guardian"
    }

    fn event_types(&self) -> &[EventType] {
        &self.event_types
    }

    async fn initialize(&self, overrides: AgentConfigOverrides) -> Result<(), DomainError> {
        let mut config = self.config.write().await;
        if let Some(v) = overrides.get_f64("fraud_threshold") {
            config.fraud_threshold = v;
        }
        if let Some(v) = overrides.get_f64("high_risk_threshold") {
            config.high_risk_threshold = v;
        }
        if let Some(v) = overrides.get_f64("velocity_threshold") {
            config.velocity_threshold = v;
        }
        Ok(())
    }

    async fn on_event(&self, event: Event) -> Result<Decision, DomainError> {
        let config = self.config().await;
        let decision_id = self
            .audit
            .start_decision_audit(self.agent_type(), &self.agent_id, event.event_id, json!(&event))
            .await;

        let customer_id = event.metadata_str("customer_id").unwrap_or("unknown").to_string();
        let amount = event.metadata_f64("amount").unwrap_or(0.0);
        let destination_country = event.metadata_str("destination_country").map(str::to_string);

        // 1. DATA_RETRIEVAL
        let (profile, history) = self.retrieve_customer_state(decision_id, &customer_id, &config).await?;

        // 2. RULE_EVALUATION
        let rule_context = crate::domain::models::EvaluationContext::new(
            customer_id.clone(),
            "transaction",
            json!({
                "amount": amount,
                "customer": { "aml_status": profile.aml_status, "daily_limit": profile.daily_limit },
                "destination_country": destination_country,
            }),
        );
        let rule_result = run_step(
            &self.audit,
            decision_id,
            AuditEventType::RuleEvaluation,
            "advanced rule engine evaluation",
            json!(&rule_context),
            async {
                let result = self.rule_engine.evaluate_entity(&rule_context).await;
                match result {
                    Ok(r) => StepOutput::new(r.clone(), json!(&r)),
                    Err(err) => StepOutput::new(
                        crate::domain::models::RuleResult::none_triggered(customer_id.clone(), ChronoDuration::zero()),
                        json!({"error": err.to_string()}),
                    )
                    .fallback(err.to_string()),
                }
            },
        )
        .await?;

        // 3. PATTERN_ANALYSIS: velocity ratio vs. recent history
        let velocity_ratio = if history.mean_amount() > 0.0 { amount / history.mean_amount() } else { 0.0 };
        let events_in_window = history.count_within(event.occurred_at, ChronoDuration::minutes(config.velocity_window_minutes));
        let velocity_risk = velocity_ratio_risk(velocity_ratio, &config);
        run_step(
            &self.audit,
            decision_id,
            AuditEventType::PatternAnalysis,
            "velocity analysis",
            json!({"amount": amount, "mean_recent_amount": history.mean_amount()}),
            async {
                StepOutput::new(
                    (),
                    json!({"velocity_ratio": velocity_ratio, "velocity_risk": velocity_risk, "events_in_window": events_in_window}),
                )
            },
        )
        .await?;

        // 5. LLM_INFERENCE is optional and omitted here: keyword-based
        // fallback already covers the contextual-risk term via
        // `event_type_token_risk`, so `llm_contextual_risk` is 0 unless a
        // future LLM-backed feature extraction step is wired in.
        let llm_contextual_risk = 0.0;

        // AML / sanctioned-country checks
        let sanctioned_hit = destination_country
            .as_deref()
            .is_some_and(|c| config.sanctioned_countries.iter().any(|s| s == c));
        let geographic_anomaly = destination_country
            .as_deref()
            .is_some_and(|c| !profile.usual_countries.iter().any(|u| u == c));
        let compliance_blocked = profile.aml_status.is_blocking() || amount > profile.daily_limit || sanctioned_hit;

        let agent_specific_adjustments = amount_band_risk(amount, &config)
            + if geographic_anomaly { config.geographic_anomaly_risk } else { 0.0 }
            + if sanctioned_hit { config.sanctioned_country_risk } else { 0.0 }
            + velocity_event_band_risk(events_in_window, &config)
            + unusual_hours_adjustment(&config.risk_weights, event.occurred_at);

        // 6. RISK_ASSESSMENT
        let risk_score = compose_risk_score(
            &config.risk_weights,
            event.severity,
            &event,
            velocity_risk,
            llm_contextual_risk,
            agent_specific_adjustments,
        );
        let confidence_score = decision_confidence_score(risk_score, events_in_window, &config);
        run_step(
            &self.audit,
            decision_id,
            AuditEventType::RiskAssessment,
            "composite risk score",
            json!({}),
            async { StepOutput::new((), json!({"confidence_score": confidence_score, "risk_score": risk_score})) },
        )
        .await?;

        // 7. CONFIDENCE_CALCULATION (aggregation itself happens in finalize)
        run_step(
            &self.audit,
            decision_id,
            AuditEventType::ConfidenceCalculation,
            "confidence aggregation",
            json!({}),
            async { StepOutput::new((), json!({"confidence_score": confidence_score})) },
        )
        .await?;

        let fraud_suspicious = rule_result.triggered
            && matches!(rule_result.action, RuleAction::Escalate | RuleAction::Alert | RuleAction::Quarantine);

        let (decision_type, actions) =
            classify_decision(risk_score, compliance_blocked, fraud_suspicious, &config);

        if decision_type == DecisionType::Escalate {
            warn!(customer_id = %customer_id, event_id = %event.event_id, "emitting suspicious_transaction compliance event");
            let new_risk = config.risk_profile_current_weight * profile.risk_profile + config.risk_profile_new_weight * risk_score;
            if let Err(err) = self.customer_repo.update_risk_profile(&customer_id, new_risk).await {
                warn!(error = %err, "failed to update customer risk profile");
            }
        }

        let risk_factors = risk_factor_labels(sanctioned_hit, geographic_anomaly, compliance_blocked, fraud_suspicious);
        let risk_assessment = RiskAssessment::new(risk_score, risk_factors);

        // 8. DECISION_FINALIZED
        let final_decision = json!({"type": decision_type, "risk_score": risk_score});
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
                factor: "composite_risk_score".into(),
                evidence: format!("risk_score={risk_score:.3}, velocity_ratio={velocity_ratio:.2}"),
                weight: 1.0,
                source: "transaction_guardian".into(),
            }],
            actions,
            risk_assessment,
        ))
    }

    async fn shutdown(&self) {}
}

impl TransactionGuardianAgent {
    async fn retrieve_customer_state(
        &self,
        decision_id: Uuid,
        customer_id: &str,
        config: &TransactionGuardianConfig,
    ) -> Result<(CustomerProfile, crate::domain::models::TransactionHistory), DomainError> {
        let window = ChronoDuration::minutes(config.velocity_window_minutes);
        let customer_id_owned = customer_id.to_string();
        let started = Utc::now();
        let (outcome, used_fallback, timed_out) = self
            .circuit_breakers
            .with_breaker_deadline(
                CircuitScope::Database,
                std::time::Duration::from_millis(config.step_timeout_ms),
                || async {
                    let profile = self.customer_repo.get_profile(&customer_id_owned).await.map_err(|_| ())?;
                    let history = self
                        .customer_repo
                        .get_transaction_history(&customer_id_owned, window)
                        .await
                        .map_err(|_| ())?;
                    Ok((profile.unwrap_or_else(|| CustomerProfile::fallback(&customer_id_owned)), history))
                },
                || async {
                    (
                        CustomerProfile::fallback(&customer_id_owned),
                        crate::domain::models::TransactionHistory::default(),
                    )
                },
            )
            .await;
        let elapsed = Utc::now() - started;

        let data_quality_score = if used_fallback { 0.5 } else { 1.0 };
        let mut metadata = std::collections::HashMap::new();
        if timed_out {
            metadata.insert("status".to_string(), json!("timeout"));
            metadata.insert("fallback_reason".to_string(), json!("data retrieval deadline exceeded"));
        } else if used_fallback {
            metadata.insert("status".to_string(), json!("fallback"));
        }
        self.audit
            .record_decision_step(
                decision_id,
                AuditEventType::DataRetrieval,
                "customer profile and transaction history",
                json!({"customer_id": customer_id}),
                json!({"data_quality_score": data_quality_score, "aml_status": outcome.0.aml_status}),
                metadata,
                elapsed,
            )
            .await?;
        Ok(outcome)
    }
}

/// `output.confidence_score` for this decision's `RISK_ASSESSMENT` /
/// `CONFIDENCE_CALCULATION` steps: a risk score sitting right on a
/// decision threshold is ambiguous, one
/// far from every threshold is clear-cut; velocity history thinner than
/// five events is too sparse to be fully confident in regardless.
fn decision_confidence_score(risk_score: f64, events_in_window: usize, config: &TransactionGuardianConfig) -> f64 {
    let thresholds = [config.velocity_threshold, config.high_risk_threshold, config.fraud_threshold];
    let clarity = thresholds.iter().map(|t| (risk_score - t).abs()).fold(f64::MAX, f64::min);
    let decisiveness = (0.5 + clarity).clamp(0.0, 1.0);
    let data_sufficiency = (events_in_window.min(5) as f64 / 5.0).max(0.4);
    (decisiveness * 0.7 + data_sufficiency * 0.3).clamp(0.0, 1.0)
}

/// Maps a velocity ratio to risk via three configurable thresholds
/// (critical/high/moderate).
fn velocity_ratio_risk(ratio: f64, config: &TransactionGuardianConfig) -> f64 {
    if ratio >= config.velocity_critical_threshold {
        0.9
    } else if ratio >= config.velocity_high_threshold {
        0.6
    } else if ratio >= config.velocity_moderate_threshold {
        0.3
    } else {
        0.0
    }
}

fn velocity_event_band_risk(events_in_window: usize, config: &TransactionGuardianConfig) -> f64 {
    let events_in_window = events_in_window as u32;
    if events_in_window >= config.velocity_events_20 {
        0.3
    } else if events_in_window >= config.velocity_events_10 {
        0.2
    } else if events_in_window >= config.velocity_events_5 {
        0.1
    } else {
        0.0
    }
}

fn amount_band_risk(amount: f64, config: &TransactionGuardianConfig) -> f64 {
    if amount >= 100_000.0 {
        config.risk_amount_100k
    } else if amount >= 50_000.0 {
        config.risk_amount_50k
    } else if amount >= 10_000.0 {
        config.risk_amount_10k
    } else {
        0.0
    }
}

fn risk_factor_labels(sanctioned: bool, geographic_anomaly: bool, compliance_blocked: bool, fraud_suspicious: bool) -> Vec<String> {
    let mut factors = Vec::new();
    if sanctioned {
        factors.push("sanctioned_country".to_string());
    }
    if geographic_anomaly {
        factors.push("geographic_anomaly".to_string());
    }
    if compliance_blocked {
        factors.push("compliance_blocked".to_string());
    }
    if fraud_suspicious {
        factors.push("fraud_suspicious_rule_match".to_string());
    }
    factors
}

/// Decision policy.
fn classify_decision(
    risk_score: f64,
    compliance_blocked: bool,
    fraud_suspicious: bool,
    config: &TransactionGuardianConfig,
) -> (DecisionType, Vec<RecommendedAction>) {
    if risk_score >= config.fraud_threshold || compliance_blocked {
        return (
            DecisionType::Deny,
            vec![RecommendedAction::new("alert_compliance_team", "transaction denied", ActionPriority::Urgent)],
        );
    }
    if risk_score >= config.high_risk_threshold || fraud_suspicious {
        return (
            DecisionType::Escalate,
            vec![RecommendedAction::new("escalate_for_review", "transaction escalated", ActionPriority::High)],
        );
    }
    if risk_score >= config.velocity_threshold {
        return (
            DecisionType::Monitor,
            vec![RecommendedAction::new("monitor_account", "elevated velocity risk", ActionPriority::Medium)],
        );
    }
    (DecisionType::Approve, vec![])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::PersistenceError;
    use crate::domain::models::EventSource;
    use crate::domain::ports::RuleRepository;
    use crate::services::audit_trail_manager::AuditTrailManager;
    use crate::services::config::RuleEngineConfig;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Default)]
    struct StaticCustomerRepository {
        profile: Option<CustomerProfile>,
    }

    #[async_trait]
    impl CustomerRepository for StaticCustomerRepository {
        async fn get_profile(&self, customer_id: &str) -> Result<Option<CustomerProfile>, PersistenceError> {
            Ok(self.profile.clone().or_else(|| Some(CustomerProfile::fallback(customer_id))))
        }
        async fn get_transaction_history(
            &self,
            _customer_id: &str,
            _window: ChronoDuration,
        ) -> Result<crate::domain::models::TransactionHistory, PersistenceError> {
            Ok(crate::domain::models::TransactionHistory::default())
        }
        async fn update_risk_profile(&self, _customer_id: &str, _new_risk: f64) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct EmptyRuleRepository;

    #[async_trait]
    impl RuleRepository for EmptyRuleRepository {
        async fn upsert_rule(&self, _rule: &crate::domain::models::Rule) -> Result<(), PersistenceError> {
            Ok(())
        }
        async fn delete_rule(&self, _rule_id: &str) -> Result<(), PersistenceError> {
            Ok(())
        }
        async fn set_enabled(&self, _rule_id: &str, _enabled: bool) -> Result<(), PersistenceError> {
            Ok(())
        }
        async fn get_rule(&self, _rule_id: &str) -> Result<Option<crate::domain::models::Rule>, PersistenceError> {
            Ok(None)
        }
        async fn load_all(&self) -> Result<Vec<crate::domain::models::Rule>, PersistenceError> {
            Ok(vec![])
        }
        async fn save_result(&self, _result: &crate::domain::models::RuleResult) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct InMemoryAuditRepository {
        trails: TokioMutex<StdHashMap<Uuid, crate::domain::models::AuditTrail>>,
    }

    #[async_trait]
    impl crate::domain::ports::AuditRepository for InMemoryAuditRepository {
        async fn save_finalized_trail(
            &self,
            trail: &crate::domain::models::AuditTrail,
            _explanation: &crate::domain::models::Explanation,
        ) -> Result<(), PersistenceError> {
            self.trails.lock().await.insert(trail.decision_id, trail.clone());
            Ok(())
        }
        async fn append_steps(&self, _trail_id: Uuid, _steps: &[crate::domain::models::AuditStep]) -> Result<(), PersistenceError> {
            Ok(())
        }
        async fn get_trail(&self, decision_id: Uuid) -> Result<Option<crate::domain::models::AuditTrail>, PersistenceError> {
            Ok(self.trails.lock().await.get(&decision_id).cloned())
        }
        async fn get_agent_decisions(
            &self,
            _agent_type: &str,
            _agent_name: &str,
            _since: chrono::DateTime<chrono::Utc>,
        ) -> Result<Vec<crate::domain::models::AuditTrail>, PersistenceError> {
            Ok(vec![])
        }
        async fn get_decisions_requiring_review(&self) -> Result<Vec<crate::domain::models::AuditTrail>, PersistenceError> {
            Ok(vec![])
        }
        async fn save_human_review(&self, _review: &crate::domain::models::HumanReview) -> Result<(), PersistenceError> {
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
        async fn get_trails_in_range(
            &self,
            _start: chrono::DateTime<chrono::Utc>,
            _end: chrono::DateTime<chrono::Utc>,
        ) -> Result<Vec<crate::domain::models::AuditTrail>, PersistenceError> {
            Ok(vec![])
        }
    }

    fn sample_event(amount: f64, destination_country: Option<&str>) -> Event {
        let mut metadata = StdHashMap::new();
        metadata.insert("customer_id".to_string(), json!("cust-1"));
        metadata.insert("amount".to_string(), json!(amount));
        if let Some(country) = destination_country {
            metadata.insert("destination_country".to_string(), json!(country));
        }
        Event {
            event_id: Uuid::new_v4(),
            event_type: EventType::Transaction,
            severity: crate::domain::models::Severity::Medium,
            source: EventSource {
                system: "core-banking".into(),
                kind: "payment".into(),
                origin: "api".into(),
            },
            description: "wire transfer".into(),
            metadata,
            occurred_at: chrono::Utc::now().date_naive().and_hms_opt(14, 0, 0).unwrap().and_utc(),
        }
    }

    fn agent() -> TransactionGuardianAgent {
        TransactionGuardianAgent::new(
            "tg-1",
            TransactionGuardianConfig::default(),
            Arc::new(StaticCustomerRepository::default()),
            Arc::new(RuleEngine::new(Arc::new(EmptyRuleRepository), RuleEngineConfig::default())),
            Arc::new(AuditTrailManager::new(Arc::new(InMemoryAuditRepository::default()), crate::services::config::AuditTrailConfig::default())),
            Arc::new(CircuitBreakerRegistry::with_defaults()),
        )
    }

    #[tokio::test]
    async fn low_amount_domestic_transfer_is_approved() {
        let agent = agent();
        let decision = agent.on_event(sample_event(200.0, None)).await.unwrap();
        assert_eq!(decision.decision_type, DecisionType::Approve);
    }

    #[tokio::test]
    async fn sanctioned_destination_is_denied() {
        let agent = agent();
        let decision = agent.on_event(sample_event(500.0, Some("IR"))).await.unwrap();
        assert_eq!(decision.decision_type, DecisionType::Deny);
    }

    #[test]
    fn velocity_ratio_bands_map_to_configured_risk() {
        let config = TransactionGuardianConfig::default();
        assert_eq!(velocity_ratio_risk(1.0, &config), 0.0);
        assert_eq!(velocity_ratio_risk(6.0, &config), 0.3);
        assert_eq!(velocity_ratio_risk(25.0, &config), 0.9);
    }

    #[test]
    fn amount_bands_map_to_configured_risk() {
        let config = TransactionGuardianConfig::default();
        assert_eq!(amount_band_risk(5_000.0, &config), 0.0);
        assert_eq!(amount_band_risk(150_000.0, &config), config.risk_amount_100k);
    }
}
