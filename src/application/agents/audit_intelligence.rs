//! Audit intelligence: fraud-pattern similarity scoring on the hot path,
//! plus a periodic background sweep for temporal, behavioral, and
//! correlation anomalies across recent decision trails. The sweep runs
//! as an `AtomicBool`-gated loop on a `tokio::time::interval`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::pipeline::{compose_risk_score, run_step, StepOutput};
use crate::domain::errors::DomainError;
use crate::domain::models::{
    ActionPriority, AuditEventType, AuditTrail, Confidence, Decision, DecisionType, Event,
    EventType, ReasoningFactor, RecommendedAction, RiskAssessment,
};
use crate::domain::ports::{Agent, AgentConfigOverrides};
use crate::services::audit_trail_manager::AuditTrailManager;
use crate::services::config::AuditIntelligenceConfig;

/// How far back the sweep and the similarity lookup reach for trails,
/// independent of the sweep cadence itself.
const LOOKBACK_HOURS: i64 = 24;

pub struct AuditIntelligenceAgent {
    agent_id: String,
    event_types: Vec<EventType>,
    config: Arc<RwLock<AuditIntelligenceConfig>>,
    audit: Arc<AuditTrailManager>,
    stop_flag: Arc<AtomicBool>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AuditIntelligenceAgent {
    #[must_use]
    pub fn new(agent_id: impl Into<String>, config: AuditIntelligenceConfig, audit: Arc<AuditTrailManager>) -> Self {
        Self {
            agent_id: agent_id.into(),
            event_types: vec![EventType::Transaction, EventType::AuditRecord],
            config: Arc::new(RwLock::new(config)),
            audit,
            stop_flag: Arc::new(AtomicBool::new(false)),
            sweep_handle: Mutex::new(None),
        }
    }

    async fn config(&self) -> AuditIntelligenceConfig {
        self.config.read().await.clone()
    }
}

#[async_trait]
impl Agent for AuditIntelligenceAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn agent_type(&self) -> &str {
        "audit_intelligence"
    }

    fn event_types(&self) -> &[EventType] {
        &self.event_types
    }

    async fn initialize(&self, overrides: AgentConfigOverrides) -> Result<(), DomainError> {
        let sweep_interval_minutes = {
            let mut config = self.config.write().await;
            if let Some(v) = overrides.get_f64("sweep_interval_minutes") {
                config.sweep_interval_minutes = v as i64;
            }
            if let Some(v) = overrides.get_f64("temporal_rate_per_hour") {
                config.temporal_rate_per_hour = v;
            }
            config.sweep_interval_minutes
        };

        let config = Arc::clone(&self.config);
        let audit = Arc::clone(&self.audit);
        let stop_flag = Arc::clone(&self.stop_flag);
        let interval_duration = StdDuration::from_secs((sweep_interval_minutes.max(1) as u64) * 60);

        let handle = tokio::spawn(async move {
            run_sweep_loop(config, audit, stop_flag, interval_duration).await;
        });
        *self.sweep_handle.lock().await = Some(handle);
        Ok(())
    }

    async fn on_event(&self, event: Event) -> Result<Decision, DomainError> {
        let config = self.config().await;
        let decision_id = self
            .audit
            .start_decision_audit(self.agent_type(), &self.agent_id, event.event_id, json!(&event))
            .await;

        // 1. KNOWLEDGE_QUERY: fraud-pattern similarity against recent trails.
        let now = Utc::now();
        let window_start = now - chrono::Duration::hours(LOOKBACK_HOURS);
        let (similar, compared_trails) = run_step(
            &self.audit,
            decision_id,
            AuditEventType::KnowledgeQuery,
            "fraud pattern similarity lookup",
            json!({"window_hours": LOOKBACK_HOURS}),
            async {
                let trails = self.audit.get_audit_trail_for_compliance(window_start, now).await.unwrap_or_default();
                let pairs = similarity_pairs(&event, &trails);
                let aggregate = aggregate_similarity(&pairs, config.similarity_top_n);
                StepOutput::new(
                    (aggregate, pairs.len()),
                    json!({"compared_trails": pairs.len(), "aggregate_similarity": aggregate, "confidence_score": 0.9}),
                )
            },
        )
        .await?;

        // A sweep over few historical trails yields a less trustworthy
        // similarity signal than one backed by a deep comparison set.
        let confidence_score = (compared_trails.min(10) as f64 / 10.0).max(0.3);

        // 2. RISK_ASSESSMENT
        let risk_score = compose_risk_score(&config.risk_weights, event.severity, &event, similar, 0.0, 0.0);
        run_step(
            &self.audit,
            decision_id,
            AuditEventType::RiskAssessment,
            "similarity-weighted risk score",
            json!({}),
            async { StepOutput::new((), json!({"confidence_score": confidence_score, "risk_score": risk_score})) },
        )
        .await?;

        // 3. CONFIDENCE_CALCULATION
        run_step(
            &self.audit,
            decision_id,
            AuditEventType::ConfidenceCalculation,
            "confidence aggregation",
            json!({}),
            async { StepOutput::new((), json!({"confidence_score": confidence_score})) },
        )
        .await?;

        let pattern_match = similar >= config.similarity_density_threshold;
        let (decision_type, actions) = classify_pattern(pattern_match);
        let risk_assessment = RiskAssessment::new(risk_score, risk_factor_labels(pattern_match, similar));

        // 4. DECISION_FINALIZED
        let final_decision = json!({"type": decision_type, "risk_score": risk_score, "similarity": similar});
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
                factor: "fraud_pattern_similarity".into(),
                evidence: format!("aggregate_similarity={similar:.3}"),
                weight: 1.0,
                source: "audit_intelligence".into(),
            }],
            actions,
            risk_assessment,
        ))
    }

    async fn shutdown(&self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.sweep_handle.lock().await.take() {
            let _ = tokio::time::timeout(StdDuration::from_secs(5), handle).await;
        }
    }
}

fn classify_pattern(pattern_match: bool) -> (DecisionType, Vec<RecommendedAction>) {
    if pattern_match {
        (
            DecisionType::Alert,
            vec![RecommendedAction::new("alert_fraud_pattern", "transaction matches recent fraud pattern cluster", ActionPriority::High)],
        )
    } else {
        (DecisionType::Monitor, vec![])
    }
}

fn risk_factor_labels(pattern_match: bool, similarity: f64) -> Vec<String> {
    let mut factors = vec![format!("aggregate_similarity={similarity:.2}")];
    if pattern_match {
        factors.push("fraud_pattern_density_exceeded".to_string());
    }
    factors
}

/// One historical trail's similarity score to the current event, paired
/// with that trail's originating severity so `aggregate_similarity` can
/// weight by severity.
fn similarity_pairs(event: &Event, trails: &[AuditTrail]) -> Vec<(f64, f64)> {
    trails
        .iter()
        .filter_map(|trail| {
            let other: Event = serde_json::from_value(trail.original_input.clone()).ok()?;
            Some((pairwise_similarity(event, &other), other.severity.normalized()))
        })
        .collect()
}

/// Feature-similarity between two transaction-shaped events: event-type
/// equality, normalized severity distance, Gaussian-kernel amount
/// similarity on `log10(amount+1)` with `sigma=1`, and entity (customer)
/// equality, averaged with equal weight.
fn pairwise_similarity(a: &Event, b: &Event) -> f64 {
    let type_component = if a.event_type == b.event_type { 1.0 } else { 0.0 };
    let severity_component = 1.0 - (a.severity.normalized() - b.severity.normalized()).abs();
    let a_amount = a.metadata_f64("amount").unwrap_or(0.0);
    let b_amount = b.metadata_f64("amount").unwrap_or(0.0);
    let amount_component = gaussian_kernel((a_amount + 1.0).log10(), (b_amount + 1.0).log10(), 1.0);
    let entity_component = match (a.metadata_str("customer_id"), b.metadata_str("customer_id")) {
        (Some(x), Some(y)) => f64::from(u8::from(x == y)),
        _ => 0.0,
    };
    (type_component + severity_component + amount_component + entity_component) / 4.0
}

fn gaussian_kernel(x: f64, y: f64, sigma: f64) -> f64 {
    (-(x - y).powi(2) / (2.0 * sigma * sigma)).exp()
}

/// Aggregate of the top-`top_n` most similar historical trails: mean,
/// max, severity-weighted mean, and density (fraction scoring above 0.7),
/// combined with equal weight.
fn aggregate_similarity(pairs: &[(f64, f64)], top_n: usize) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<(f64, f64)> = pairs.to_vec();
    sorted.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    sorted.truncate(top_n.max(1));

    let scores: Vec<f64> = sorted.iter().map(|(s, _)| *s).collect();
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let max = scores.iter().cloned().fold(0.0_f64, f64::max);
    let severity_weight_sum: f64 = sorted.iter().map(|(_, sev)| *sev).sum();
    let weighted_by_severity = if severity_weight_sum > 0.0 {
        sorted.iter().map(|(s, sev)| s * sev).sum::<f64>() / severity_weight_sum
    } else {
        mean
    };
    let density = scores.iter().filter(|s| **s > 0.7).count() as f64 / scores.len() as f64;

    ((mean + max + weighted_by_severity + density) / 4.0).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct AnomalyFinding {
    pub kind: &'static str,
    pub agent_type: String,
    pub agent_name: String,
    pub detail: String,
}

async fn run_sweep_loop(
    config: Arc<RwLock<AuditIntelligenceConfig>>,
    audit: Arc<AuditTrailManager>,
    stop_flag: Arc<AtomicBool>,
    interval_duration: StdDuration,
) {
    let mut ticker = tokio::time::interval(interval_duration);
    ticker.tick().await; // first tick fires immediately; consume it before the loop.

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if stop_flag.load(Ordering::Acquire) {
                    break;
                }
                let snapshot = config.read().await.clone();
                let now = Utc::now();
                let window_start = now - chrono::Duration::hours(LOOKBACK_HOURS);
                match audit.get_audit_trail_for_compliance(window_start, now).await {
                    Ok(trails) => {
                        for finding in detect_anomalies(&trails, &snapshot) {
                            warn!(
                                kind = finding.kind,
                                agent_type = %finding.agent_type,
                                agent_name = %finding.agent_name,
                                detail = %finding.detail,
                                "audit intelligence anomaly"
                            );
                        }
                    }
                    Err(err) => warn!(error = %err, "audit intelligence sweep failed to load trails"),
                }
            }
        }
        if stop_flag.load(Ordering::Acquire) {
            break;
        }
    }
    info!("audit intelligence sweep loop stopped");
}

/// Runs the full temporal/behavioral/correlation anomaly pass over
/// `trails`. Exposed standalone so it can be exercised
/// directly in tests without waiting on the sweep interval.
#[must_use]
pub fn detect_anomalies(trails: &[AuditTrail], config: &AuditIntelligenceConfig) -> Vec<AnomalyFinding> {
    let groups = group_by_agent(trails);
    let mut findings = Vec::new();
    findings.extend(detect_temporal_anomalies(&groups, config.temporal_rate_per_hour));
    findings.extend(detect_behavioral_anomalies(&groups, config.confidence_stddev_threshold, config.low_confidence_mean_threshold, config.min_sample_size));
    findings.extend(detect_correlation_anomalies(&groups, config.correlation_threshold, config.min_sample_size));
    findings
}

fn group_by_agent(trails: &[AuditTrail]) -> HashMap<(String, String), Vec<&AuditTrail>> {
    let mut groups: HashMap<(String, String), Vec<&AuditTrail>> = HashMap::new();
    for trail in trails {
        groups.entry((trail.agent_type.clone(), trail.agent_name.clone())).or_default().push(trail);
    }
    groups
}

fn detect_temporal_anomalies(groups: &HashMap<(String, String), Vec<&AuditTrail>>, rate_per_hour: f64) -> Vec<AnomalyFinding> {
    let mut findings = Vec::new();
    for ((agent_type, agent_name), trails) in groups {
        let Some(min) = trails.iter().map(|t| t.started_at).min() else { continue };
        let Some(max) = trails.iter().map(|t| t.started_at).max() else { continue };
        let span_hours = (max - min).num_seconds() as f64 / 3600.0;
        if span_hours <= 0.0 {
            continue;
        }
        let rate = trails.len() as f64 / span_hours;
        if rate > rate_per_hour {
            findings.push(AnomalyFinding {
                kind: "temporal_rate",
                agent_type: agent_type.clone(),
                agent_name: agent_name.clone(),
                detail: format!("decision rate {rate:.1}/h exceeds {rate_per_hour:.1}/h"),
            });
        }
    }
    findings
}

fn detect_behavioral_anomalies(
    groups: &HashMap<(String, String), Vec<&AuditTrail>>,
    stddev_threshold: f64,
    low_mean_threshold: f64,
    min_sample_size: usize,
) -> Vec<AnomalyFinding> {
    let mut findings = Vec::new();
    for ((agent_type, agent_name), trails) in groups {
        let confidences: Vec<f64> = trails.iter().filter_map(|t| t.final_confidence.map(confidence_ordinal)).collect();
        if confidences.len() < min_sample_size {
            continue;
        }
        let mean = mean(&confidences);
        let sd = stddev(&confidences, mean);
        if sd > stddev_threshold {
            findings.push(AnomalyFinding {
                kind: "confidence_variance",
                agent_type: agent_type.clone(),
                agent_name: agent_name.clone(),
                detail: format!("confidence std-dev {sd:.2} exceeds {stddev_threshold:.2}"),
            });
        }
        if mean < low_mean_threshold {
            findings.push(AnomalyFinding {
                kind: "low_confidence_mean",
                agent_type: agent_type.clone(),
                agent_name: agent_name.clone(),
                detail: format!("mean confidence {mean:.2} below {low_mean_threshold:.2} over {} samples", confidences.len()),
            });
        }
    }
    findings
}

/// Pearson correlation between (ordinal confidence, risk score) is
/// expected to be negative: rising risk should coincide with falling
/// confidence. A strong *positive* correlation past `correlation_threshold`
/// is therefore the anomalous "wrong sign" case flagged here.
fn detect_correlation_anomalies(
    groups: &HashMap<(String, String), Vec<&AuditTrail>>,
    correlation_threshold: f64,
    min_sample_size: usize,
) -> Vec<AnomalyFinding> {
    let mut findings = Vec::new();
    for ((agent_type, agent_name), trails) in groups {
        let pairs: Vec<(f64, f64)> = trails
            .iter()
            .filter_map(|t| {
                let confidence = t.final_confidence.map(confidence_ordinal)?;
                let risk = t.risk_assessment.as_ref()?.risk_score;
                Some((confidence, risk))
            })
            .collect();
        if pairs.len() < min_sample_size {
            continue;
        }
        let xs: Vec<f64> = pairs.iter().map(|(x, _)| *x).collect();
        let ys: Vec<f64> = pairs.iter().map(|(_, y)| *y).collect();
        let Some(rho) = pearson_correlation(&xs, &ys) else { continue };
        if rho.abs() > correlation_threshold && rho > 0.0 {
            findings.push(AnomalyFinding {
                kind: "correlation_wrong_sign",
                agent_type: agent_type.clone(),
                agent_name: agent_name.clone(),
                detail: format!("confidence/risk correlation {rho:.2} is positive past {correlation_threshold:.2}"),
            });
        }
    }
    findings
}

fn confidence_ordinal(confidence: Confidence) -> f64 {
    match confidence {
        Confidence::VeryLow => 0.0,
        Confidence::Low => 1.0,
        Confidence::Medium => 2.0,
        Confidence::High => 3.0,
        Confidence::VeryHigh => 4.0,
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn stddev(values: &[f64], mean: f64) -> f64 {
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn pearson_correlation(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.is_empty() {
        return None;
    }
    let mean_x = mean(xs);
    let mean_y = mean(ys);
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::PersistenceError;
    use crate::domain::models::{AuditStep, EventSource, Explanation, HumanReview, RiskLevel, Severity};
    use crate::domain::ports::AuditRepository;
    use crate::services::config::AuditTrailConfig;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::Mutex as TokioMutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct InMemoryAuditRepository {
        trails: TokioMutex<StdHashMap<Uuid, AuditTrail>>,
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
        async fn get_agent_decisions(&self, _agent_type: &str, _agent_name: &str, _since: DateTime<Utc>) -> Result<Vec<AuditTrail>, PersistenceError> {
            Ok(self.trails.lock().await.values().cloned().collect())
        }
        async fn get_decisions_requiring_review(&self) -> Result<Vec<AuditTrail>, PersistenceError> {
            Ok(vec![])
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
        async fn get_trails_in_range(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<Vec<AuditTrail>, PersistenceError> {
            Ok(self.trails.lock().await.values().cloned().collect())
        }
    }

    fn sample_event(amount: f64, customer_id: &str) -> Event {
        let mut metadata = StdHashMap::new();
        metadata.insert("customer_id".to_string(), json!(customer_id));
        metadata.insert("amount".to_string(), json!(amount));
        Event {
            event_id: Uuid::new_v4(),
            event_type: EventType::Transaction,
            severity: Severity::Medium,
            source: EventSource {
                system: "core-banking".into(),
                kind: "payment".into(),
                origin: "api".into(),
            },
            description: "wire transfer".into(),
            metadata,
            occurred_at: Utc::now(),
        }
    }

    fn agent() -> AuditIntelligenceAgent {
        AuditIntelligenceAgent::new(
            "ai-1",
            AuditIntelligenceConfig::default(),
            Arc::new(AuditTrailManager::new(Arc::new(InMemoryAuditRepository::default()), AuditTrailConfig::default())),
        )
    }

    #[tokio::test]
    async fn unseen_pattern_is_monitored_not_alerted() {
        let agent = agent();
        let decision = agent.on_event(sample_event(150.0, "cust-1")).await.unwrap();
        assert_eq!(decision.decision_type, DecisionType::Monitor);
        agent.shutdown().await;
    }

    #[test]
    fn identical_events_score_maximum_similarity() {
        let a = sample_event(5_000.0, "cust-1");
        let b = sample_event(5_000.0, "cust-1");
        assert!((pairwise_similarity(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn different_customers_and_amounts_score_lower() {
        let a = sample_event(500.0, "cust-1");
        let b = sample_event(500_000.0, "cust-2");
        assert!(pairwise_similarity(&a, &b) < 0.6);
    }

    #[test]
    fn temporal_rate_anomaly_flagged_when_rate_exceeds_threshold() {
        let mut trails = Vec::new();
        let base = Utc::now();
        for i in 0..20 {
            let mut trail = AuditTrail::new("transaction_guardian", "tg-1", Uuid::new_v4(), json!({}));
            trail.started_at = base + chrono::Duration::minutes(i);
            trails.push(trail);
        }
        let findings = detect_temporal_anomalies(&group_by_agent(&trails), 10.0);
        assert!(findings.iter().any(|f| f.kind == "temporal_rate"));
    }

    #[test]
    fn low_sample_size_suppresses_behavioral_anomalies() {
        let mut trail = AuditTrail::new("transaction_guardian", "tg-1", Uuid::new_v4(), json!({}));
        trail.final_confidence = Some(Confidence::VeryLow);
        let findings = detect_behavioral_anomalies(&group_by_agent(&[trail]), 0.1, 5.0, 20);
        assert!(findings.is_empty());
    }

    #[test]
    fn positive_correlation_past_threshold_is_wrong_sign() {
        let mut trails = Vec::new();
        for i in 0..25 {
            let mut trail = AuditTrail::new("transaction_guardian", "tg-1", Uuid::new_v4(), json!({}));
            let confidence = if i % 5 == 0 { Confidence::VeryHigh } else { Confidence::Low };
            trail.final_confidence = Some(confidence);
            let risk = if confidence == Confidence::VeryHigh { 0.9 } else { 0.1 };
            trail.risk_assessment = Some(RiskAssessment {
                risk_score: risk,
                risk_level: RiskLevel::from_score(risk),
                risk_factors: vec![],
                assessment_time: Utc::now(),
            });
            trails.push(trail);
        }
        let findings = detect_correlation_anomalies(&group_by_agent(&trails), 0.5, 20);
        assert!(findings.iter().any(|f| f.kind == "correlation_wrong_sign"));
    }
}
