//! Decision Audit Trail & Explanation Engine. Buffers steps in memory
//! until a decision is finalized, then flushes the trail plus the
//! derived explanation to `AuditRepository` in one write.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, PersistenceError};
use crate::domain::models::{
    AuditEventType, AuditStep, AuditTrail, Confidence, DecisionFlowchart, Explanation,
    ExplanationLevel, FlowchartEdge, FlowchartNode, HumanFeedback, HumanReview, RiskAssessment,
    SignedFactor, StepTiming,
};
use crate::domain::ports::AuditRepository;
use crate::services::config::AuditTrailConfig;
use crate::services::retry::RetryPolicy;

/// Agent type token the `REGULATORY_ASSESSOR` agent registers under (spec
/// §4.4.2: that agent type always requires human review).
pub const REGULATORY_ASSESSOR_AGENT_TYPE: &str = "regulatory_assessor";

/// Reliability multiplier applied on top of a step's base confidence
/// factor when the step recorded a circuit-breaker/timeout fallback:
/// a fallback step still moves confidence, just less.
const FALLBACK_RELIABILITY_MULTIPLIER: f64 = 0.4;

#[derive(Debug, Default)]
struct AuditCounters {
    total_decisions_audited: AtomicU64,
    decisions_requiring_review: AtomicU64,
    human_reviews_completed: AtomicU64,
}

pub struct AuditTrailManager {
    repository: Arc<dyn AuditRepository>,
    active_trails: Mutex<HashMap<Uuid, AuditTrail>>,
    pending_steps: Mutex<HashMap<Uuid, Vec<AuditStep>>>,
    counters: AuditCounters,
    low_confidence_review_threshold: Confidence,
    financial_impact_review_threshold: f64,
    retry_policy: RetryPolicy,
}

impl AuditTrailManager {
    #[must_use]
    pub fn new(repository: Arc<dyn AuditRepository>, config: AuditTrailConfig) -> Self {
        Self::with_retry_policy(repository, config, RetryPolicy::default())
    }

    /// As `new`, but with an explicit retry policy for the
    /// trail-finalization write (3 attempts, 50ms->400ms by default).
    /// `main.rs` constructs this from the orchestrator's
    /// `persistence_retry_*` config so the two settings stay in sync.
    #[must_use]
    pub fn with_retry_policy(repository: Arc<dyn AuditRepository>, config: AuditTrailConfig, retry_policy: RetryPolicy) -> Self {
        Self {
            repository,
            active_trails: Mutex::new(HashMap::new()),
            pending_steps: Mutex::new(HashMap::new()),
            counters: AuditCounters::default(),
            low_confidence_review_threshold: config.low_confidence_review_threshold,
            financial_impact_review_threshold: config.financial_impact_review_threshold,
            retry_policy,
        }
    }

    /// Open a new trail for a decision in progress. Returns the
    /// `decision_id` callers thread through `record_decision_step`.
    pub async fn start_decision_audit(
        &self,
        agent_type: impl Into<String>,
        agent_name: impl Into<String>,
        trigger_event: Uuid,
        input_data: Value,
    ) -> Uuid {
        let trail = AuditTrail::new(agent_type, agent_name, trigger_event, input_data.clone());
        let decision_id = trail.decision_id;
        self.active_trails.lock().await.insert(decision_id, trail);
        self.pending_steps.lock().await.insert(decision_id, Vec::new());
        self.record_decision_step(
            decision_id,
            AuditEventType::DecisionStarted,
            "decision audit opened",
            input_data,
            Value::Null,
            HashMap::new(),
            ChronoDuration::zero(),
        )
        .await
        .expect("decision_id was just inserted into active_trails");
        decision_id
    }

    /// Append a step to the in-memory buffer for `decision_id`. The
    /// `confidence_impact` is derived here, never supplied by the caller
    /// directly.
    #[instrument(skip(self, input_data, output_data, metadata))]
    pub async fn record_decision_step(
        &self,
        decision_id: Uuid,
        event_type: AuditEventType,
        description: impl Into<String>,
        input_data: Value,
        output_data: Value,
        metadata: HashMap<String, Value>,
        processing_time: ChronoDuration,
    ) -> DomainResult<()> {
        let trails = self.active_trails.lock().await;
        let trail = trails.get(&decision_id).ok_or(DomainError::DecisionNotFound(decision_id))?;
        let trail_id = trail.trail_id;
        drop(trails);

        let status = metadata.get("status").and_then(Value::as_str);
        let is_fallback = status == Some("fallback");
        let is_timeout = status == Some("timeout");
        let confidence_impact =
            derive_confidence_impact(event_type, &output_data, &metadata, processing_time, is_fallback, is_timeout);

        let step = AuditStep::new(
            trail_id,
            event_type,
            description,
            input_data,
            output_data,
            metadata,
            processing_time,
            confidence_impact,
        );

        self.pending_steps.lock().await.entry(decision_id).or_default().push(step);
        Ok(())
    }

    /// Finalize a decision: compute the aggregate confidence, decide
    /// whether it requires human review, build the decision tree /
    /// flowchart, generate a detailed explanation, and flush everything
    /// to storage. After this call the in-memory buffers for
    /// `decision_id` are cleared.
    #[instrument(skip(self, final_decision, risk_assessment, alternative_options))]
    pub async fn finalize_decision_audit(
        &self,
        decision_id: Uuid,
        final_decision: Value,
        confidence: Option<Confidence>,
        risk_assessment: Option<RiskAssessment>,
        alternative_options: Option<Value>,
    ) -> DomainResult<AuditTrail> {
        let mut trail = self
            .active_trails
            .lock()
            .await
            .remove(&decision_id)
            .ok_or(DomainError::DecisionNotFound(decision_id))?;
        let steps = self.pending_steps.lock().await.remove(&decision_id).unwrap_or_default();

        let finished_at = Utc::now();
        trail.steps = steps;
        trail.steps.push(AuditStep::new(
            trail.trail_id,
            AuditEventType::DecisionFinalized,
            "decision audit finalized",
            Value::Null,
            final_decision.clone(),
            HashMap::new(),
            ChronoDuration::zero(),
            AuditEventType::DecisionFinalized.base_confidence_factor(),
        ));
        trail.final_decision = Some(final_decision);
        // An explicit non-Medium confidence is taken as-is; Medium (the
        // default) or no explicit value means "derive it from the steps".
        trail.final_confidence = Some(match confidence {
            Some(c) if c != Confidence::Medium => c,
            _ => aggregate_confidence(&trail.steps),
        });
        trail.decision_tree = Some(build_decision_tree(&trail.steps));
        trail.risk_assessment = risk_assessment;
        trail.alternative_options = alternative_options;
        trail.completed_at = Some(finished_at);
        trail.total_processing_time = Some(finished_at - trail.started_at);

        if let Some(reason) = should_request_human_review(
            &trail,
            self.low_confidence_review_threshold,
            self.financial_impact_review_threshold,
        ) {
            trail.requires_human_review = true;
            trail.human_review_reason = Some(reason);
        }

        let explanation = generate_explanation(&trail, ExplanationLevel::Detailed);
        // Transient failures (pool timeout, transaction failure) are
        // retried with backoff; the active trail stays removed from
        // `active_trails` for the duration; it is reinserted so the
        // trail can be retained for replay only on the final,
        // non-transient failure below.
        if let Err(err) = self
            .retry_policy
            .execute(|| self.repository.save_finalized_trail(&trail, &explanation))
            .await
        {
            self.pending_steps.lock().await.insert(decision_id, trail.steps.clone());
            self.active_trails.lock().await.insert(decision_id, trail);
            return Err(err.into());
        }

        self.counters.total_decisions_audited.fetch_add(1, Ordering::Relaxed);
        if trail.requires_human_review {
            self.counters.decisions_requiring_review.fetch_add(1, Ordering::Relaxed);
        }
        info!(
            decision_id = %decision_id,
            requires_human_review = trail.requires_human_review,
            steps = trail.steps.len(),
            "decision audit finalized"
        );

        Ok(trail)
    }

    pub async fn request_human_review(&self, decision_id: Uuid, reason: impl Into<String>) -> DomainResult<()> {
        let mut trails = self.active_trails.lock().await;
        if let Some(trail) = trails.get_mut(&decision_id) {
            trail.requires_human_review = true;
            trail.human_review_reason = Some(reason.into());
            return Ok(());
        }
        drop(trails);
        let reason = reason.into();
        self.repository
            .get_trail(decision_id)
            .await?
            .ok_or(DomainError::DecisionNotFound(decision_id))?;
        self.repository.mark_requires_review(decision_id, &reason).await?;
        Ok(())
    }

    pub async fn record_human_feedback(
        &self,
        decision_id: Uuid,
        reviewer_id: impl Into<String>,
        feedback: impl Into<String>,
        approved: bool,
    ) -> DomainResult<()> {
        let reviewer_id = reviewer_id.into();
        let feedback = feedback.into();
        let review = HumanReview::new(decision_id, reviewer_id.clone(), feedback.clone(), approved);
        self.repository.save_human_review(&review).await?;
        self.repository.mark_review_resolved(decision_id).await?;

        let feedback = HumanFeedback { reviewer_id, feedback, approved, reviewed_at: Utc::now() };
        self.repository.attach_human_feedback(decision_id, &feedback).await?;

        self.counters.human_reviews_completed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn get_decision_audit(&self, decision_id: Uuid) -> DomainResult<Option<AuditTrail>> {
        if let Some(trail) = self.active_trails.lock().await.get(&decision_id) {
            return Ok(Some(trail.clone()));
        }
        Ok(self.repository.get_trail(decision_id).await?)
    }

    pub async fn get_agent_decisions(
        &self,
        agent_type: &str,
        agent_name: &str,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<AuditTrail>> {
        Ok(self.repository.get_agent_decisions(agent_type, agent_name, since).await?)
    }

    pub async fn get_decisions_requiring_review(&self) -> DomainResult<Vec<AuditTrail>> {
        Ok(self.repository.get_decisions_requiring_review().await?)
    }

    pub async fn generate_explanation(&self, decision_id: Uuid, level: ExplanationLevel) -> DomainResult<Explanation> {
        let trail = self
            .get_decision_audit(decision_id)
            .await?
            .ok_or(DomainError::DecisionNotFound(decision_id))?;
        Ok(generate_explanation(&trail, level))
    }

    pub async fn get_audit_trail_for_compliance(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<Vec<AuditTrail>> {
        Ok(self.repository.get_trails_in_range(start, end).await?)
    }

    /// Serializes trails in `[start, end]` to a flat JSON array and writes
    /// the artifact to `path`. `import_audit_data` reads it back.
    pub async fn export_audit_data(
        &self,
        path: &std::path::Path,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<usize> {
        let trails = self.get_audit_trail_for_compliance(start, end).await?;
        let count = trails.len();
        let json = serde_json::to_vec_pretty(&trails)
            .map_err(|e| DomainError::Validation(crate::domain::errors::ValidationError::Other(e.to_string())))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| DomainError::Persistence(PersistenceError::Io(e.to_string())))?;
        Ok(count)
    }

    /// Reads back an artifact written by `export_audit_data`. Does not
    /// re-insert the trails into `active_trails` or the repository; callers
    /// that need a re-import to be queryable persist the result themselves.
    pub async fn import_audit_data(&self, path: &std::path::Path) -> DomainResult<Vec<AuditTrail>> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DomainError::Persistence(PersistenceError::Io(e.to_string())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DomainError::Validation(crate::domain::errors::ValidationError::Other(e.to_string())))
    }

    /// Mean confidence score and trigger rate across decisions by
    /// `agent_type` since `since`.
    pub async fn get_agent_performance_analytics(&self, agent_type: &str, since: DateTime<Utc>) -> DomainResult<Value> {
        let trails = self.repository.get_agent_decisions(agent_type, "", since).await?;
        let total = trails.len();
        let reviewed = trails.iter().filter(|t| t.requires_human_review).count();
        let mean_confidence = mean_confidence_score(&trails);
        Ok(serde_json::json!({
            "agent_type": agent_type,
            "total_decisions": total,
            "decisions_requiring_review": reviewed,
            "mean_confidence_score": mean_confidence,
        }))
    }

    pub async fn get_decision_pattern_analysis(&self, agent_type: &str, since: DateTime<Utc>) -> DomainResult<Value> {
        let trails = self.repository.get_agent_decisions(agent_type, "", since).await?;
        let mut event_counts: HashMap<&'static str, usize> = HashMap::new();
        for trail in &trails {
            for step in &trail.steps {
                *event_counts.entry(event_type_label(step.event_type)).or_insert(0) += 1;
            }
        }
        Ok(serde_json::json!({
            "agent_type": agent_type,
            "decision_count": trails.len(),
            "step_event_counts": event_counts,
        }))
    }

    #[must_use]
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.counters.total_decisions_audited.load(Ordering::Relaxed),
            self.counters.decisions_requiring_review.load(Ordering::Relaxed),
            self.counters.human_reviews_completed.load(Ordering::Relaxed),
        )
    }
}

/// Reliability scale for the data source a step's output claims to have
/// come from. Steps that don't name a source are treated as
/// `primary_db` (no discount).
fn source_reliability_scale(metadata: &HashMap<String, Value>) -> f64 {
    match metadata.get("data_source").and_then(Value::as_str) {
        Some("cache") => 0.9,
        Some("external_api") => 0.8,
        Some("llm_generated") => 0.7,
        Some("inferred") => 0.6,
        Some("primary_db") | None | Some(_) => 1.0,
    }
}

/// Processing-time sanity scale: a suspiciously fast step
/// or a very slow one is discounted slightly, on the theory that either
/// extreme is less trustworthy than a step that took a normal amount of
/// time.
fn processing_time_scale(processing_time: ChronoDuration) -> f64 {
    if processing_time < ChronoDuration::milliseconds(100) {
        0.95
    } else if processing_time > ChronoDuration::seconds(5) {
        0.9
    } else {
        1.0
    }
}

/// Event-type-specific adjustment: risk level, pattern strength, sample
/// size, LLM temperature, human approval. Each reads
/// an optional field from the step's output and nudges the impact; a
/// step that doesn't carry the relevant field contributes nothing.
fn event_type_specific_adjustment(event_type: AuditEventType, output_data: &Value) -> f64 {
    match event_type {
        AuditEventType::RiskAssessment => match output_data.get("risk_level").and_then(Value::as_str) {
            Some("HIGH") | Some("CRITICAL") => -0.05,
            Some("LOW") => 0.03,
            _ => 0.0,
        },
        AuditEventType::PatternAnalysis => {
            let strength = output_data.get("pattern_strength").and_then(Value::as_f64).unwrap_or(0.0);
            (strength - 0.5) * 0.1
        }
        AuditEventType::KnowledgeQuery => {
            let sample_size = output_data.get("sample_size").and_then(Value::as_f64).unwrap_or(0.0);
            if sample_size >= 20.0 {
                0.03
            } else if sample_size > 0.0 {
                -0.02
            } else {
                0.0
            }
        }
        AuditEventType::LlmInference => {
            let temperature = output_data.get("llm_temperature").and_then(Value::as_f64).unwrap_or(0.0);
            -temperature * 0.1
        }
        AuditEventType::HumanFeedbackReceived => {
            if output_data.get("human_approval").and_then(Value::as_bool) == Some(true) {
                0.1
            } else {
                -0.1
            }
        }
        _ => 0.0,
    }
}

/// Confidence impact formula: a base factor per event
/// type, adjusted by the step's output-quality signals, the reliability
/// of the data source it read from, a processing-time sanity check,
/// error/warning counts, event-type-specific signals, and finally
/// halved again when the step degraded to a circuit-breaker fallback.
/// Clamped to `[-0.5, 0.5]` by `AuditStep::new`. A step that missed its
/// per-step deadline skips the formula entirely: a timeout is
/// not merely a discount on some other signal, it is its own guaranteed
/// negative signal, so the step always reports `-0.5`.
fn derive_confidence_impact(
    event_type: AuditEventType,
    output_data: &Value,
    metadata: &HashMap<String, Value>,
    processing_time: ChronoDuration,
    is_fallback: bool,
    is_timeout: bool,
) -> f64 {
    if is_timeout {
        return -0.5;
    }
    let base = event_type.base_confidence_factor();

    let confidence_term = output_data
        .get("confidence_score")
        .and_then(Value::as_f64)
        .map_or(0.0, |c| (c - 0.5) * 0.2);

    let data_quality_scale = output_data
        .get("data_quality_score")
        .and_then(Value::as_f64)
        .map_or(1.0, |q| (0.8 + 0.4 * q.clamp(0.0, 1.0)).clamp(0.8, 1.2));

    let consistency_scale = output_data
        .get("consistency_score")
        .and_then(Value::as_f64)
        .map_or(1.0, |c| (0.9 + 0.2 * c.clamp(0.0, 1.0)).clamp(0.9, 1.1));

    let error_count = output_data.get("error_count").and_then(Value::as_f64).unwrap_or(0.0);
    let warning_count = output_data.get("warning_count").and_then(Value::as_f64).unwrap_or(0.0);
    let error_penalty = error_count * 0.05 + warning_count * 0.02;

    let mut impact = (base + confidence_term) * data_quality_scale * consistency_scale
        * source_reliability_scale(metadata)
        * processing_time_scale(processing_time)
        - error_penalty
        + event_type_specific_adjustment(event_type, output_data);

    if is_fallback {
        impact *= FALLBACK_RELIABILITY_MULTIPLIER;
    }
    impact
}

/// Confidence aggregation: average `output.confidence_score`
/// across the `CONFIDENCE_CALCULATION` and `RISK_ASSESSMENT` steps, mapped
/// via `Confidence::from_score`'s `{0.3, 0.5, 0.7, 0.9}` thresholds. A
/// trail with no steps of either kind has nothing to average, so it falls
/// back to `Medium` rather than a misleadingly precise bucket.
fn aggregate_confidence(steps: &[AuditStep]) -> Confidence {
    let scores: Vec<f64> = steps
        .iter()
        .filter(|s| matches!(s.event_type, AuditEventType::ConfidenceCalculation | AuditEventType::RiskAssessment))
        .filter_map(|s| s.output_data.get("confidence_score").and_then(Value::as_f64))
        .collect();

    if scores.is_empty() {
        return Confidence::Medium;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    Confidence::from_score(mean.clamp(0.0, 1.0))
}

/// Human-review trigger logic: collects every applicable
/// trigger so the reason string is deterministic and names all of them,
/// not just the first one found.
fn should_request_human_review(
    trail: &AuditTrail,
    low_confidence_threshold: Confidence,
    financial_impact_threshold: f64,
) -> Option<String> {
    let mut reasons = Vec::new();

    if let Some(confidence) = trail.final_confidence {
        if confidence <= low_confidence_threshold {
            reasons.push(format!("aggregate confidence {confidence:?} is at or below the review threshold"));
        }
    }

    if let Some(impact) = trail.final_decision.as_ref().and_then(|d| d.get("financial_impact")).and_then(Value::as_f64) {
        if impact > financial_impact_threshold {
            reasons.push(format!("financial impact {impact} exceeds the review threshold {financial_impact_threshold}"));
        }
    }

    if trail.agent_type == REGULATORY_ASSESSOR_AGENT_TYPE {
        reasons.push("regulatory assessments always require human review".to_string());
    }

    if trail.steps.iter().any(AuditStep::is_degraded) {
        reasons.push("a decision step degraded to a circuit-breaker fallback or missed its deadline".to_string());
    }

    if reasons.is_empty() {
        None
    } else {
        Some(reasons.join("; "))
    }
}

fn build_decision_tree(steps: &[AuditStep]) -> Value {
    let flowchart = build_flowchart(steps);
    serde_json::to_value(flowchart).unwrap_or(Value::Null)
}

fn build_flowchart(steps: &[AuditStep]) -> DecisionFlowchart {
    let nodes: Vec<FlowchartNode> = steps
        .iter()
        .map(|s| FlowchartNode {
            step_id: s.step_id,
            label: format!("{:?}: {}", s.event_type, s.description),
        })
        .collect();
    let edges = steps
        .windows(2)
        .map(|w| FlowchartEdge {
            from: w[0].step_id,
            to: w[1].step_id,
        })
        .collect();
    DecisionFlowchart { nodes, edges }
}

fn event_type_label(event_type: AuditEventType) -> &'static str {
    match event_type {
        AuditEventType::DecisionStarted => "decision_started",
        AuditEventType::DataRetrieval => "data_retrieval",
        AuditEventType::PatternAnalysis => "pattern_analysis",
        AuditEventType::RiskAssessment => "risk_assessment",
        AuditEventType::KnowledgeQuery => "knowledge_query",
        AuditEventType::LlmInference => "llm_inference",
        AuditEventType::RuleEvaluation => "rule_evaluation",
        AuditEventType::ConfidenceCalculation => "confidence_calculation",
        AuditEventType::DecisionFinalized => "decision_finalized",
        AuditEventType::HumanReviewRequested => "human_review_requested",
        AuditEventType::HumanFeedbackReceived => "human_feedback_received",
    }
}

fn mean_confidence_score(trails: &[AuditTrail]) -> f64 {
    let scores: Vec<f64> = trails
        .iter()
        .filter_map(|t| t.final_confidence)
        .map(confidence_to_score)
        .collect();
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

fn confidence_to_score(confidence: Confidence) -> f64 {
    match confidence {
        Confidence::VeryLow => 0.15,
        Confidence::Low => 0.4,
        Confidence::Medium => 0.6,
        Confidence::High => 0.8,
        Confidence::VeryHigh => 0.95,
    }
}

/// Generate a natural-language explanation at the requested level (spec
/// §4.4.3). Higher levels progressively attach more raw material:
/// `HighLevel` is a one-line summary, `Debug` includes the raw steps.
fn generate_explanation(trail: &AuditTrail, level: ExplanationLevel) -> Explanation {
    let key_factors = extract_key_factors(trail);
    let risk_indicators = identify_risk_indicators(trail);
    let confidence_factors = analyze_confidence_factors(trail);

    let summary = natural_language_summary(trail, &key_factors);

    let (decision_flowchart, step_timings, raw_steps) = match level {
        ExplanationLevel::HighLevel => (None, None, None),
        ExplanationLevel::Detailed => (Some(build_flowchart(&trail.steps)), None, None),
        ExplanationLevel::Technical => (Some(build_flowchart(&trail.steps)), Some(step_timings(trail)), None),
        ExplanationLevel::Debug => (
            Some(build_flowchart(&trail.steps)),
            Some(step_timings(trail)),
            Some(trail.steps.clone()),
        ),
    };

    Explanation {
        explanation_id: Uuid::new_v4(),
        decision_id: trail.decision_id,
        level,
        natural_language_summary: summary,
        key_factors,
        risk_indicators,
        confidence_factors,
        decision_flowchart,
        step_timings,
        raw_steps,
        generated_at: Utc::now(),
    }
}

fn natural_language_summary(trail: &AuditTrail, key_factors: &[String]) -> String {
    let confidence = trail.final_confidence.map_or("unknown".to_string(), |c| format!("{c:?}"));
    let review_note = if trail.requires_human_review {
        " This decision has been flagged for human review."
    } else {
        ""
    };
    format!(
        "{} produced a decision with {} confidence after {} step(s). Key factors: {}.{}",
        trail.agent_name,
        confidence,
        trail.steps.len(),
        if key_factors.is_empty() { "none identified".to_string() } else { key_factors.join(", ") },
        review_note
    )
}

fn extract_key_factors(trail: &AuditTrail) -> Vec<String> {
    trail
        .steps
        .iter()
        .filter(|s| s.confidence_impact.abs() >= 0.15)
        .map(|s| s.description.clone())
        .collect()
}

fn identify_risk_indicators(trail: &AuditTrail) -> Vec<String> {
    let mut indicators = Vec::new();
    if let Some(risk) = &trail.risk_assessment {
        indicators.push(format!("risk level {:?} (score {:.2})", risk.risk_level, risk.risk_score));
    }
    for step in &trail.steps {
        if step.is_timeout() {
            indicators.push(format!("{:?} missed its per-step deadline", step.event_type));
        } else if step.is_fallback() {
            indicators.push(format!("{:?} fell back after a circuit-breaker trip", step.event_type));
        }
    }
    indicators
}

fn analyze_confidence_factors(trail: &AuditTrail) -> Vec<SignedFactor> {
    trail
        .steps
        .iter()
        .filter(|s| s.confidence_impact != 0.0)
        .map(|s| SignedFactor {
            description: s.description.clone(),
            impact: s.confidence_impact,
        })
        .collect()
}

fn step_timings(trail: &AuditTrail) -> Vec<StepTiming> {
    trail
        .steps
        .iter()
        .map(|s| StepTiming {
            step_id: s.step_id,
            event_type: s.event_type,
            processing_time: s.processing_time,
            confidence_impact: s.confidence_impact,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::PersistenceError;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex as TokioMutex;

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
        async fn get_agent_decisions(&self, _agent_type: &str, _agent_name: &str, _since: DateTime<Utc>) -> Result<Vec<AuditTrail>, PersistenceError> {
            Ok(self.trails.lock().await.values().cloned().collect())
        }
        async fn get_decisions_requiring_review(&self) -> Result<Vec<AuditTrail>, PersistenceError> {
            Ok(self.trails.lock().await.values().filter(|t| t.requires_human_review).cloned().collect())
        }
        async fn save_human_review(&self, _review: &HumanReview) -> Result<(), PersistenceError> {
            Ok(())
        }
        async fn mark_review_resolved(&self, decision_id: Uuid) -> Result<(), PersistenceError> {
            if let Some(trail) = self.trails.lock().await.get_mut(&decision_id) {
                trail.requires_human_review = false;
            }
            Ok(())
        }
        async fn mark_requires_review(&self, decision_id: Uuid, reason: &str) -> Result<(), PersistenceError> {
            if let Some(trail) = self.trails.lock().await.get_mut(&decision_id) {
                trail.requires_human_review = true;
                trail.human_review_reason = Some(reason.to_string());
            }
            Ok(())
        }
        async fn attach_human_feedback(&self, decision_id: Uuid, feedback: &HumanFeedback) -> Result<(), PersistenceError> {
            if let Some(trail) = self.trails.lock().await.get_mut(&decision_id) {
                trail.human_feedback = Some(feedback.clone());
            }
            Ok(())
        }
        async fn get_trails_in_range(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<Vec<AuditTrail>, PersistenceError> {
            Ok(self.trails.lock().await.values().cloned().collect())
        }
    }

    fn manager() -> AuditTrailManager {
        AuditTrailManager::new(Arc::new(InMemoryAuditRepository::default()), AuditTrailConfig::default())
    }

    #[derive(Default)]
    struct FlakyAuditRepository {
        inner: InMemoryAuditRepository,
        save_attempts: AtomicU64,
    }

    #[async_trait]
    impl AuditRepository for FlakyAuditRepository {
        async fn save_finalized_trail(&self, trail: &AuditTrail, explanation: &Explanation) -> Result<(), PersistenceError> {
            if self.save_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(PersistenceError::PoolTimeout { waited_ms: 5 });
            }
            self.inner.save_finalized_trail(trail, explanation).await
        }
        async fn append_steps(&self, trail_id: Uuid, steps: &[AuditStep]) -> Result<(), PersistenceError> {
            self.inner.append_steps(trail_id, steps).await
        }
        async fn get_trail(&self, decision_id: Uuid) -> Result<Option<AuditTrail>, PersistenceError> {
            self.inner.get_trail(decision_id).await
        }
        async fn get_agent_decisions(&self, agent_type: &str, agent_name: &str, since: DateTime<Utc>) -> Result<Vec<AuditTrail>, PersistenceError> {
            self.inner.get_agent_decisions(agent_type, agent_name, since).await
        }
        async fn get_decisions_requiring_review(&self) -> Result<Vec<AuditTrail>, PersistenceError> {
            self.inner.get_decisions_requiring_review().await
        }
        async fn save_human_review(&self, review: &HumanReview) -> Result<(), PersistenceError> {
            self.inner.save_human_review(review).await
        }
        async fn mark_review_resolved(&self, decision_id: Uuid) -> Result<(), PersistenceError> {
            self.inner.mark_review_resolved(decision_id).await
        }
        async fn mark_requires_review(&self, decision_id: Uuid, reason: &str) -> Result<(), PersistenceError> {
            self.inner.mark_requires_review(decision_id, reason).await
        }
        async fn attach_human_feedback(&self, decision_id: Uuid, feedback: &HumanFeedback) -> Result<(), PersistenceError> {
            self.inner.attach_human_feedback(decision_id, feedback).await
        }
        async fn get_trails_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<AuditTrail>, PersistenceError> {
            self.inner.get_trails_in_range(start, end).await
        }
    }

    #[tokio::test]
    async fn finalize_retries_a_transient_persistence_failure() {
        let repo = Arc::new(FlakyAuditRepository::default());
        let manager = AuditTrailManager::with_retry_policy(
            Arc::clone(&repo) as Arc<dyn AuditRepository>,
            AuditTrailConfig::default(),
            RetryPolicy::new(3, 1, 4),
        );
        let decision_id = manager
            .start_decision_audit("transaction_guardian", "tg-1", Uuid::new_v4(), json!({}))
            .await;

        let trail = manager
            .finalize_decision_audit(decision_id, json!({"action": "allow"}), None, None, None)
            .await
            .unwrap();

        assert!(trail.is_finalized());
        assert_eq!(repo.save_attempts.load(Ordering::SeqCst), 2);
        assert!(manager.get_decision_audit(decision_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn finalize_requires_at_least_two_steps_for_review_eligibility() {
        let manager = manager();
        let decision_id = manager
            .start_decision_audit("transaction_guardian", "tg-1", Uuid::new_v4(), json!({"amount": 100}))
            .await;
        manager
            .record_decision_step(decision_id, AuditEventType::RiskAssessment, "assessed risk", json!({}), json!({"score": 0.2}), HashMap::new(), ChronoDuration::milliseconds(5))
            .await
            .unwrap();

        let trail = manager
            .finalize_decision_audit(decision_id, json!({"action": "allow"}), None, None, None)
            .await
            .unwrap();

        assert!(trail.steps_well_formed());
        assert!(trail.is_finalized());
    }

    #[tokio::test]
    async fn fallback_step_triggers_human_review() {
        let manager = manager();
        let decision_id = manager
            .start_decision_audit("transaction_guardian", "tg-1", Uuid::new_v4(), json!({}))
            .await;

        let mut fallback_metadata = HashMap::new();
        fallback_metadata.insert("status".to_string(), json!("fallback"));
        manager
            .record_decision_step(decision_id, AuditEventType::LlmInference, "llm breaker open", json!({}), json!({}), fallback_metadata, ChronoDuration::milliseconds(2))
            .await
            .unwrap();

        let trail = manager
            .finalize_decision_audit(decision_id, json!({"action": "escalate"}), None, None, None)
            .await
            .unwrap();

        assert!(trail.requires_human_review);
    }

    #[tokio::test]
    async fn timeout_step_triggers_human_review_with_forced_negative_impact() {
        let manager = manager();
        let decision_id = manager
            .start_decision_audit("transaction_guardian", "tg-1", Uuid::new_v4(), json!({}))
            .await;

        let mut timeout_metadata = HashMap::new();
        timeout_metadata.insert("status".to_string(), json!("timeout"));
        manager
            .record_decision_step(
                decision_id,
                AuditEventType::DataRetrieval,
                "data retrieval deadline exceeded",
                json!({}),
                json!({"confidence_score": 0.95, "data_quality_score": 1.0}),
                timeout_metadata,
                ChronoDuration::milliseconds(2),
            )
            .await
            .unwrap();

        let trail = manager
            .finalize_decision_audit(decision_id, json!({"action": "monitor"}), None, None, None)
            .await
            .unwrap();

        assert!(trail.requires_human_review);
        let timeout_step = trail.steps.iter().find(|s| s.is_timeout()).unwrap();
        assert_eq!(timeout_step.confidence_impact, -0.5);
    }

    #[tokio::test]
    async fn large_financial_impact_triggers_human_review() {
        let manager = manager();
        let decision_id = manager
            .start_decision_audit("transaction_guardian", "tg-1", Uuid::new_v4(), json!({}))
            .await;
        manager
            .record_decision_step(decision_id, AuditEventType::RiskAssessment, "assessed", json!({}), json!({}), HashMap::new(), ChronoDuration::milliseconds(1))
            .await
            .unwrap();
        manager
            .record_decision_step(decision_id, AuditEventType::ConfidenceCalculation, "confidence", json!({}), json!({}), HashMap::new(), ChronoDuration::milliseconds(1))
            .await
            .unwrap();

        let trail = manager
            .finalize_decision_audit(decision_id, json!({"action": "escalate", "financial_impact": 2_000_000.0}), None, None, None)
            .await
            .unwrap();

        assert!(trail.requires_human_review);
        assert!(trail.human_review_reason.unwrap().contains("financial impact"));
    }

    #[tokio::test]
    async fn regulatory_assessor_decisions_always_require_review() {
        let manager = manager();
        let decision_id = manager
            .start_decision_audit(REGULATORY_ASSESSOR_AGENT_TYPE, "ra-1", Uuid::new_v4(), json!({}))
            .await;
        manager
            .record_decision_step(decision_id, AuditEventType::RiskAssessment, "assessed", json!({}), json!({"confidence_score": 0.9}), HashMap::new(), ChronoDuration::milliseconds(1))
            .await
            .unwrap();
        manager
            .record_decision_step(decision_id, AuditEventType::ConfidenceCalculation, "confidence", json!({}), json!({"confidence_score": 0.9}), HashMap::new(), ChronoDuration::milliseconds(1))
            .await
            .unwrap();

        let trail = manager
            .finalize_decision_audit(decision_id, json!({"action": "monitor"}), None, None, None)
            .await
            .unwrap();

        assert!(trail.requires_human_review);
        assert!(trail.human_review_reason.unwrap().contains("regulatory"));
    }

    #[tokio::test]
    async fn unknown_decision_id_is_rejected() {
        let manager = manager();
        let err = manager
            .record_decision_step(Uuid::new_v4(), AuditEventType::DecisionStarted, "x", json!({}), json!({}), HashMap::new(), ChronoDuration::zero())
            .await;
        assert!(matches!(err, Err(DomainError::DecisionNotFound(_))));
    }

    #[tokio::test]
    async fn export_then_import_round_trips_the_trail_structure() {
        let manager = manager();
        let decision_id = manager
            .start_decision_audit("transaction_guardian", "tg-1", Uuid::new_v4(), json!({"amount": 500}))
            .await;
        manager
            .record_decision_step(decision_id, AuditEventType::RuleEvaluation, "rules", json!({}), json!({"confidence_score": 0.8}), HashMap::new(), ChronoDuration::milliseconds(5))
            .await
            .unwrap();
        manager
            .finalize_decision_audit(decision_id, json!({"action": "approve"}), None, None, None)
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        let start = Utc::now() - ChronoDuration::hours(1);
        let end = Utc::now() + ChronoDuration::hours(1);

        let exported_count = manager.export_audit_data(&path, start, end).await.unwrap();
        assert_eq!(exported_count, 1);

        let reimported = manager.import_audit_data(&path).await.unwrap();
        assert_eq!(reimported.len(), 1);
        let original = manager.get_decision_audit(decision_id).await.unwrap().unwrap();
        assert_eq!(reimported[0].decision_id, original.decision_id);
        assert_eq!(reimported[0].steps.len(), original.steps.len());
        assert_eq!(reimported[0].final_decision, original.final_decision);
    }
}
