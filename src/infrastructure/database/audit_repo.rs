//! `sqlx`-backed `AuditRepository`, backed by `decision_audit_trails` /
//! `decision_steps` / `decision_explanations` / `human_reviews`. The trail
//! header, its steps, and the derived explanation are written inside a
//! single transaction per `save_finalized_trail` call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::PersistenceError;
use crate::domain::models::{AuditStep, AuditTrail, Confidence, Explanation, HumanFeedback, HumanReview};
use crate::domain::ports::AuditRepository;

pub struct SqliteAuditRepository {
    pool: SqlitePool,
}

impl SqliteAuditRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn query_failed(err: sqlx::Error) -> PersistenceError {
    PersistenceError::QueryFailed(err.to_string())
}

fn to_json(value: impl serde::Serialize) -> Result<String, PersistenceError> {
    serde_json::to_string(&value).map_err(|e| PersistenceError::QueryFailed(e.to_string()))
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn save_finalized_trail(&self, trail: &AuditTrail, explanation: &Explanation) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await.map_err(|e| PersistenceError::TransactionFailed(e.to_string()))?;

        let final_decision = trail.final_decision.as_ref().map(to_json).transpose()?;
        let final_confidence = trail.final_confidence.map(confidence_to_str);
        let decision_tree = trail.decision_tree.as_ref().map(to_json).transpose()?;
        let risk_assessment = trail.risk_assessment.as_ref().map(to_json).transpose()?;
        let alternative_options = trail.alternative_options.as_ref().map(to_json).transpose()?;
        let human_feedback = trail.human_feedback.as_ref().map(to_json).transpose()?;
        let total_processing_time_ms = trail.total_processing_time.map(|d| d.num_milliseconds());

        sqlx::query(
            r"
            INSERT INTO decision_audit_trails
                (trail_id, decision_id, agent_type, agent_name, trigger_event, original_input, final_decision,
                 final_confidence, decision_tree, risk_assessment, alternative_options, started_at, completed_at,
                 total_processing_time_ms, requires_human_review, human_review_reason, human_feedback)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(decision_id) DO UPDATE SET
                final_decision = excluded.final_decision,
                final_confidence = excluded.final_confidence,
                decision_tree = excluded.decision_tree,
                risk_assessment = excluded.risk_assessment,
                alternative_options = excluded.alternative_options,
                completed_at = excluded.completed_at,
                total_processing_time_ms = excluded.total_processing_time_ms,
                requires_human_review = excluded.requires_human_review,
                human_review_reason = excluded.human_review_reason,
                human_feedback = excluded.human_feedback
            ",
        )
        .bind(trail.trail_id.to_string())
        .bind(trail.decision_id.to_string())
        .bind(&trail.agent_type)
        .bind(&trail.agent_name)
        .bind(trail.trigger_event.to_string())
        .bind(to_json(&trail.original_input)?)
        .bind(final_decision)
        .bind(final_confidence)
        .bind(decision_tree)
        .bind(risk_assessment)
        .bind(alternative_options)
        .bind(trail.started_at)
        .bind(trail.completed_at)
        .bind(total_processing_time_ms)
        .bind(trail.requires_human_review)
        .bind(&trail.human_review_reason)
        .bind(human_feedback)
        .execute(&mut *tx)
        .await
        .map_err(query_failed)?;

        for step in &trail.steps {
            insert_step(&mut tx, step).await?;
        }

        let key_factors = to_json(&explanation.key_factors)?;
        let risk_indicators = to_json(&explanation.risk_indicators)?;
        let confidence_factors = to_json(&explanation.confidence_factors)?;
        let decision_flowchart = explanation.decision_flowchart.as_ref().map(to_json).transpose()?;
        let step_timings = explanation.step_timings.as_ref().map(to_json).transpose()?;
        let raw_steps = explanation.raw_steps.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r"
            INSERT INTO decision_explanations
                (explanation_id, decision_id, level, natural_language_summary, key_factors, risk_indicators,
                 confidence_factors, decision_flowchart, step_timings, raw_steps, generated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(explanation.explanation_id.to_string())
        .bind(explanation.decision_id.to_string())
        .bind(format!("{:?}", explanation.level))
        .bind(&explanation.natural_language_summary)
        .bind(key_factors)
        .bind(risk_indicators)
        .bind(confidence_factors)
        .bind(decision_flowchart)
        .bind(step_timings)
        .bind(raw_steps)
        .bind(explanation.generated_at)
        .execute(&mut *tx)
        .await
        .map_err(query_failed)?;

        tx.commit().await.map_err(|e| PersistenceError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    async fn append_steps(&self, trail_id: Uuid, steps: &[AuditStep]) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await.map_err(|e| PersistenceError::TransactionFailed(e.to_string()))?;
        for step in steps {
            debug_assert_eq!(step.trail_id, trail_id);
            insert_step(&mut tx, step).await?;
        }
        tx.commit().await.map_err(|e| PersistenceError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    async fn get_trail(&self, decision_id: Uuid) -> Result<Option<AuditTrail>, PersistenceError> {
        let row: Option<TrailRow> = sqlx::query_as(
            r"SELECT trail_id, decision_id, agent_type, agent_name, trigger_event, original_input, final_decision,
                     final_confidence, decision_tree, risk_assessment, alternative_options, started_at, completed_at,
                     total_processing_time_ms, requires_human_review, human_review_reason, human_feedback
              FROM decision_audit_trails WHERE decision_id = ?",
        )
        .bind(decision_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        let Some(row) = row else { return Ok(None) };
        let steps = self.load_steps(row.trail_id.parse().map_err(|_| PersistenceError::QueryFailed("invalid trail_id".into()))?).await?;
        row.into_trail(steps).map(Some)
    }

    async fn get_agent_decisions(&self, agent_type: &str, agent_name: &str, since: DateTime<Utc>) -> Result<Vec<AuditTrail>, PersistenceError> {
        let rows: Vec<TrailRow> = sqlx::query_as(
            r"SELECT trail_id, decision_id, agent_type, agent_name, trigger_event, original_input, final_decision,
                     final_confidence, decision_tree, risk_assessment, alternative_options, started_at, completed_at,
                     total_processing_time_ms, requires_human_review, human_review_reason, human_feedback
              FROM decision_audit_trails
              WHERE agent_type = ? AND (agent_name = ? OR ? = '') AND started_at >= ?",
        )
        .bind(agent_type)
        .bind(agent_name)
        .bind(agent_name)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        self.hydrate_trails(rows).await
    }

    async fn get_decisions_requiring_review(&self) -> Result<Vec<AuditTrail>, PersistenceError> {
        let rows: Vec<TrailRow> = sqlx::query_as(
            r"SELECT trail_id, decision_id, agent_type, agent_name, trigger_event, original_input, final_decision,
                     final_confidence, decision_tree, risk_assessment, alternative_options, started_at, completed_at,
                     total_processing_time_ms, requires_human_review, human_review_reason, human_feedback
              FROM decision_audit_trails WHERE requires_human_review = 1",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        self.hydrate_trails(rows).await
    }

    async fn save_human_review(&self, review: &HumanReview) -> Result<(), PersistenceError> {
        sqlx::query(
            r"INSERT INTO human_reviews (review_id, decision_id, reviewer_id, feedback, approved, reviewed_at)
              VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(review.review_id.to_string())
        .bind(review.decision_id.to_string())
        .bind(&review.reviewer_id)
        .bind(&review.feedback)
        .bind(review.approved)
        .bind(review.reviewed_at)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;
        Ok(())
    }

    async fn mark_review_resolved(&self, decision_id: Uuid) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE decision_audit_trails SET requires_human_review = 0 WHERE decision_id = ?")
            .bind(decision_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(query_failed)?;
        Ok(())
    }

    async fn mark_requires_review(&self, decision_id: Uuid, reason: &str) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE decision_audit_trails SET requires_human_review = 1, human_review_reason = ? WHERE decision_id = ?")
            .bind(reason)
            .bind(decision_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(query_failed)?;
        Ok(())
    }

    async fn attach_human_feedback(&self, decision_id: Uuid, feedback: &HumanFeedback) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE decision_audit_trails SET human_feedback = ? WHERE decision_id = ?")
            .bind(to_json(feedback)?)
            .bind(decision_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(query_failed)?;
        Ok(())
    }

    async fn get_trails_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<AuditTrail>, PersistenceError> {
        let rows: Vec<TrailRow> = sqlx::query_as(
            r"SELECT trail_id, decision_id, agent_type, agent_name, trigger_event, original_input, final_decision,
                     final_confidence, decision_tree, risk_assessment, alternative_options, started_at, completed_at,
                     total_processing_time_ms, requires_human_review, human_review_reason, human_feedback
              FROM decision_audit_trails WHERE started_at >= ? AND started_at <= ?",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        self.hydrate_trails(rows).await
    }
}

impl SqliteAuditRepository {
    async fn hydrate_trails(&self, rows: Vec<TrailRow>) -> Result<Vec<AuditTrail>, PersistenceError> {
        let mut trails = Vec::with_capacity(rows.len());
        for row in rows {
            let trail_id: Uuid = row.trail_id.parse().map_err(|_| PersistenceError::QueryFailed("invalid trail_id".into()))?;
            let steps = self.load_steps(trail_id).await?;
            trails.push(row.into_trail(steps)?);
        }
        Ok(trails)
    }

    async fn load_steps(&self, trail_id: Uuid) -> Result<Vec<AuditStep>, PersistenceError> {
        let rows: Vec<StepRow> = sqlx::query_as(
            r"SELECT step_id, trail_id, event_type, description, input_data, output_data, metadata,
                     processing_time_ms, confidence_impact, timestamp
              FROM decision_steps WHERE trail_id = ? ORDER BY timestamp ASC",
        )
        .bind(trail_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

async fn insert_step(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, step: &AuditStep) -> Result<(), PersistenceError> {
    let metadata = to_json(&step.metadata)?;
    sqlx::query(
        r"INSERT INTO decision_steps
            (step_id, trail_id, event_type, description, input_data, output_data, metadata, processing_time_ms, confidence_impact, timestamp)
          VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(step.step_id.to_string())
    .bind(step.trail_id.to_string())
    .bind(format!("{:?}", step.event_type))
    .bind(&step.description)
    .bind(to_json(&step.input_data)?)
    .bind(to_json(&step.output_data)?)
    .bind(metadata)
    .bind(step.processing_time.num_milliseconds())
    .bind(step.confidence_impact)
    .bind(step.timestamp)
    .execute(&mut **tx)
    .await
    .map_err(query_failed)?;
    Ok(())
}

fn confidence_to_str(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::VeryLow => "VERY_LOW",
        Confidence::Low => "LOW",
        Confidence::Medium => "MEDIUM",
        Confidence::High => "HIGH",
        Confidence::VeryHigh => "VERY_HIGH",
    }
}

fn confidence_from_str(s: &str) -> Confidence {
    match s {
        "LOW" => Confidence::Low,
        "MEDIUM" => Confidence::Medium,
        "HIGH" => Confidence::High,
        "VERY_HIGH" => Confidence::VeryHigh,
        _ => Confidence::VeryLow,
    }
}

#[derive(sqlx::FromRow)]
struct TrailRow {
    trail_id: String,
    decision_id: String,
    agent_type: String,
    agent_name: String,
    trigger_event: String,
    original_input: String,
    final_decision: Option<String>,
    final_confidence: Option<String>,
    decision_tree: Option<String>,
    risk_assessment: Option<String>,
    alternative_options: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    total_processing_time_ms: Option<i64>,
    requires_human_review: bool,
    human_review_reason: Option<String>,
    human_feedback: Option<String>,
}

impl TrailRow {
    fn into_trail(self, steps: Vec<AuditStep>) -> Result<AuditTrail, PersistenceError> {
        let parse_json = |s: Option<String>| -> Result<Option<serde_json::Value>, PersistenceError> {
            s.map(|s| serde_json::from_str(&s).map_err(|e| PersistenceError::QueryFailed(e.to_string()))).transpose()
        };

        Ok(AuditTrail {
            trail_id: self.trail_id.parse().map_err(|_| PersistenceError::QueryFailed("invalid trail_id".into()))?,
            decision_id: self.decision_id.parse().map_err(|_| PersistenceError::QueryFailed("invalid decision_id".into()))?,
            agent_type: self.agent_type,
            agent_name: self.agent_name,
            trigger_event: self.trigger_event.parse().map_err(|_| PersistenceError::QueryFailed("invalid trigger_event".into()))?,
            original_input: serde_json::from_str(&self.original_input).map_err(|e| PersistenceError::QueryFailed(e.to_string()))?,
            steps,
            final_decision: parse_json(self.final_decision)?,
            final_confidence: self.final_confidence.as_deref().map(confidence_from_str),
            decision_tree: parse_json(self.decision_tree)?,
            risk_assessment: self
                .risk_assessment
                .map(|s| serde_json::from_str(&s).map_err(|e| PersistenceError::QueryFailed(e.to_string())))
                .transpose()?,
            alternative_options: parse_json(self.alternative_options)?,
            started_at: self.started_at,
            completed_at: self.completed_at,
            total_processing_time: self.total_processing_time_ms.map(chrono::Duration::milliseconds),
            requires_human_review: self.requires_human_review,
            human_review_reason: self.human_review_reason,
            human_feedback: self
                .human_feedback
                .map(|s| serde_json::from_str::<HumanFeedback>(&s).map_err(|e| PersistenceError::QueryFailed(e.to_string())))
                .transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StepRow {
    step_id: String,
    trail_id: String,
    event_type: String,
    description: String,
    input_data: String,
    output_data: String,
    metadata: String,
    processing_time_ms: i64,
    confidence_impact: f64,
    timestamp: DateTime<Utc>,
}

impl TryFrom<StepRow> for AuditStep {
    type Error = PersistenceError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        Ok(Self {
            step_id: row.step_id.parse().map_err(|_| PersistenceError::QueryFailed("invalid step_id".into()))?,
            trail_id: row.trail_id.parse().map_err(|_| PersistenceError::QueryFailed("invalid trail_id".into()))?,
            event_type: event_type_from_str(&row.event_type),
            description: row.description,
            input_data: serde_json::from_str(&row.input_data).map_err(|e| PersistenceError::QueryFailed(e.to_string()))?,
            output_data: serde_json::from_str(&row.output_data).map_err(|e| PersistenceError::QueryFailed(e.to_string()))?,
            metadata: serde_json::from_str(&row.metadata).map_err(|e| PersistenceError::QueryFailed(e.to_string()))?,
            processing_time: chrono::Duration::milliseconds(row.processing_time_ms),
            confidence_impact: row.confidence_impact,
            timestamp: row.timestamp,
        })
    }
}

fn event_type_from_str(s: &str) -> crate::domain::models::AuditEventType {
    use crate::domain::models::AuditEventType;
    match s {
        "DataRetrieval" => AuditEventType::DataRetrieval,
        "PatternAnalysis" => AuditEventType::PatternAnalysis,
        "RiskAssessment" => AuditEventType::RiskAssessment,
        "KnowledgeQuery" => AuditEventType::KnowledgeQuery,
        "LlmInference" => AuditEventType::LlmInference,
        "RuleEvaluation" => AuditEventType::RuleEvaluation,
        "ConfidenceCalculation" => AuditEventType::ConfidenceCalculation,
        "DecisionFinalized" => AuditEventType::DecisionFinalized,
        "HumanReviewRequested" => AuditEventType::HumanReviewRequested,
        "HumanFeedbackReceived" => AuditEventType::HumanFeedbackReceived,
        _ => AuditEventType::DecisionStarted,
    }
}
