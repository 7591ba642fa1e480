//! `sqlx`-backed `RuleRepository`, storing conditions/tags as JSON text
//! columns in `advanced_rules` / `rule_evaluation_results`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::PersistenceError;
use crate::domain::models::{Rule, RuleAction, RuleCategory, RuleCondition, RuleResult, RuleSeverity};
use crate::domain::ports::RuleRepository;

pub struct SqliteRuleRepository {
    pool: SqlitePool,
}

impl SqliteRuleRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn query_failed(err: sqlx::Error) -> PersistenceError {
    PersistenceError::QueryFailed(err.to_string())
}

#[async_trait]
impl RuleRepository for SqliteRuleRepository {
    async fn upsert_rule(&self, rule: &Rule) -> Result<(), PersistenceError> {
        let conditions = serde_json::to_string(&rule.conditions).map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
        let tags = serde_json::to_string(&rule.tags).map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO advanced_rules
                (rule_id, name, category, severity, conditions, action, threshold_score, tags, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(rule_id) DO UPDATE SET
                name = excluded.name,
                category = excluded.category,
                severity = excluded.severity,
                conditions = excluded.conditions,
                action = excluded.action,
                threshold_score = excluded.threshold_score,
                tags = excluded.tags,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&rule.rule_id)
        .bind(&rule.name)
        .bind(category_to_str(rule.category))
        .bind(severity_to_str(rule.severity))
        .bind(conditions)
        .bind(action_to_str(rule.action))
        .bind(rule.threshold_score)
        .bind(tags)
        .bind(rule.enabled)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(())
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM advanced_rules WHERE rule_id = ?")
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .map_err(query_failed)?;
        Ok(())
    }

    async fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<(), PersistenceError> {
        let result = sqlx::query("UPDATE advanced_rules SET enabled = ?, updated_at = ? WHERE rule_id = ?")
            .bind(enabled)
            .bind(Utc::now())
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .map_err(query_failed)?;
        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(format!("rule {rule_id}")));
        }
        Ok(())
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>, PersistenceError> {
        let row: Option<RuleRow> = sqlx::query_as(
            "SELECT rule_id, name, category, severity, conditions, action, threshold_score, tags, enabled, created_at, updated_at FROM advanced_rules WHERE rule_id = ?",
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn load_all(&self) -> Result<Vec<Rule>, PersistenceError> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            "SELECT rule_id, name, category, severity, conditions, action, threshold_score, tags, enabled, created_at, updated_at FROM advanced_rules",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_result(&self, result: &RuleResult) -> Result<(), PersistenceError> {
        let matched_conditions = serde_json::to_string(&result.matched_conditions).map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
        let condition_scores = serde_json::to_string(&result.condition_scores).map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO rule_evaluation_results
                (evaluation_id, rule_id, entity_id, score, triggered, action, matched_conditions, condition_scores, processing_time_ms, evaluated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(result.evaluation_id.to_string())
        .bind(&result.rule_id)
        .bind(&result.entity_id)
        .bind(result.score)
        .bind(result.triggered)
        .bind(action_to_str(result.action))
        .bind(matched_conditions)
        .bind(condition_scores)
        .bind(result.processing_time.num_milliseconds())
        .bind(result.evaluated_at)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    rule_id: String,
    name: String,
    category: String,
    severity: String,
    conditions: String,
    action: String,
    threshold_score: f64,
    tags: String,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RuleRow> for Rule {
    type Error = PersistenceError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        let conditions: Vec<RuleCondition> = serde_json::from_str(&row.conditions).map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
        let tags: Vec<String> = serde_json::from_str(&row.tags).map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;

        Ok(Self {
            rule_id: row.rule_id,
            name: row.name,
            category: category_from_str(&row.category),
            severity: severity_from_str(&row.severity),
            conditions,
            action: action_from_str(&row.action),
            threshold_score: row.threshold_score,
            tags,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn category_to_str(category: RuleCategory) -> &'static str {
    match category {
        RuleCategory::FraudDetection => "FRAUD_DETECTION",
        RuleCategory::ComplianceCheck => "COMPLIANCE_CHECK",
        RuleCategory::RiskAssessment => "RISK_ASSESSMENT",
        RuleCategory::BusinessLogic => "BUSINESS_LOGIC",
        RuleCategory::SecurityPolicy => "SECURITY_POLICY",
        RuleCategory::AuditProcedure => "AUDIT_PROCEDURE",
    }
}

fn category_from_str(s: &str) -> RuleCategory {
    match s {
        "COMPLIANCE_CHECK" => RuleCategory::ComplianceCheck,
        "RISK_ASSESSMENT" => RuleCategory::RiskAssessment,
        "BUSINESS_LOGIC" => RuleCategory::BusinessLogic,
        "SECURITY_POLICY" => RuleCategory::SecurityPolicy,
        "AUDIT_PROCEDURE" => RuleCategory::AuditProcedure,
        _ => RuleCategory::FraudDetection,
    }
}

fn severity_to_str(severity: RuleSeverity) -> &'static str {
    match severity {
        RuleSeverity::Low => "LOW",
        RuleSeverity::Medium => "MEDIUM",
        RuleSeverity::High => "HIGH",
        RuleSeverity::Critical => "CRITICAL",
    }
}

fn severity_from_str(s: &str) -> RuleSeverity {
    match s {
        "MEDIUM" => RuleSeverity::Medium,
        "HIGH" => RuleSeverity::High,
        "CRITICAL" => RuleSeverity::Critical,
        _ => RuleSeverity::Low,
    }
}

fn action_to_str(action: RuleAction) -> &'static str {
    match action {
        RuleAction::Allow => "allow",
        RuleAction::Deny => "deny",
        RuleAction::Escalate => "escalate",
        RuleAction::Monitor => "monitor",
        RuleAction::Alert => "alert",
        RuleAction::Quarantine => "quarantine",
    }
}

fn action_from_str(s: &str) -> RuleAction {
    match s {
        "deny" => RuleAction::Deny,
        "escalate" => RuleAction::Escalate,
        "monitor" => RuleAction::Monitor,
        "alert" => RuleAction::Alert,
        "quarantine" => RuleAction::Quarantine,
        _ => RuleAction::Allow,
    }
}
