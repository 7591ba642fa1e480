//! Persistence port for `decision_audit_trails` / `decision_steps` /
//! `decision_explanations` / `human_reviews`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::PersistenceError;
use crate::domain::models::{AuditStep, AuditTrail, Explanation, HumanFeedback, HumanReview};

#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Persist the trail header and its ordered steps, then the derived
    /// explanation, in a single transaction.
    async fn save_finalized_trail(
        &self,
        trail: &AuditTrail,
        explanation: &Explanation,
    ) -> Result<(), PersistenceError>;

    async fn append_steps(&self, trail_id: Uuid, steps: &[AuditStep]) -> Result<(), PersistenceError>;

    async fn get_trail(&self, decision_id: Uuid) -> Result<Option<AuditTrail>, PersistenceError>;

    async fn get_agent_decisions(
        &self,
        agent_type: &str,
        agent_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditTrail>, PersistenceError>;

    async fn get_decisions_requiring_review(&self) -> Result<Vec<AuditTrail>, PersistenceError>;

    async fn save_human_review(&self, review: &HumanReview) -> Result<(), PersistenceError>;

    async fn mark_review_resolved(&self, decision_id: Uuid) -> Result<(), PersistenceError>;

    /// Flags an already-persisted trail as requiring human review, for the
    /// case where `request_human_review` is called after the trail finalized
    /// and left the in-memory buffer (mirror of `mark_review_resolved`).
    async fn mark_requires_review(&self, decision_id: Uuid, reason: &str) -> Result<(), PersistenceError>;

    /// Writes `feedback` onto the trail's own `human_feedback` column so a
    /// subsequent `get_trail` reflects it, independent of the `human_reviews`
    /// audit row `save_human_review` already persists.
    async fn attach_human_feedback(&self, decision_id: Uuid, feedback: &HumanFeedback) -> Result<(), PersistenceError>;

    async fn get_trails_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditTrail>, PersistenceError>;
}
