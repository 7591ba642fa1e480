//! `HumanReview`: a recorded intervention on a finalized, flagged decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanReview {
    pub review_id: Uuid,
    pub decision_id: Uuid,
    pub reviewer_id: String,
    pub feedback: String,
    pub approved: bool,
    pub reviewed_at: DateTime<Utc>,
}

impl HumanReview {
    #[must_use]
    pub fn new(
        decision_id: Uuid,
        reviewer_id: impl Into<String>,
        feedback: impl Into<String>,
        approved: bool,
    ) -> Self {
        Self {
            review_id: Uuid::new_v4(),
            decision_id,
            reviewer_id: reviewer_id.into(),
            feedback: feedback.into(),
            approved,
            reviewed_at: Utc::now(),
        }
    }
}
