//! Round-trip invariant: `start_decision_audit` -> N ×
//! `record_decision_step` -> `finalize_decision_audit` ->
//! `get_decision_audit` returns a trail whose steps equal the recorded
//! sequence in order, with monotonically non-decreasing timestamps.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use uuid::Uuid;

use compliance_core::domain::models::{AuditEventType, Confidence, ExplanationLevel, RiskAssessment};
use compliance_core::infrastructure::database::SqliteAuditRepository;
use compliance_core::services::audit_trail_manager::AuditTrailManager;
use compliance_core::services::config::AuditTrailConfig;

#[tokio::test]
async fn steps_round_trip_in_order() {
    let pool = common::setup_test_db().await;
    let repo = Arc::new(SqliteAuditRepository::new(pool));
    let manager = AuditTrailManager::new(repo, AuditTrailConfig::default());

    let trigger = Uuid::new_v4();
    let decision_id = manager
        .start_decision_audit("transaction_guardian", "tg-1", trigger, json!({"event": "sample"}))
        .await;

    let step_types = [
        AuditEventType::DataRetrieval,
        AuditEventType::RuleEvaluation,
        AuditEventType::PatternAnalysis,
        AuditEventType::RiskAssessment,
        AuditEventType::ConfidenceCalculation,
    ];
    for (i, step_type) in step_types.iter().enumerate() {
        manager
            .record_decision_step(
                decision_id,
                *step_type,
                format!("step {i}"),
                json!({}),
                json!({"confidence_score": 0.8}),
                HashMap::new(),
                Duration::milliseconds(10),
            )
            .await
            .expect("record step");
    }

    let trail = manager
        .finalize_decision_audit(
            decision_id,
            json!({"type": "APPROVE"}),
            None,
            Some(RiskAssessment::new(0.1, vec![])),
            None,
        )
        .await
        .expect("finalize");

    let fetched = manager.get_decision_audit(decision_id).await.expect("query").expect("trail exists");

    // DECISION_STARTED + the 5 recorded steps + DECISION_FINALIZED.
    assert_eq!(fetched.steps.len(), step_types.len() + 2);
    assert_eq!(fetched.trail_id, trail.trail_id);
    assert!(fetched.completed_at.unwrap() >= fetched.started_at);

    let recorded_types: Vec<_> = fetched.steps.iter().map(|s| s.event_type).collect();
    assert_eq!(recorded_types[0], AuditEventType::DecisionStarted);
    assert_eq!(&recorded_types[1..6], &step_types);
    assert_eq!(*recorded_types.last().unwrap(), AuditEventType::DecisionFinalized);

    for window in fetched.steps.windows(2) {
        assert!(window[1].timestamp >= window[0].timestamp, "step timestamps must be non-decreasing");
    }

    for step in &fetched.steps {
        assert!((-0.5..=0.5).contains(&step.confidence_impact));
    }
}

#[tokio::test]
async fn explanation_levels_build_on_each_other() {
    let pool = common::setup_test_db().await;
    let repo = Arc::new(SqliteAuditRepository::new(pool));
    let manager = AuditTrailManager::new(repo, AuditTrailConfig::default());

    let decision_id = manager
        .start_decision_audit("transaction_guardian", "tg-1", Uuid::new_v4(), json!({}))
        .await;
    manager
        .record_decision_step(
            decision_id,
            AuditEventType::RiskAssessment,
            "composite risk score",
            json!({}),
            json!({"confidence_score": 0.9, "key_findings": ["elevated velocity"]}),
            HashMap::new(),
            Duration::milliseconds(5),
        )
        .await
        .expect("record step");
    manager
        .finalize_decision_audit(decision_id, json!({"type": "MONITOR"}), None, Some(RiskAssessment::new(0.5, vec!["velocity".into()])), None)
        .await
        .expect("finalize");

    let high_level = manager.generate_explanation(decision_id, ExplanationLevel::HighLevel).await.expect("explanation");
    assert!(!high_level.natural_language_summary.is_empty());

    let debug = manager.generate_explanation(decision_id, ExplanationLevel::Debug).await.expect("explanation");
    assert!(!debug.natural_language_summary.is_empty());
    assert!(!debug.key_factors.is_empty() || !debug.risk_indicators.is_empty());
}

#[tokio::test]
async fn decision_with_confidence_below_low_requires_review() {
    let pool = common::setup_test_db().await;
    let repo = Arc::new(SqliteAuditRepository::new(pool));
    let manager = AuditTrailManager::new(repo, AuditTrailConfig::default());

    let decision_id = manager
        .start_decision_audit("transaction_guardian", "tg-1", Uuid::new_v4(), json!({}))
        .await;
    manager
        .record_decision_step(
            decision_id,
            AuditEventType::ConfidenceCalculation,
            "low-confidence aggregation",
            json!({}),
            json!({"confidence_score": 0.05}),
            HashMap::new(),
            Duration::milliseconds(5),
        )
        .await
        .expect("record step");

    let trail = manager
        .finalize_decision_audit(decision_id, json!({"type": "MONITOR"}), None, Some(RiskAssessment::new(0.2, vec![])), None)
        .await
        .expect("finalize");

    assert!(matches!(trail.final_confidence, Some(Confidence::VeryLow) | Some(Confidence::Low)));
    assert!(trail.requires_human_review);
    assert!(trail.human_review_reason.is_some());
}
