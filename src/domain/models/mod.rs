pub mod audit;
pub mod confidence;
pub mod customer;
pub mod decision;
pub mod event;
pub mod review;
pub mod rule;

pub use audit::{
    AuditEventType, AuditStep, AuditTrail, DecisionFlowchart, Explanation, ExplanationLevel,
    FlowchartEdge, FlowchartNode, HumanFeedback, SignedFactor, StepTiming,
};
pub use confidence::Confidence;
pub use customer::{AmlStatus, CustomerProfile, TransactionHistory, TransactionRecord};
pub use decision::{
    ActionPriority, Decision, DecisionType, ReasoningFactor, RecommendedAction, RiskAssessment,
    RiskLevel,
};
pub use event::{Event, EventSource, EventType, Severity};
pub use review::HumanReview;
pub use rule::{
    ConditionOperator, EvaluationBatch, EvaluationContext, Rule, RuleAction, RuleCategory,
    RuleCondition, RuleExecutionStats, RuleResult, RuleSeverity,
};
