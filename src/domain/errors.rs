//! Domain-level errors shared across the orchestrator, agents, rule engine,
//! and audit trail manager.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised validating an inbound `Event`, `Rule`, or decision payload
/// before any work is scheduled. Never retried, never trips a circuit
/// breaker.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} is required")]
    MissingField { field: String },
    #[error("{field} must be in [{min}, {max}], got {value}")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("rule {rule_id} has no conditions")]
    NoConditions { rule_id: String },
    #[error("{0}")]
    Other(String),
}

/// Bounded-queue push rejected because the queue is at `queue_capacity`.
/// The caller must retry or drop the event; the orchestrator never blocks
/// on submission.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("backpressure: queue for agent kind '{agent_kind}' is at capacity ({capacity})")]
pub struct BackpressureError {
    pub agent_kind: String,
    pub capacity: usize,
}

/// A public-facing persistence failure. Distinguishes whether an in-memory
/// side effect (e.g. an active audit trail) was retained for replay.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PersistenceError {
    #[error("connection pool exhausted after waiting {waited_ms}ms")]
    PoolTimeout { waited_ms: u64 },
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("transaction failed: {0}")]
    TransactionFailed(String),
    #[error("migration failed: {0}")]
    MigrationFailed(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(String),
}

/// A step or pipeline exceeded its deadline.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("operation timed out after {elapsed_ms}ms (deadline {deadline_ms}ms)")]
pub struct Timeout {
    pub elapsed_ms: u64,
    pub deadline_ms: u64,
}

/// Top-level domain error. Every public entry point that is not itself one
/// of the four typed errors above funnels through this.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Backpressure(#[from] BackpressureError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Timeout(#[from] Timeout),
    #[error("decision {0} not found")]
    DecisionNotFound(Uuid),
    #[error("rule {0} not found")]
    RuleNotFound(String),
    #[error("agent fault: {0}")]
    AgentFault(String),
}

pub type DomainResult<T> = Result<T, DomainError>;
