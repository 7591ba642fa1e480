//! The narrow `Agent` capability contract every compliance agent
//! implements. Deliberately not a deep class hierarchy — dispatch on
//! `event_type` happens in the orchestrator, not through agent subtyping.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::DomainError;
use crate::domain::models::{Decision, Event, EventType};

/// Agent-specific configuration loaded from the `agent_configurations`
/// table, keyed by `agent_id`. Present values override static defaults.
#[derive(Debug, Clone, Default)]
pub struct AgentConfigOverrides {
    pub values: serde_json::Map<String, Value>,
}

impl AgentConfigOverrides {
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identity used as the key into `agent_configurations` and as
    /// the `agent_id` on every `Decision` this agent emits.
    fn agent_id(&self) -> &str;

    fn agent_type(&self) -> &str;

    /// Event types this agent subscribes to; the orchestrator fans out an
    /// event to every agent whose `event_types()` contains the event's
    /// type.
    fn event_types(&self) -> &[EventType];

    /// Load agent-specific configuration (region, thresholds, alert
    /// targets, feature flags). Called once at registration time.
    async fn initialize(&self, overrides: AgentConfigOverrides) -> Result<(), DomainError>;

    /// The single entry point the orchestrator calls per dispatched event.
    /// Runs the standard pipeline and returns exactly one
    /// `Decision`.
    async fn on_event(&self, event: Event) -> Result<Decision, DomainError>;

    /// Release any resources held by `initialize` (e.g. a background
    /// sweep task for Audit Intelligence).
    async fn shutdown(&self);
}
