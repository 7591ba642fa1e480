pub mod agent;
pub mod agent_config_repository;
pub mod audit_repository;
pub mod customer_repository;
pub mod llm;
pub mod persistence;
pub mod rule_repository;

pub use agent::{Agent, AgentConfigOverrides};
pub use agent_config_repository::AgentConfigRepository;
pub use audit_repository::AuditRepository;
pub use customer_repository::CustomerRepository;
pub use llm::{LlmError, LlmProvider, MockLlmProvider, NullLlmProvider};
pub use persistence::PersistenceAdapter;
pub use rule_repository::RuleRepository;
