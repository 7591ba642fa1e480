pub mod agent_config_repo;
pub mod audit_repo;
pub mod connection;
pub mod customer_repo;
pub mod rule_repo;

pub use agent_config_repo::SqliteAgentConfigRepository;
pub use audit_repo::SqliteAuditRepository;
pub use connection::DatabaseConnection;
pub use customer_repo::SqliteCustomerRepository;
pub use rule_repo::SqliteRuleRepository;
