pub mod audit_intelligence;
pub mod regulatory_assessor;
pub mod transaction_guardian;

pub use audit_intelligence::AuditIntelligenceAgent;
pub use regulatory_assessor::RegulatoryAssessorAgent;
pub use transaction_guardian::TransactionGuardianAgent;
