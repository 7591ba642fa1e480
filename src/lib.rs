//! Compliance decisioning core: agent orchestration, decision audit trail,
//! and the advanced rule engine that backs fraud/compliance/risk decisions.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod services;
