pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{BackpressureError, DomainError, DomainResult, PersistenceError, Timeout, ValidationError};
