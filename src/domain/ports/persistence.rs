//! The `PersistenceAdapter` port: a thin, store-agnostic
//! handle over the connection pool. Typed repository ports
//! (`RuleRepository`, `AuditRepository`, ...) are built on top of a
//! concrete implementation of this trait and are what services actually
//! depend on; this trait exists so the pool lifecycle itself (acquire,
//! health, retry-on-reconnect) is not duplicated per repository.

use async_trait::async_trait;

use crate::domain::errors::PersistenceError;

#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Run pending migrations. Idempotent.
    async fn migrate(&self) -> Result<(), PersistenceError>;

    /// Number of connections currently checked out of the pool, for the
    /// metrics registry's persistence-pool gauge.
    fn in_use_connections(&self) -> u32;

    /// Pool size ceiling, for the same gauge.
    fn max_connections(&self) -> u32;

    /// Gracefully close the pool, waiting for in-flight queries to
    /// finish.
    async fn close(&self);
}
