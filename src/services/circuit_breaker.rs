//! Circuit breaker pattern for downstream failure detection and recovery
//!. One instance per downstream (LLM, database, external
//! HTTP), composed into a `with_breaker` helper so agents never hand-roll
//! the open/half-open bookkeeping themselves.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::RwLock;

use crate::services::config::CircuitBreakerSettings;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
    pub success_threshold: u32,
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(s: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: s.max_consecutive_failures,
            open_timeout: Duration::seconds(s.cooldown_seconds),
            success_threshold: 1,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::minutes(5),
            success_threshold: 1,
        }
    }
}

/// Which downstream a breaker guards. `Operation` covers ad-hoc named
/// calls (e.g. a specific rule-engine sub-step) that want their own
/// breaker without a dedicated variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitScope {
    Llm,
    Database,
    ExternalHttp(String),
    Operation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<DateTime<Utc>>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
        }
    }

    fn record_failure(&mut self, config: &CircuitBreakerConfig) {
        self.consecutive_failures += 1;
        if self.state == CircuitState::HalfOpen
            || (self.state == CircuitState::Closed && self.consecutive_failures >= config.failure_threshold)
        {
            self.state = CircuitState::Open;
            self.opened_at = Some(Utc::now());
            self.half_open_successes = 0;
        }
    }

    fn record_success(&mut self, config: &CircuitBreakerConfig) {
        self.consecutive_failures = 0;
        if self.state == CircuitState::HalfOpen {
            self.half_open_successes += 1;
            if self.half_open_successes >= config.success_threshold {
                self.state = CircuitState::Closed;
                self.opened_at = None;
                self.half_open_successes = 0;
            }
        }
    }

    /// `is_open`: `consecutive_failures >= N` AND the
    /// cooldown window has not yet elapsed. Once the cooldown elapses the
    /// breaker transitions to half-open and allows one test call.
    fn is_open(&mut self, config: &CircuitBreakerConfig) -> bool {
        if self.state != CircuitState::Open {
            return false;
        }
        let Some(opened_at) = self.opened_at else {
            return false;
        };
        if Utc::now() - opened_at >= config.open_timeout {
            self.state = CircuitState::HalfOpen;
            self.half_open_successes = 0;
            false
        } else {
            true
        }
    }
}

/// Registry of per-scope breakers, guarded by a single `RwLock` the way
/// the rule cache and customer-risk-profile cache are.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<CircuitScope, Breaker>>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    pub async fn state(&self, scope: &CircuitScope) -> CircuitState {
        let mut guard = self.breakers.write().await;
        let breaker = guard.entry(scope.clone()).or_insert_with(Breaker::new);
        if breaker.is_open(&self.config) {
            CircuitState::Open
        } else {
            breaker.state
        }
    }

    pub async fn record_failure(&self, scope: &CircuitScope) {
        let mut guard = self.breakers.write().await;
        guard.entry(scope.clone()).or_insert_with(Breaker::new).record_failure(&self.config);
    }

    pub async fn record_success(&self, scope: &CircuitScope) {
        let mut guard = self.breakers.write().await;
        guard.entry(scope.clone()).or_insert_with(Breaker::new).record_success(&self.config);
    }

    /// Run `op` guarded by the breaker for `scope`. If the breaker is
    /// open, `fallback` is used instead and `op` is never invoked. On
    /// success/failure of `op`, the breaker state is updated accordingly.
    pub async fn with_breaker<T, Fut, FFut>(
        &self,
        scope: CircuitScope,
        op: impl FnOnce() -> Fut,
        fallback: impl FnOnce() -> FFut,
    ) -> (T, bool)
    where
        Fut: Future<Output = Result<T, ()>>,
        FFut: Future<Output = T>,
    {
        if self.state(&scope).await == CircuitState::Open {
            return (fallback().await, true);
        }
        match op().await {
            Ok(value) => {
                self.record_success(&scope).await;
                (value, false)
            }
            Err(()) => {
                self.record_failure(&scope).await;
                (fallback().await, true)
            }
        }
    }

    /// As `with_breaker`, but also races `op` against a per-step
    /// `deadline`. A deadline miss counts as a downstream failure
    /// — the breaker records it and `fallback` is used — and is
    /// distinguished from an ordinary failure in the returned `timed_out`
    /// flag so the caller can record a timeout step rather than a
    /// generic fallback one.
    pub async fn with_breaker_deadline<T, Fut, FFut>(
        &self,
        scope: CircuitScope,
        deadline: std::time::Duration,
        op: impl FnOnce() -> Fut,
        fallback: impl FnOnce() -> FFut,
    ) -> (T, bool, bool)
    where
        Fut: Future<Output = Result<T, ()>>,
        FFut: Future<Output = T>,
    {
        if self.state(&scope).await == CircuitState::Open {
            return (fallback().await, true, false);
        }
        match tokio::time::timeout(deadline, op()).await {
            Ok(Ok(value)) => {
                self.record_success(&scope).await;
                (value, false, false)
            }
            Ok(Err(())) => {
                self.record_failure(&scope).await;
                (fallback().await, true, false)
            }
            Err(_elapsed) => {
                self.record_failure(&scope).await;
                (fallback().await, true, true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            open_timeout: Duration::milliseconds(10),
            success_threshold: 1,
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let registry = CircuitBreakerRegistry::new(fast_config());
        let scope = CircuitScope::Llm;
        for _ in 0..3 {
            registry.record_failure(&scope).await;
        }
        assert_eq!(registry.state(&scope).await, CircuitState::Open);
    }

    #[tokio::test]
    async fn half_opens_after_cooldown_and_closes_on_success() {
        let registry = CircuitBreakerRegistry::new(fast_config());
        let scope = CircuitScope::Database;
        for _ in 0..3 {
            registry.record_failure(&scope).await;
        }
        assert_eq!(registry.state(&scope).await, CircuitState::Open);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(registry.state(&scope).await, CircuitState::HalfOpen);

        registry.record_success(&scope).await;
        assert_eq!(registry.state(&scope).await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn with_breaker_uses_fallback_when_open() {
        let registry = CircuitBreakerRegistry::new(fast_config());
        let scope = CircuitScope::ExternalHttp("profile-service".into());
        for _ in 0..3 {
            registry.record_failure(&scope).await;
        }

        let (value, used_fallback) = registry
            .with_breaker(
                scope,
                || async { Ok::<_, ()>(1) },
                || async { 0 },
            )
            .await;
        assert_eq!(value, 0);
        assert!(used_fallback);
    }

    #[tokio::test]
    async fn with_breaker_deadline_times_out_slow_operations() {
        let registry = CircuitBreakerRegistry::new(fast_config());
        let scope = CircuitScope::Llm;

        let (value, used_fallback, timed_out) = registry
            .with_breaker_deadline(
                scope,
                std::time::Duration::from_millis(5),
                || async {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    Ok::<_, ()>(1)
                },
                || async { 0 },
            )
            .await;
        assert_eq!(value, 0);
        assert!(used_fallback);
        assert!(timed_out);
    }

    #[tokio::test]
    async fn with_breaker_deadline_passes_through_fast_operations() {
        let registry = CircuitBreakerRegistry::new(fast_config());
        let scope = CircuitScope::Database;

        let (value, used_fallback, timed_out) = registry
            .with_breaker_deadline(
                scope,
                std::time::Duration::from_millis(50),
                || async { Ok::<_, ()>(7) },
                || async { 0 },
            )
            .await;
        assert_eq!(value, 7);
        assert!(!used_fallback);
        assert!(!timed_out);
    }
}
