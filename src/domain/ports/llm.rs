//! `LlmProvider`: the opaque reasoning backend. This crate treats the
//! wire protocol as out of scope — only the request/response envelope
//! named here is part of the contract.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm request timed out")]
    Timeout,
    #[error("llm request failed: {0}")]
    RequestFailed(String),
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns free text or JSON; `Ok(None)` means the provider declined
    /// to answer (not an error) and the caller falls back to
    /// keyword-based extraction. `Err` is a transient failure that counts
    /// against the LLM circuit breaker.
    async fn complex_reasoning_task(
        &self,
        task_name: &str,
        payload: Value,
        reasoning_steps: u32,
    ) -> Result<Option<String>, LlmError>;
}

/// Deterministic canned responses keyed by `task_name`, for tests and for
/// demo wiring that doesn't have network access.
#[derive(Debug, Default)]
pub struct MockLlmProvider {
    pub responses: HashMap<String, String>,
}

impl MockLlmProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_response(mut self, task_name: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.insert(task_name.into(), response.into());
        self
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complex_reasoning_task(
        &self,
        task_name: &str,
        _payload: Value,
        _reasoning_steps: u32,
    ) -> Result<Option<String>, LlmError> {
        Ok(self.responses.get(task_name).cloned())
    }
}

/// Always declines, forcing the keyword-extraction fallback path. Used to
/// exercise "LLM breaker open" / "no LLM configured" scenarios.
#[derive(Debug, Default)]
pub struct NullLlmProvider;

#[async_trait]
impl LlmProvider for NullLlmProvider {
    async fn complex_reasoning_task(
        &self,
        _task_name: &str,
        _payload: Value,
        _reasoning_steps: u32,
    ) -> Result<Option<String>, LlmError> {
        Ok(None)
    }
}
