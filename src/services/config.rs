//! Configuration surface. A typed tree with per-section
//! `Default` impls, loaded from TOML via `figment`.

use figment::providers::{Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    ReadError(#[from] figment::Error),
    #[error("validation failed for {field}: {reason}")]
    ValidationError { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub transaction_guardian: TransactionGuardianConfig,
    pub audit_intelligence: AuditIntelligenceConfig,
    pub regulatory_assessor: RegulatoryAssessorConfig,
    pub audit_trail: AuditTrailConfig,
    pub rule_engine: RuleEngineConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            transaction_guardian: TransactionGuardianConfig::default(),
            audit_intelligence: AuditIntelligenceConfig::default(),
            regulatory_assessor: RegulatoryAssessorConfig::default(),
            audit_trail: AuditTrailConfig::default(),
            rule_engine: RuleEngineConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any field the file omits.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(ConfigError::ReadError)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.queue_capacity == 0 {
            return Err(ConfigError::ValidationError {
                field: "orchestrator.queue_capacity".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.rule_engine.default_threshold) {
            return Err(ConfigError::ValidationError {
                field: "rule_engine.default_threshold".into(),
                reason: "must be in [0, 1]".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub queue_capacity: usize,
    pub workers_per_agent: usize,
    /// Full-pipeline deadline (default 60s): wraps one agent's
    /// entire `on_event` call. Per-step deadlines are narrower and live
    /// on each agent's own config (`TransactionGuardianConfig::step_timeout_ms`,
    /// `RegulatoryAssessorConfig::llm_step_timeout_ms`).
    pub pipeline_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub persistence_retry_attempts: u32,
    pub persistence_retry_initial_backoff_ms: u64,
    pub persistence_retry_max_backoff_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            workers_per_agent: 4,
            pipeline_timeout_ms: 60_000,
            shutdown_grace_ms: 5_000,
            persistence_retry_attempts: 3,
            persistence_retry_initial_backoff_ms: 50,
            persistence_retry_max_backoff_ms: 400,
        }
    }
}

/// Common risk-score-composition weights, shared across
/// agents but overridable per agent type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub severity_low: f64,
    pub severity_medium: f64,
    pub severity_high: f64,
    pub severity_critical: f64,
    pub w_hist: f64,
    pub w_ctx: f64,
    pub unusual_hours_risk: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            severity_low: 0.05,
            severity_medium: 0.15,
            severity_high: 0.35,
            severity_critical: 0.6,
            w_hist: 0.4,
            w_ctx: 0.3,
            unusual_hours_risk: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionGuardianConfig {
    pub risk_weights: RiskWeights,
    pub fraud_threshold: f64,
    pub high_risk_threshold: f64,
    pub velocity_threshold: f64,
    pub risk_amount_10k: f64,
    pub risk_amount_50k: f64,
    pub risk_amount_100k: f64,
    pub geographic_anomaly_risk: f64,
    pub sanctioned_country_risk: f64,
    pub velocity_critical_threshold: f64,
    pub velocity_high_threshold: f64,
    pub velocity_moderate_threshold: f64,
    pub velocity_window_minutes: i64,
    pub velocity_events_5: u32,
    pub velocity_events_10: u32,
    pub velocity_events_20: u32,
    pub risk_profile_current_weight: f64,
    pub risk_profile_new_weight: f64,
    pub sanctioned_countries: Vec<String>,
    pub queue_capacity: usize,
    /// Per-step deadline for the data-retrieval step's circuit-breaker
    /// call (default 5s).
    pub step_timeout_ms: u64,
}

impl Default for TransactionGuardianConfig {
    fn default() -> Self {
        Self {
            risk_weights: RiskWeights::default(),
            fraud_threshold: 0.8,
            high_risk_threshold: 0.6,
            velocity_threshold: 0.4,
            risk_amount_10k: 0.1,
            risk_amount_50k: 0.2,
            risk_amount_100k: 0.35,
            geographic_anomaly_risk: 0.25,
            sanctioned_country_risk: 0.4,
            velocity_critical_threshold: 20.0,
            velocity_high_threshold: 10.0,
            velocity_moderate_threshold: 5.0,
            velocity_window_minutes: 60,
            velocity_events_5: 5,
            velocity_events_10: 10,
            velocity_events_20: 20,
            risk_profile_current_weight: 0.7,
            risk_profile_new_weight: 0.3,
            sanctioned_countries: vec!["IR".into(), "KP".into(), "SY".into(), "CU".into()],
            queue_capacity: 512,
            step_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditIntelligenceConfig {
    pub risk_weights: RiskWeights,
    pub sweep_interval_minutes: i64,
    pub temporal_rate_per_hour: f64,
    pub confidence_stddev_threshold: f64,
    pub low_confidence_mean_threshold: f64,
    pub correlation_threshold: f64,
    pub min_sample_size: usize,
    pub similarity_top_n: usize,
    pub similarity_density_threshold: f64,
}

impl Default for AuditIntelligenceConfig {
    fn default() -> Self {
        Self {
            risk_weights: RiskWeights::default(),
            sweep_interval_minutes: 15,
            temporal_rate_per_hour: 10.0,
            confidence_stddev_threshold: 2.0,
            low_confidence_mean_threshold: 1.0,
            correlation_threshold: 0.7,
            min_sample_size: 20,
            similarity_top_n: 10,
            similarity_density_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegulatoryAssessorConfig {
    pub risk_weights: RiskWeights,
    pub high_impact_threshold: f64,
    pub llm_step_confidence_floor: f64,
    pub fallback_impact_keywords_high: Vec<String>,
    pub fallback_impact_keywords_medium: Vec<String>,
    /// Deadline for the `LLM_INFERENCE` circuit-breaker call (default
    /// 30s).
    pub llm_step_timeout_ms: u64,
}

impl Default for RegulatoryAssessorConfig {
    fn default() -> Self {
        Self {
            risk_weights: RiskWeights::default(),
            high_impact_threshold: 0.7,
            llm_step_confidence_floor: 0.4,
            fallback_impact_keywords_high: vec![
                "prohibit".into(),
                "ban".into(),
                "mandatory".into(),
                "criminal".into(),
                "revoke".into(),
            ],
            fallback_impact_keywords_medium: vec![
                "require".into(),
                "disclosure".into(),
                "report".into(),
                "threshold".into(),
            ],
            llm_step_timeout_ms: 30_000,
        }
    }
}

/// Cross-cutting `AuditTrailManager` settings: the human-review triggers
/// that aren't agent-specific.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditTrailConfig {
    pub financial_impact_review_threshold: f64,
    pub low_confidence_review_threshold: crate::domain::models::Confidence,
}

impl Default for AuditTrailConfig {
    fn default() -> Self {
        Self {
            financial_impact_review_threshold: 1_000_000.0,
            low_confidence_review_threshold: crate::domain::models::Confidence::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleEngineConfig {
    pub execution_timeout_ms: u64,
    pub max_parallel_executions: usize,
    pub cache_ttl_seconds: u64,
    pub batch_processing_enabled: bool,
    pub max_batch_size: usize,
    pub parallel_batch_threshold: usize,
    pub default_threshold: f64,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            execution_timeout_ms: 5_000,
            max_parallel_executions: 10,
            cache_ttl_seconds: 300,
            batch_processing_enabled: true,
            max_batch_size: 100,
            parallel_batch_threshold: 10,
            default_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub max_consecutive_failures: u32,
    pub cooldown_seconds: i64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            cooldown_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".into(),
            min_connections: 2,
            max_connections: 10,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: 30,
            max_lifetime_seconds: 1800,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_queue_capacity() {
        let mut cfg = Config::default();
        cfg.orchestrator.queue_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let mut cfg = Config::default();
        cfg.rule_engine.default_threshold = 2.0;
        assert!(cfg.validate().is_err());
    }
}
