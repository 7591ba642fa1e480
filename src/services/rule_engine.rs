//! Advanced Rule Engine. Holds an in-memory rule cache behind
//! an `RwLock`, and fans condition evaluation out across a parallel
//! worker pool once a batch grows past a configured threshold.

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult, Timeout, ValidationError};
use crate::domain::models::{
    ConditionOperator, EvaluationBatch, EvaluationContext, Rule, RuleCategory, RuleCondition,
    RuleExecutionStats, RuleResult,
};
use crate::domain::ports::RuleRepository;
use crate::services::config::RuleEngineConfig;

#[derive(Debug, Default)]
struct PerformanceStats {
    total_evaluations: AtomicI64,
    total_triggered: AtomicI64,
}

/// Evaluates `Rule`s against inbound entities, maintaining an in-memory
/// cache populated from `RuleRepository` at startup and kept current by
/// the CRUD methods below.
pub struct RuleEngine {
    repository: Arc<dyn RuleRepository>,
    config: RuleEngineConfig,
    cache: RwLock<HashMap<String, Rule>>,
    stats: PerformanceStats,
    per_rule_stats: RwLock<HashMap<String, RuleExecutionStats>>,
}

impl RuleEngine {
    #[must_use]
    pub fn new(repository: Arc<dyn RuleRepository>, config: RuleEngineConfig) -> Self {
        Self {
            repository,
            config,
            cache: RwLock::new(HashMap::new()),
            stats: PerformanceStats::default(),
            per_rule_stats: RwLock::new(HashMap::new()),
        }
    }

    /// Populate the cache from persistent storage. Called once at startup.
    pub async fn load_rules(&self) -> DomainResult<()> {
        let rules = self.repository.load_all().await?;
        let mut cache = self.cache.write().await;
        cache.clear();
        for rule in rules {
            cache.insert(rule.rule_id.clone(), rule);
        }
        debug!(count = cache.len(), "rule cache loaded");
        Ok(())
    }

    pub async fn create_rule(&self, rule: Rule) -> DomainResult<()> {
        rule.validate()?;
        self.repository.upsert_rule(&rule).await?;
        self.cache.write().await.insert(rule.rule_id.clone(), rule);
        Ok(())
    }

    pub async fn update_rule(&self, rule: Rule) -> DomainResult<()> {
        rule.validate()?;
        if !self.cache.read().await.contains_key(&rule.rule_id) {
            return Err(DomainError::RuleNotFound(rule.rule_id));
        }
        self.repository.upsert_rule(&rule).await?;
        self.cache.write().await.insert(rule.rule_id.clone(), rule);
        Ok(())
    }

    pub async fn delete_rule(&self, rule_id: &str) -> DomainResult<()> {
        self.repository.delete_rule(rule_id).await?;
        self.cache.write().await.remove(rule_id);
        Ok(())
    }

    pub async fn set_enabled(&self, rule_id: &str, enabled: bool) -> DomainResult<()> {
        self.repository.set_enabled(rule_id, enabled).await?;
        let mut cache = self.cache.write().await;
        let rule = cache.get_mut(rule_id).ok_or_else(|| DomainError::RuleNotFound(rule_id.to_string()))?;
        rule.enabled = enabled;
        Ok(())
    }

    pub async fn get_rule(&self, rule_id: &str) -> Option<Rule> {
        self.cache.read().await.get(rule_id).cloned()
    }

    /// Read-only query: every cached rule in `category`, enabled or not.
    pub async fn get_rules_by_category(&self, category: RuleCategory) -> Vec<Rule> {
        self.cache
            .read()
            .await
            .values()
            .filter(|r| r.category == category)
            .cloned()
            .collect()
    }

    /// Read-only query: every currently-enabled rule.
    pub async fn get_active_rules(&self) -> Vec<Rule> {
        self.cache.read().await.values().filter(|r| r.enabled).cloned().collect()
    }

    /// Cumulative evaluation/trigger counters and average processing time
    /// for a single rule.
    pub async fn get_rule_execution_stats(&self, rule_id: &str) -> Option<RuleExecutionStats> {
        self.per_rule_stats.read().await.get(rule_id).copied()
    }

    /// Evaluate every enabled rule against `context`, keeping the
    /// highest-scoring triggered rule. Ties break on the lexicographically
    /// smallest `rule_id`.
    #[instrument(skip(self, context), fields(entity_id = %context.entity_id))]
    pub async fn evaluate_entity(&self, context: &EvaluationContext) -> DomainResult<RuleResult> {
        let started = Utc::now();
        let rules: Vec<Rule> = {
            let cache = self.cache.read().await;
            cache.values().filter(|r| r.enabled).cloned().collect()
        };

        let mut best: Option<RuleResult> = None;
        for rule in &rules {
            let rule_started = Utc::now();
            let (score, matched, condition_scores) = evaluate_conditions(rule, context);
            let triggered = score >= rule.threshold_score;
            self.stats.total_evaluations.fetch_add(1, Ordering::Relaxed);
            self.record_rule_stat(&rule.rule_id, triggered, Utc::now() - rule_started).await;
            if !triggered {
                continue;
            }
            self.stats.total_triggered.fetch_add(1, Ordering::Relaxed);

            let candidate = RuleResult {
                evaluation_id: uuid::Uuid::new_v4(),
                rule_id: rule.rule_id.clone(),
                entity_id: context.entity_id.clone(),
                score,
                triggered: true,
                action: rule.action,
                matched_conditions: matched,
                condition_scores,
                processing_time: Utc::now() - started,
                evaluated_at: Utc::now(),
            };

            best = Some(match best {
                None => candidate,
                Some(current) => pick_winner(current, candidate),
            });
        }

        let result = best.unwrap_or_else(|| RuleResult::none_triggered(context.entity_id.clone(), Utc::now() - started));
        if let Err(err) = self.repository.save_result(&result).await {
            warn!(error = %err, "failed to persist rule evaluation result");
        }
        Ok(result)
    }

    /// Evaluate a batch of entities. Runs sequentially below
    /// `parallel_batch_threshold` contexts, otherwise fans out across a
    /// bounded set of concurrent tasks.
    /// Rejects batches over `max_batch_size`, and when
    /// `batch_processing_enabled` is `false` always evaluates
    /// sequentially regardless of `parallel_batch_threshold` (an operator
    /// kill switch for the concurrent path, not a cap on batch size). The
    /// whole batch runs under `execution_timeout_ms`.
    pub async fn evaluate_batch(self: &Arc<Self>, contexts: Vec<EvaluationContext>) -> DomainResult<EvaluationBatch> {
        if contexts.len() > self.config.max_batch_size {
            return Err(DomainError::Validation(ValidationError::OutOfRange {
                field: "batch size".into(),
                value: contexts.len() as f64,
                min: 0.0,
                max: self.config.max_batch_size as f64,
            }));
        }

        let deadline = std::time::Duration::from_millis(self.config.execution_timeout_ms);
        match tokio::time::timeout(deadline, self.evaluate_batch_inner(contexts)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(DomainError::Timeout(Timeout {
                elapsed_ms: self.config.execution_timeout_ms,
                deadline_ms: self.config.execution_timeout_ms,
            })),
        }
    }

    async fn evaluate_batch_inner(self: &Arc<Self>, contexts: Vec<EvaluationContext>) -> DomainResult<EvaluationBatch> {
        let started = Utc::now();
        let batch_id = uuid::Uuid::new_v4();

        let run_sequentially = !self.config.batch_processing_enabled || contexts.len() < self.config.parallel_batch_threshold;
        let results: Vec<RuleResult> = if run_sequentially {
            let mut results = Vec::with_capacity(contexts.len());
            for context in &contexts {
                results.push(self.evaluate_entity(context).await?);
            }
            results
        } else {
            let worker_count = self.config.max_parallel_executions.max(1).min(contexts.len());
            let chunk_size = contexts.len().div_ceil(worker_count);
            let chunk_futures = contexts.chunks(chunk_size).map(|chunk| {
                let engine = Arc::clone(self);
                let chunk = chunk.to_vec();
                async move {
                    let mut chunk_results = Vec::with_capacity(chunk.len());
                    for context in &chunk {
                        chunk_results.push(engine.evaluate_entity(context).await?);
                    }
                    Ok::<_, DomainError>(chunk_results)
                }
            });
            join_all(chunk_futures)
                .await
                .into_iter()
                .collect::<DomainResult<Vec<Vec<_>>>>()?
                .into_iter()
                .flatten()
                .collect()
        };

        let rules_triggered = results.iter().filter(|r| r.triggered).count();
        Ok(EvaluationBatch {
            batch_id,
            rules_evaluated: results.len(),
            rules_triggered,
            total_processing_time: Utc::now() - started,
            results,
        })
    }

    async fn record_rule_stat(&self, rule_id: &str, triggered: bool, elapsed: ChronoDuration) {
        let mut stats = self.per_rule_stats.write().await;
        let entry = stats.entry(rule_id.to_string()).or_default();
        entry.evaluations += 1;
        if triggered {
            entry.triggers += 1;
        }
        entry.total_processing_time = entry.total_processing_time + elapsed;
    }

    #[must_use]
    pub fn performance_stats(&self) -> (i64, i64) {
        (
            self.stats.total_evaluations.load(Ordering::Relaxed),
            self.stats.total_triggered.load(Ordering::Relaxed),
        )
    }

    #[must_use]
    pub fn cache_ttl(&self) -> ChronoDuration {
        ChronoDuration::seconds(i64::try_from(self.config.cache_ttl_seconds).unwrap_or(i64::MAX))
    }
}

/// Higher score wins; on an exact tie the lexicographically smallest
/// `rule_id` wins, so the winner is deterministic regardless of
/// evaluation order.
fn pick_winner(current: RuleResult, candidate: RuleResult) -> RuleResult {
    if candidate.score > current.score {
        candidate
    } else if candidate.score < current.score {
        current
    } else if candidate.rule_id < current.rule_id {
        candidate
    } else {
        current
    }
}

/// Weighted-average condition scoring. A missing field or an
/// unrecognized operator counts as non-matching rather than an error, so
/// one malformed rule cannot abort the whole evaluation.
fn evaluate_conditions(rule: &Rule, context: &EvaluationContext) -> (f64, Vec<String>, HashMap<String, f64>) {
    let mut matched = Vec::new();
    let mut condition_scores = HashMap::new();
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for condition in &rule.conditions {
        let is_match = evaluate_condition(condition, &context.data);
        let contribution = if is_match { condition.weight } else { 0.0 };
        weighted_sum += contribution;
        weight_total += condition.weight;
        condition_scores.insert(condition.field_path.clone(), contribution);
        if is_match {
            matched.push(condition.field_path.clone());
        }
    }

    let score = if weight_total > 0.0 { weighted_sum / weight_total } else { 0.0 };
    (score, matched, condition_scores)
}

fn evaluate_condition(condition: &RuleCondition, data: &Value) -> bool {
    let Some(field_value) = lookup_field_path(data, &condition.field_path) else {
        return false;
    };

    match condition.operator {
        ConditionOperator::Equals => field_value == &condition.value,
        ConditionOperator::NotEquals => field_value != &condition.value,
        ConditionOperator::Contains => match (field_value.as_str(), condition.value.as_str()) {
            (Some(haystack), Some(needle)) => haystack.contains(needle),
            _ => false,
        },
        ConditionOperator::GreaterThan => match (field_value.as_f64(), condition.value.as_f64()) {
            (Some(lhs), Some(rhs)) => lhs > rhs,
            _ => false,
        },
        ConditionOperator::LessThan => match (field_value.as_f64(), condition.value.as_f64()) {
            (Some(lhs), Some(rhs)) => lhs < rhs,
            _ => false,
        },
        ConditionOperator::Regex => match (field_value.as_str(), condition.value.as_str()) {
            (Some(haystack), Some(pattern)) => regex::Regex::new(pattern).is_ok_and(|re| re.is_match(haystack)),
            _ => false,
        },
        ConditionOperator::InArray => condition.value.as_array().is_some_and(|arr| arr.contains(field_value)),
        ConditionOperator::Unknown => false,
    }
}

/// Resolve a dot-notation path (e.g. `"customer.aml_status"`) against a
/// JSON value. Any missing intermediate key yields `None`.
fn lookup_field_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |current, segment| current.get(segment))
}
