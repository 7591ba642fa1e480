//! Routes incoming events to the agent pool responsible for their event
//! type: one bounded queue and worker pool per registered agent kind,
//! fan-out dispatch, backpressure, and graceful shutdown draining.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{BackpressureError, DomainError, DomainResult};
use crate::domain::models::{
    ActionPriority, Confidence, Decision, DecisionType, Event, ReasoningFactor, RecommendedAction,
    RiskAssessment,
};
use crate::domain::ports::{Agent, AgentConfigOverrides};
use crate::services::config::OrchestratorConfig;
use crate::services::MetricsRegistry;

type DecisionReply = oneshot::Sender<Decision>;

struct RegisteredAgent {
    agent: Arc<dyn Agent>,
    sender: mpsc::Sender<(Event, DecisionReply)>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    queue_capacity: usize,
}

/// Read-only snapshot returned by `status()`.
#[derive(Debug, Clone)]
pub struct OrchestratorStatus {
    pub active_agents: usize,
    pub in_flight_events: u64,
    pub queue_depth: HashMap<String, usize>,
}

/// Owns one bounded queue + worker pool per registered agent kind, a
/// shared `MetricsRegistry`, and in-flight bookkeeping. Does not own
/// persistence directly — each agent threads its own
/// `AuditTrailManager`/repository handles rather than reaching through
/// the orchestrator for them.
pub struct Orchestrator {
    config: OrchestratorConfig,
    metrics: Arc<MetricsRegistry>,
    agents: RwLock<HashMap<String, Arc<RegisteredAgent>>>,
    in_flight: AtomicU64,
    running: AtomicBool,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: OrchestratorConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            config,
            metrics,
            agents: RwLock::new(HashMap::new()),
            in_flight: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Register an agent, initializing it with `overrides` and spawning
    /// `workers_per_agent` tasks that drain its bounded queue. Later
    /// registrations for the same `agent_type` replace the previous one.
    pub async fn register_agent(&self, agent: Arc<dyn Agent>, overrides: AgentConfigOverrides) -> DomainResult<()> {
        agent.initialize(overrides).await?;
        let kind = agent.agent_type().to_string();
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.config.workers_per_agent);
        let pipeline_timeout_ms = self.config.pipeline_timeout_ms;
        for _ in 0..self.config.workers_per_agent {
            let rx = Arc::clone(&rx);
            let agent = Arc::clone(&agent);
            let metrics = Arc::clone(&self.metrics);
            let kind_for_task = kind.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some((event, reply)) = next else { break };
                    let event_id = event.event_id;
                    let pipeline_timeout = std::time::Duration::from_millis(pipeline_timeout_ms);
                    let decision = match tokio::time::timeout(pipeline_timeout, agent.on_event(event)).await {
                        Ok(Ok(decision)) => decision,
                        Ok(Err(err)) => {
                            error!(agent_type = %kind_for_task, event_id = %event_id, error = %err, "agent fault");
                            agent_fault_decision(event_id, &kind_for_task, &err)
                        }
                        Err(_elapsed) => {
                            warn!(
                                agent_type = %kind_for_task,
                                event_id = %event_id,
                                timeout_ms = pipeline_timeout_ms,
                                "pipeline deadline exceeded"
                            );
                            pipeline_timeout_decision(event_id, &kind_for_task, pipeline_timeout_ms)
                        }
                    };
                    metrics.increment_counter(&format!("decisions_total.{kind_for_task}"), 1.0);
                    let _ = reply.send(decision);
                }
            }));
        }

        let registered = Arc::new(RegisteredAgent {
            agent,
            sender: tx,
            workers: Mutex::new(workers),
            queue_capacity: self.config.queue_capacity,
        });
        self.agents.write().await.insert(kind, registered);
        Ok(())
    }

    /// Enqueue `event` to every registered agent subscribed to its
    /// `event_type`, concurrently; resolves once every fan-out branch has
    /// produced a `Decision`. A queue at capacity for any
    /// subscribed agent fails the whole submission with
    /// `BackpressureError` rather than partially enqueuing.
    pub async fn submit(&self, event: Event) -> DomainResult<Vec<Decision>> {
        event.validate()?;
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let result = self.dispatch(event).await;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        result
    }

    async fn dispatch(&self, event: Event) -> DomainResult<Vec<Decision>> {
        let agents = self.agents.read().await;
        let mut receivers = Vec::new();
        for registered in agents.values() {
            if !registered.agent.event_types().contains(&event.event_type) {
                continue;
            }
            let (reply_tx, reply_rx) = oneshot::channel();
            registered.sender.try_send((event.clone(), reply_tx)).map_err(|_| {
                DomainError::Backpressure(BackpressureError {
                    agent_kind: registered.agent.agent_type().to_string(),
                    capacity: registered.queue_capacity,
                })
            })?;
            receivers.push(reply_rx);
        }
        drop(agents);

        Ok(join_all(receivers).await.into_iter().filter_map(Result::ok).collect())
    }

    pub async fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!(agents = self.agents.read().await.len(), "orchestrator started");
        }
    }

    /// Idempotent shutdown: releases every registered agent, drops its
    /// sender so the worker loop exits, and awaits the worker tasks up to
    /// `shutdown_grace_ms`.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<_> = self.agents.write().await.drain().map(|(_, v)| v).collect();
        let grace = std::time::Duration::from_millis(self.config.shutdown_grace_ms);

        for registered in drained {
            registered.agent.shutdown().await;
            let Some(registered) = Arc::into_inner(registered) else {
                warn!("agent still referenced elsewhere at shutdown; worker pool left running");
                continue;
            };
            drop(registered.sender);
            for worker in registered.workers.into_inner() {
                if tokio::time::timeout(grace, worker).await.is_err() {
                    warn!("worker did not shut down within the grace period");
                }
            }
        }
        info!("orchestrator stopped");
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let agents = self.agents.read().await;
        let queue_depth = agents
            .iter()
            .map(|(kind, registered)| (kind.clone(), registered.queue_capacity - registered.sender.capacity()))
            .collect();
        OrchestratorStatus {
            active_agents: agents.len(),
            in_flight_events: self.in_flight.load(Ordering::Relaxed),
            queue_depth,
        }
    }
}

/// Full-pipeline timeout: aborts a still-running agent pipeline and
/// stands in a lowest-confidence `MONITOR` decision in its place. The
/// agent's own in-progress trail (if any) is abandoned along with the
/// cancelled future — the orchestrator has no handle into an
/// individual agent's `AuditTrailManager` across the `Agent` trait
/// boundary — so this decision is the orchestrator's own record of the
/// timeout, reported at the lowest confidence bucket.
fn pipeline_timeout_decision(event_id: Uuid, agent_kind: &str, timeout_ms: u64) -> Decision {
    Decision::new(
        event_id,
        format!("{agent_kind}-orchestrator"),
        DecisionType::Monitor,
        Confidence::VeryLow,
        vec![ReasoningFactor {
            factor: "pipeline_timeout".into(),
            evidence: format!("{agent_kind} did not complete within {timeout_ms}ms"),
            weight: 1.0,
            source: "orchestrator".into(),
        }],
        vec![RecommendedAction::new(
            "escalate_to_operator",
            format!("{agent_kind} exceeded its pipeline deadline"),
            ActionPriority::Urgent,
        )],
        RiskAssessment::new(1.0, vec!["pipeline_timeout".into()]),
    )
}

fn agent_fault_decision(event_id: Uuid, agent_kind: &str, err: &DomainError) -> Decision {
    Decision::new(
        event_id,
        format!("{agent_kind}-orchestrator"),
        DecisionType::Monitor,
        Confidence::VeryLow,
        vec![ReasoningFactor {
            factor: "agent_fault".into(),
            evidence: err.to_string(),
            weight: 1.0,
            source: "orchestrator".into(),
        }],
        vec![RecommendedAction::new(
            "escalate_to_operator",
            format!("{agent_kind} agent raised an unhandled fault"),
            ActionPriority::Urgent,
        )],
        RiskAssessment::new(1.0, vec!["agent_fault".into()]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use crate::domain::models::{EventSource, EventType, Severity};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::AtomicUsize;

    struct EchoAgent {
        id: String,
        event_types: Vec<EventType>,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Agent for EchoAgent {
        fn agent_id(&self) -> &str {
            &self.id
        }
        fn agent_type(&self) -> &str {
            &self.id
        }
        fn event_types(&self) -> &[EventType] {
            &self.event_types
        }
        async fn initialize(&self, _overrides: AgentConfigOverrides) -> Result<(), DomainError> {
            Ok(())
        }
        async fn on_event(&self, event: Event) -> Result<Decision, DomainError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(DomainError::AgentFault("boom".into()));
            }
            Ok(Decision::new(
                event.event_id,
                self.id.clone(),
                DecisionType::Approve,
                Confidence::High,
                vec![],
                vec![],
                RiskAssessment::new(0.1, vec![]),
            ))
        }
        async fn shutdown(&self) {}
    }

    fn sample_event() -> Event {
        Event {
            event_id: Uuid::new_v4(),
            event_type: EventType::Transaction,
            severity: Severity::Low,
            source: EventSource {
                system: "core-banking".into(),
                kind: "payment".into(),
                origin: "api".into(),
            },
            description: "domestic transfer".into(),
            metadata: StdHashMap::new(),
            occurred_at: chrono::Utc::now(),
        }
    }

    fn config(queue_capacity: usize) -> OrchestratorConfig {
        OrchestratorConfig {
            queue_capacity,
            workers_per_agent: 1,
            ..OrchestratorConfig::default()
        }
    }

    #[tokio::test]
    async fn submit_fans_out_to_subscribed_agents_only() {
        let orchestrator = Orchestrator::new(config(8), Arc::new(MetricsRegistry::new()));
        orchestrator
            .register_agent(
                Arc::new(EchoAgent {
                    id: "guardian".into(),
                    event_types: vec![EventType::Transaction],
                    calls: AtomicUsize::new(0),
                    fail: false,
                }),
                AgentConfigOverrides::default(),
            )
            .await
            .unwrap();
        orchestrator
            .register_agent(
                Arc::new(EchoAgent {
                    id: "regulatory".into(),
                    event_types: vec![EventType::RegulatoryChange],
                    calls: AtomicUsize::new(0),
                    fail: false,
                }),
                AgentConfigOverrides::default(),
            )
            .await
            .unwrap();

        let decisions = orchestrator.submit(sample_event()).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].agent_id, "guardian");
    }

    #[tokio::test]
    async fn agent_fault_surfaces_as_monitor_decision() {
        let orchestrator = Orchestrator::new(config(8), Arc::new(MetricsRegistry::new()));
        orchestrator
            .register_agent(
                Arc::new(EchoAgent {
                    id: "guardian".into(),
                    event_types: vec![EventType::Transaction],
                    calls: AtomicUsize::new(0),
                    fail: true,
                }),
                AgentConfigOverrides::default(),
            )
            .await
            .unwrap();

        let decisions = orchestrator.submit(sample_event()).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].decision_type, DecisionType::Monitor);
        assert_eq!(decisions[0].confidence, Confidence::VeryLow);
    }

    struct SlowAgent {
        delay: std::time::Duration,
    }

    #[async_trait]
    impl Agent for SlowAgent {
        fn agent_id(&self) -> &str {
            "slow"
        }
        fn agent_type(&self) -> &str {
            "slow"
        }
        fn event_types(&self) -> &[EventType] {
            &[EventType::Transaction]
        }
        async fn initialize(&self, _overrides: AgentConfigOverrides) -> Result<(), DomainError> {
            Ok(())
        }
        async fn on_event(&self, event: Event) -> Result<Decision, DomainError> {
            tokio::time::sleep(self.delay).await;
            Ok(Decision::new(
                event.event_id,
                "slow",
                DecisionType::Approve,
                Confidence::High,
                vec![],
                vec![],
                RiskAssessment::new(0.1, vec![]),
            ))
        }
        async fn shutdown(&self) {}
    }

    #[tokio::test]
    async fn pipeline_deadline_surfaces_as_monitor_decision() {
        let mut cfg = config(8);
        cfg.pipeline_timeout_ms = 5;
        let orchestrator = Orchestrator::new(cfg, Arc::new(MetricsRegistry::new()));
        orchestrator
            .register_agent(
                Arc::new(SlowAgent {
                    delay: std::time::Duration::from_millis(50),
                }),
                AgentConfigOverrides::default(),
            )
            .await
            .unwrap();

        let decisions = orchestrator.submit(sample_event()).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].decision_type, DecisionType::Monitor);
        assert_eq!(decisions[0].confidence, Confidence::VeryLow);
        assert!(decisions[0].reasoning.iter().any(|f| f.factor == "pipeline_timeout"));
    }

    #[tokio::test]
    async fn backpressure_rejects_submission_at_capacity() {
        // Zero workers so the queue never drains, forcing the second submit to hit capacity.
        let mut cfg = config(1);
        cfg.workers_per_agent = 0;
        let orchestrator = Orchestrator::new(cfg, Arc::new(MetricsRegistry::new()));
        orchestrator
            .register_agent(
                Arc::new(EchoAgent {
                    id: "guardian".into(),
                    event_types: vec![EventType::Transaction],
                    calls: AtomicUsize::new(0),
                    fail: false,
                }),
                AgentConfigOverrides::default(),
            )
            .await
            .unwrap();

        let status = orchestrator.status().await;
        assert_eq!(status.active_agents, 1);

        // First submit fills the single queue slot (never drained, zero workers).
        let _ = orchestrator.dispatch(sample_event()).await;
        let second = orchestrator.dispatch(sample_event()).await;
        assert!(matches!(second, Err(DomainError::Backpressure(_))));
    }
}
