//! Compliance Core entry point: loads configuration, wires the
//! persistence layer and the three compliance agents into an
//! `Orchestrator`, then runs a demo ingestion loop reading one JSON
//! `Event` per line from a fixture file (or stdin) and printing the
//! resulting decisions. No subcommand suite; the orchestrator and
//! library surface are the real product.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use compliance_core::application::agents::{AuditIntelligenceAgent, RegulatoryAssessorAgent, TransactionGuardianAgent};
use compliance_core::application::Orchestrator;
use compliance_core::domain::ports::{Agent, AgentConfigOverrides, AgentConfigRepository, LlmProvider, MockLlmProvider};
use compliance_core::infrastructure::database::{
    DatabaseConnection, SqliteAgentConfigRepository, SqliteAuditRepository, SqliteCustomerRepository, SqliteRuleRepository,
};
use compliance_core::infrastructure::logging::LoggerImpl;
use compliance_core::services::{AuditTrailManager, CircuitBreakerRegistry, Config, MetricsRegistry, RetryPolicy, RuleEngine};

#[derive(Debug, Parser)]
#[command(name = "compliance-core", about = "Agent orchestration, decision audit trail, and rule engine demo ingestion loop")]
struct Cli {
    /// Path to a TOML configuration file. Falls back to built-in defaults
    /// when omitted.
    #[arg(long, env = "COMPLIANCE_CORE_CONFIG")]
    config: Option<PathBuf>,

    /// Path to a newline-delimited JSON fixture of `Event` records. Reads
    /// from stdin when omitted.
    #[arg(long)]
    events: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path).context("failed to load configuration")?,
        None => Config::default(),
    };

    let _logger = LoggerImpl::init(&config.logging).context("failed to initialize logger")?;

    let db = DatabaseConnection::new(&config.database).await.context("failed to connect to database")?;
    db.migrate().await.context("failed to run database migrations")?;
    let pool = db.pool().clone();

    let agent_config_repo = Arc::new(SqliteAgentConfigRepository::new(pool.clone()));
    let customer_repo = Arc::new(SqliteCustomerRepository::new(pool.clone()));
    let rule_repo = Arc::new(SqliteRuleRepository::new(pool.clone()));
    let audit_repo = Arc::new(SqliteAuditRepository::new(pool.clone()));

    let rule_engine = Arc::new(RuleEngine::new(rule_repo, config.rule_engine.clone()));
    let trail_retry_policy = RetryPolicy::new(
        config.orchestrator.persistence_retry_attempts,
        config.orchestrator.persistence_retry_initial_backoff_ms,
        config.orchestrator.persistence_retry_max_backoff_ms,
    );
    let audit_trail: Arc<AuditTrailManager> = Arc::new(AuditTrailManager::with_retry_policy(
        audit_repo,
        config.audit_trail.clone(),
        trail_retry_policy,
    ));
    let circuit_breakers = Arc::new(CircuitBreakerRegistry::with_defaults());
    let metrics = Arc::new(MetricsRegistry::new());
    let llm: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::new());

    let orchestrator = Orchestrator::new(config.orchestrator.clone(), Arc::clone(&metrics));

    let transaction_guardian = Arc::new(TransactionGuardianAgent::new(
        "transaction-guardian-1",
        config.transaction_guardian.clone(),
        Arc::clone(&customer_repo) as _,
        Arc::clone(&rule_engine),
        Arc::clone(&audit_trail),
        Arc::clone(&circuit_breakers),
    ));
    let regulatory_assessor = Arc::new(RegulatoryAssessorAgent::new(
        "regulatory-assessor-1",
        config.regulatory_assessor.clone(),
        Arc::clone(&llm),
        Arc::clone(&audit_trail),
        Arc::clone(&circuit_breakers),
    ));
    let audit_intelligence = Arc::new(AuditIntelligenceAgent::new(
        "audit-intelligence-1",
        config.audit_intelligence.clone(),
        Arc::clone(&audit_trail),
    ));

    register(&orchestrator, transaction_guardian as Arc<dyn Agent>, &agent_config_repo).await?;
    register(&orchestrator, regulatory_assessor as Arc<dyn Agent>, &agent_config_repo).await?;
    register(&orchestrator, audit_intelligence as Arc<dyn Agent>, &agent_config_repo).await?;

    orchestrator.start().await;
    tracing::info!("compliance-core orchestrator ready");

    run_ingestion_loop(&orchestrator, cli.events.as_deref()).await?;

    orchestrator.stop().await;
    db.close().await;
    Ok(())
}

async fn register(orchestrator: &Orchestrator, agent: Arc<dyn Agent>, agent_config_repo: &Arc<SqliteAgentConfigRepository>) -> Result<()> {
    let overrides = agent_config_repo
        .get_overrides(agent.agent_id())
        .await
        .unwrap_or_else(|_| AgentConfigOverrides::default());
    orchestrator
        .register_agent(agent, overrides)
        .await
        .context("failed to register agent")
}

/// Reads one JSON `Event` per line from `path` (or stdin when `None`),
/// submits each to the orchestrator, and logs the resulting decisions.
/// Malformed lines are logged and skipped rather than aborting the run.
async fn run_ingestion_loop(orchestrator: &Orchestrator, path: Option<&std::path::Path>) -> Result<()> {
    let lines: Box<dyn Iterator<Item = std::io::Result<String>>> = match path {
        Some(path) => {
            let file = std::fs::File::open(path).with_context(|| format!("failed to open event fixture {}", path.display()))?;
            Box::new(std::io::BufReader::new(file).lines())
        }
        None => Box::new(std::io::stdin().lock().lines()),
    };

    for line in lines {
        let line = line.context("failed to read event line")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: compliance_core::domain::models::Event = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, line = %line, "skipping malformed event line");
                continue;
            }
        };

        match orchestrator.submit(event).await {
            Ok(decisions) => {
                for decision in decisions {
                    tracing::info!(
                        agent_id = %decision.agent_id,
                        decision_type = ?decision.decision_type,
                        confidence = ?decision.confidence,
                        risk_score = decision.risk_assessment.risk_score,
                        "decision"
                    );
                }
            }
            Err(err) => tracing::error!(error = %err, "event submission failed"),
        }
    }
    Ok(())
}
