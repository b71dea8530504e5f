//! # state
//!
//! Shared application state: every engine component, built once from
//! [`Config`] and handed to Axum handlers and the periodic drivers.
//!
//! `Arc<AppState>` is cloned into every handler via `axum::extract::State`.
//! Components hold their own interior locks; `AppState` itself is immutable.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tracing::info;

use crate::config::Config;
use crate::engine::agent_client::AgentClient;
use crate::engine::executor::Executor;
use crate::engine::monitor::PositionMonitor;
use crate::engine::reverse::ReverseEngine;
use crate::engine::risk::RiskManager;
use crate::engine::scanner::ScanAggregator;
use crate::engine::scheduler::ScanPipeline;
use crate::engine::store::PositionStore;
use crate::events::EventBus;
use crate::gateway::{ExchangeGateway, HttpExchangeGateway};
use crate::insights::LearningClient;
use crate::oracle::{build_oracle, DecisionAdapter};
use crate::sink::{AuditSink, Auditor, FanoutSink, JsonlSink, MemorySink};

/// Entries kept in memory for `GET /api/events`.
const MEMORY_AUDIT_CAPACITY: usize = 2_000;

pub struct AppState {
    pub config:     Config,

    // ── Position lifecycle ────────────────────────────────────────────────────
    pub store:      Arc<PositionStore>,
    pub risk:       Arc<RiskManager>,
    pub executor:   Arc<Executor>,
    pub reverse:    Arc<ReverseEngine>,
    pub monitor:    Arc<PositionMonitor>,

    // ── Scan path ─────────────────────────────────────────────────────────────
    pub pipeline:   Arc<ScanPipeline>,

    // ── Observability ─────────────────────────────────────────────────────────
    pub memory_sink: Arc<MemorySink>,
    pub events:      EventBus,
    pub started_at:  Instant,
}

pub type SharedState = Arc<AppState>;

/// Wire every component from configuration.
pub async fn build_state(config: Config) -> anyhow::Result<SharedState> {
    // One pooled client for agents, oracle, exchange and learning agent.
    let http_client = reqwest::Client::builder()
        .user_agent(concat!("sentinel/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    // ── Audit sinks ───────────────────────────────────────────────────────────
    let memory_sink = Arc::new(MemorySink::new(MEMORY_AUDIT_CAPACITY));
    let mut sinks: Vec<Arc<dyn AuditSink>> = vec![memory_sink.clone() as Arc<dyn AuditSink>];
    if let Some(path) = &config.audit_log_path {
        let jsonl = JsonlSink::open(path)
            .await
            .with_context(|| format!("failed to open audit log {}", path.display()))?;
        sinks.push(Arc::new(jsonl));
    }
    #[cfg(feature = "postgres")]
    {
        if let Some(url) = &config.database_url {
            sinks.push(Arc::new(crate::sink::PgSink::connect(url).await?));
        }
    }
    #[cfg(not(feature = "postgres"))]
    {
        if config.database_url.is_some() {
            tracing::warn!("⚠️ DATABASE_URL set but built without the `postgres` feature; ignoring");
        }
    }
    let auditor = Auditor::new(Arc::new(FanoutSink::new(sinks)));
    let events = EventBus::new();

    // ── Collaborators ─────────────────────────────────────────────────────────
    let gateway: Arc<dyn ExchangeGateway> = Arc::new(HttpExchangeGateway::new(
        http_client.clone(),
        config.exchange_url.clone(),
        config.exchange_timeout,
        config.retry,
    ));
    let learning = Arc::new(LearningClient::new(
        http_client.clone(),
        config.learning_url.clone(),
        config.agent_timeout,
    ));

    // ── Engine ────────────────────────────────────────────────────────────────
    let store = Arc::new(PositionStore::new());
    let risk = Arc::new(RiskManager::new(config.limits, config.max_consecutive_failures));
    let executor = Arc::new(Executor::new(
        Arc::clone(&store),
        Arc::clone(&risk),
        Arc::clone(&gateway),
        auditor.clone(),
        events.clone(),
        learning.clone(),
        config.exchange_timeout,
        config.reentry,
    ));
    let reverse = Arc::new(ReverseEngine::new(
        config.reverse.clone(),
        Arc::clone(&executor),
        auditor.clone(),
        events.clone(),
    ));
    let monitor = Arc::new(PositionMonitor::new(
        Arc::clone(&executor),
        Arc::clone(&reverse),
        Arc::clone(&gateway),
        config.trailing,
        config.hard_stop_loss_pct,
        config.exchange_timeout,
        auditor.clone(),
        events.clone(),
    ));

    let aggregator = ScanAggregator::new(
        Arc::new(AgentClient::new(http_client.clone(), config.retry)),
        config.agents.clone(),
        config.agent_timeout,
        config.scan_concurrency,
    );
    let adapter = DecisionAdapter::new(
        build_oracle(&config.oracle, http_client.clone()),
        config.min_confidence,
        config.oracle.timeout,
    );
    let pipeline = Arc::new(ScanPipeline::new(
        config.symbols.clone(),
        aggregator,
        adapter,
        learning,
        Arc::clone(&executor),
        auditor,
        events.clone(),
    ));

    info!(
        symbols  = config.symbols.len(),
        agents   = config.agents.len(),
        oracle   = %config.oracle.backend,
        exchange = %config.exchange_url,
        "🧩 engine wired"
    );

    Ok(Arc::new(AppState {
        config,
        store,
        risk,
        executor,
        reverse,
        monitor,
        pipeline,
        memory_sink,
        events,
        started_at: Instant::now(),
    }))
}
