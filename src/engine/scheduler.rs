//! # engine::scheduler — scan pipeline and periodic drivers
//!
//! ```text
//!  scan driver (SCAN_INTERVAL)     ─▶ ScanPipeline::run_cycle
//!      candidates ─▶ ScanAggregator ─▶ insights ─▶ DecisionAdapter ─▶ Executor::open_from_intent
//!
//!  monitor driver (MONITOR_INTERVAL) ─▶ PositionMonitor::tick
//!  equity driver  (EQUITY_INTERVAL)  ─▶ PositionMonitor::equity_snapshot
//! ```
//! Each driver awaits its own work before the next tick, so cycles of the
//! same driver never overlap. Missed ticks are skipped, not bunched.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::engine::executor::Executor;
use crate::engine::monitor::PositionMonitor;
use crate::engine::scanner::{candidates_from_store, ScanAggregator};
use crate::events::{EngineEvent, EventBus};
use crate::insights::InsightSource;
use crate::models::{AuditRecord, Symbol};
use crate::oracle::DecisionAdapter;
use crate::sink::Auditor;

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub cycle_id:   Uuid,
    pub candidates: usize,
    pub eligible:   usize,
    pub actionable: usize,
    pub opened:     usize,
    /// Why the cycle stopped early, if it did.
    pub skipped:    Option<String>,
}

impl ScanReport {
    fn new(cycle_id: Uuid) -> Self {
        Self { cycle_id, candidates: 0, eligible: 0, actionable: 0, opened: 0, skipped: None }
    }

    fn skip(mut self, reason: impl Into<String>) -> Self {
        self.skipped = Some(reason.into());
        self
    }
}

pub struct ScanPipeline {
    symbols:    Vec<Symbol>,
    aggregator: ScanAggregator,
    adapter:    DecisionAdapter,
    insights:   Arc<dyn InsightSource>,
    executor:   Arc<Executor>,
    auditor:    Auditor,
    events:     EventBus,
    cycles:     AtomicU64,
}

impl ScanPipeline {
    pub fn new(
        symbols: Vec<Symbol>,
        aggregator: ScanAggregator,
        adapter: DecisionAdapter,
        insights: Arc<dyn InsightSource>,
        executor: Arc<Executor>,
        auditor: Auditor,
        events: EventBus,
    ) -> Self {
        Self { symbols, aggregator, adapter, insights, executor, auditor, events, cycles: AtomicU64::new(0) }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub async fn run_cycle(&self) -> ScanReport {
        let cycle_id = Uuid::new_v4();
        self.cycles.fetch_add(1, Ordering::Relaxed);
        let report = ScanReport::new(cycle_id);

        let store = self.executor.store();
        let risk = self.executor.risk();
        let limits = risk.limits().await;

        if let Some(reason) = risk.halted().await {
            info!(%cycle_id, reason = %reason, "⏸️ [SCAN] trading halted, cycle skipped");
            return report.skip(format!("halted: {reason}"));
        }

        let free_slots = limits.max_positions.saturating_sub(store.count().await);
        if free_slots == 0 {
            debug!(%cycle_id, "[SCAN] no free position slots");
            return report.skip("no free position slots");
        }

        // ── [1] Candidates ───────────────────────────────────────────────────
        let candidates = candidates_from_store(store, &self.symbols, free_slots).await;
        let mut report = ScanReport { candidates: candidates.len(), ..report };
        if candidates.is_empty() {
            return report.skip("no candidate symbols");
        }
        info!(%cycle_id, candidates = candidates.len(), free_slots, "🔭 [SCAN] cycle started");

        // ── [2] Fan-out / fan-in ─────────────────────────────────────────────
        let bundles = self.aggregator.scan(&candidates).await;
        report.eligible = bundles.len();
        if bundles.is_empty() {
            self.publish_completed(&report);
            return report.skip("no eligible bundles");
        }

        // ── [3] Oracle ───────────────────────────────────────────────────────
        let bundle_symbols: Vec<Symbol> = bundles.iter().map(|b| b.symbol.clone()).collect();
        let insights = self.insights.insights(&bundle_symbols).await;
        let open_positions: Vec<Symbol> = store.snapshot().await.into_iter().map(|p| p.symbol).collect();
        let intents = self.adapter.decide(cycle_id, bundles, insights, open_positions).await;

        for intent in &intents {
            self.auditor.record(AuditRecord::Intent(intent.clone())).await;
        }
        self.events.publish(&EngineEvent::IntentsDecided { cycle_id, intents: intents.clone() });

        // ── [4] Execute actionable intents ───────────────────────────────────
        let mut opens = JoinSet::new();
        for intent in intents.into_iter().filter(|i| i.is_actionable()) {
            report.actionable += 1;
            let executor = Arc::clone(&self.executor);
            opens.spawn(async move {
                match executor.open_from_intent(&intent, &limits).await {
                    Ok(_) => true,
                    Err(e) => {
                        debug!(symbol = %intent.symbol, error = %e, "[SCAN] intent not executed");
                        false
                    }
                }
            });
        }
        while let Some(joined) = opens.join_next().await {
            match joined {
                Ok(true) => report.opened += 1,
                Ok(false) => {}
                Err(e) => error!(error = %e, "💥 [SCAN] open task panicked"),
            }
        }

        info!(
            %cycle_id,
            eligible   = report.eligible,
            actionable = report.actionable,
            opened     = report.opened,
            "✅ [SCAN] cycle complete"
        );
        self.publish_completed(&report);
        report
    }

    fn publish_completed(&self, report: &ScanReport) {
        self.events.publish(&EngineEvent::ScanCompleted {
            cycle_id:   report.cycle_id,
            candidates: report.candidates,
            eligible:   report.eligible,
            opened:     report.opened,
        });
    }
}

// ─── Drivers ──────────────────────────────────────────────────────────────────

fn ticker(every: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Run one driver iteration on its own task. A panic inside it is logged and
/// the driver keeps ticking.
async fn isolated<F>(driver: &'static str, work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Err(e) = tokio::spawn(work).await {
        error!(driver, error = %e, "💥 driver iteration panicked, continuing");
    }
}

pub fn spawn_scan_driver(pipeline: Arc<ScanPipeline>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(every = ?every, "⏱️ scan driver started");
        let mut interval = ticker(every);
        loop {
            interval.tick().await;
            let pipeline = Arc::clone(&pipeline);
            isolated("scan", async move {
                pipeline.run_cycle().await;
            })
            .await;
        }
    })
}

pub fn spawn_monitor_driver(monitor: Arc<PositionMonitor>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(every = ?every, "⏱️ monitor driver started");
        let mut interval = ticker(every);
        loop {
            interval.tick().await;
            let monitor = Arc::clone(&monitor);
            isolated("monitor", async move {
                monitor.tick().await;
            })
            .await;
        }
    })
}

pub fn spawn_equity_driver(monitor: Arc<PositionMonitor>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(every);
        loop {
            interval.tick().await;
            let monitor = Arc::clone(&monitor);
            isolated("equity", async move {
                monitor.equity_snapshot().await;
            })
            .await;
        }
    })
}
