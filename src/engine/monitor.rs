//! # engine::monitor — Position Monitor
//!
//! One tick:
//! ```text
//!  get_open_positions ─▶ reconcile store
//!        │
//!        ▼  (one task per open symbol, try-lock or skip)
//!  mark price ─▶ PnL ─▶ hard stop? ─▶ reverse? ─▶ trailing stop?
//! ```
//! A symbol whose lock is held elsewhere (scan open, manual close, a reverse
//! still running) is skipped for this tick rather than queued.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::engine::executor::Executor;
use crate::engine::reverse::ReverseEngine;
use crate::engine::risk::RiskLimits;
use crate::engine::trailing::{self, TrailingAction, TrailingConfig};
use crate::events::{EngineEvent, EventBus};
use crate::gateway::{with_timeout, ExchangeGateway};
use crate::models::{AuditRecord, ClosedPosition, CloseReason, EquitySnapshot, Symbol};
use crate::sink::Auditor;

#[derive(Debug, Default, Clone, Serialize)]
pub struct MonitorReport {
    pub open_positions: usize,
    pub evaluated:      usize,
    pub skipped:        usize,
    pub closed:         usize,
    pub reversed:       usize,
    pub adopted:        usize,
    pub dropped:        usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Held,
    Skipped,
    Closed,
    Reversed,
}

pub struct PositionMonitor {
    executor:           Arc<Executor>,
    reverse:            Arc<ReverseEngine>,
    gateway:            Arc<dyn ExchangeGateway>,
    trailing:           TrailingConfig,
    hard_stop_loss_pct: f64,
    exchange_timeout:   Duration,
    auditor:            Auditor,
    events:             EventBus,
}

impl PositionMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: Arc<Executor>,
        reverse: Arc<ReverseEngine>,
        gateway: Arc<dyn ExchangeGateway>,
        trailing: TrailingConfig,
        hard_stop_loss_pct: f64,
        exchange_timeout: Duration,
        auditor: Auditor,
        events: EventBus,
    ) -> Self {
        Self { executor, reverse, gateway, trailing, hard_stop_loss_pct, exchange_timeout, auditor, events }
    }

    pub async fn tick(self: &Arc<Self>) -> MonitorReport {
        let mut report = MonitorReport::default();
        let store = self.executor.store();
        let limits = self.executor.risk().limits().await;

        // ── [1] Reconcile with exchange truth ────────────────────────────────
        let observed_at = Utc::now();
        match with_timeout("get_open_positions", self.exchange_timeout, self.gateway.get_open_positions()).await {
            Ok(live) => {
                let reconciled = store.reconcile(&live, observed_at).await;
                report.adopted = reconciled.adopted.len();
                report.dropped = reconciled.dropped.len();
                for adopted in reconciled.adopted {
                    self.auditor.record(AuditRecord::Opened(adopted.clone())).await;
                    self.events.publish(&EngineEvent::PositionOpened { position: Box::new(adopted) });
                }
                for dropped in reconciled.dropped {
                    let closed = ClosedPosition::from_position(&dropped, dropped.mark_price, CloseReason::ExchangeClosed);
                    self.executor.record_closed(closed).await;
                }
            }
            Err(e) => warn!(error = %e, "⚠️ [MONITOR] open positions unavailable, reconciliation skipped"),
        }

        // ── [2] Evaluate every open symbol concurrently ──────────────────────
        let symbols: Vec<Symbol> = store.snapshot().await.into_iter().map(|p| p.symbol).collect();
        report.open_positions = symbols.len();

        let mut tasks = JoinSet::new();
        for symbol in symbols {
            let monitor = Arc::clone(self);
            tasks.spawn(async move { monitor.evaluate(symbol, limits).await });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Outcome::Skipped) => report.skipped += 1,
                Ok(outcome) => {
                    report.evaluated += 1;
                    match outcome {
                        Outcome::Closed => report.closed += 1,
                        Outcome::Reversed => report.reversed += 1,
                        _ => {}
                    }
                }
                Err(e) => {
                    report.skipped += 1;
                    error!(error = %e, "💥 [MONITOR] evaluation task panicked");
                }
            }
        }

        self.events.publish(&EngineEvent::MonitorTick {
            open_positions: report.open_positions,
            evaluated:      report.evaluated,
            skipped:        report.skipped,
        });
        debug!(?report, "[MONITOR] tick done");
        report
    }

    async fn evaluate(&self, symbol: Symbol, limits: RiskLimits) -> Outcome {
        let store = self.executor.store();
        let Some(_guard) = store.try_lock_symbol(&symbol) else {
            debug!(symbol = %symbol, "[MONITOR] symbol busy, skipped this tick");
            return Outcome::Skipped;
        };
        if store.is_reversing(&symbol) {
            return Outcome::Skipped;
        }

        let mark = match with_timeout("get_mark_price", self.exchange_timeout, self.gateway.get_mark_price(&symbol)).await {
            Ok(mark) if mark.is_finite() && mark > 0.0 => mark,
            Ok(mark) => {
                warn!(symbol = %symbol, mark, "⚠️ [MONITOR] invalid mark price, skipped");
                return Outcome::Skipped;
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "⚠️ [MONITOR] mark price unavailable, skipped");
                return Outcome::Skipped;
            }
        };

        let Some(position) = store.update(&symbol, |p| { p.mark_to(mark); }).await else {
            return Outcome::Skipped;
        };
        let pnl_pct = position.unrealized_pnl_pct;

        // ── Hard stop ────────────────────────────────────────────────────────
        if self.hard_stop_loss_pct > 0.0 && -pnl_pct >= self.hard_stop_loss_pct {
            warn!(symbol = %symbol, pnl_pct, "🛑 [MONITOR] hard stop hit");
            return match self.executor.close_locked(&position, CloseReason::HardStop).await {
                Ok(_) => Outcome::Closed,
                Err(_) => Outcome::Held,
            };
        }

        // ── Reverse ──────────────────────────────────────────────────────────
        if self.reverse.should_trigger(&position, pnl_pct) {
            return match self.reverse.run(&position, -pnl_pct, &limits).await {
                Some(_) => Outcome::Reversed,
                None => Outcome::Skipped,
            };
        }

        // ── Trailing stop ────────────────────────────────────────────────────
        let (next, action) = trailing::evaluate(position.trailing, position.side, position.entry_price, mark, &self.trailing);
        match action {
            TrailingAction::Hold => Outcome::Held,
            TrailingAction::Armed { stop } | TrailingAction::Ratcheted { to: stop, .. } => {
                let armed = matches!(action, TrailingAction::Armed { .. });
                store.update(&symbol, |p| p.trailing = next).await;
                info!(symbol = %symbol, stop, armed, pnl_pct, "📈 [MONITOR] trailing stop moved");
                self.events.publish(&EngineEvent::TrailingUpdated { symbol: symbol.clone(), stop, armed });
                Outcome::Held
            }
            TrailingAction::Close { stop } => {
                info!(symbol = %symbol, stop, mark, roi_pct = position.roi_pct(), "🎯 [MONITOR] trailing stop crossed");
                match self.executor.close_locked(&position, CloseReason::TrailingStop).await {
                    Ok(_) => Outcome::Closed,
                    Err(_) => Outcome::Held,
                }
            }
        }
    }

    // ─── Equity ───────────────────────────────────────────────────────────────

    /// Balance plus unrealized PnL across the store, written to the audit sink.
    pub async fn equity_snapshot(&self) -> Option<EquitySnapshot> {
        let balance = match with_timeout("get_balance", self.exchange_timeout, self.gateway.get_balance()).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(error = %e, "⚠️ [EQUITY] balance unavailable, snapshot skipped");
                return None;
            }
        };
        let positions = self.executor.store().snapshot().await;
        let snapshot = EquitySnapshot {
            total_balance:  balance.total,
            free_balance:   balance.free,
            unrealized_pnl: positions.iter().map(|p| p.size * p.unrealized_pnl_pct / 100.0).sum(),
            open_positions: positions.len(),
            timestamp:      Utc::now(),
        };
        self.auditor.record(AuditRecord::Equity(snapshot.clone())).await;
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PositionOrigin, ReverseOutcome, Side};
    use crate::testkit::Harness;

    #[tokio::test]
    async fn test_reverse_scenario_btc() {
        let h = Harness::new();
        h.gateway.set_price("BTCUSDT", 65_000.0);
        h.open_long("BTCUSDT", 100.0, 5).await;

        h.gateway.set_price("BTCUSDT", 63_635.0);
        let report = h.monitor.tick().await;
        assert_eq!(report.reversed, 1);

        let position = h.store.get(&"BTCUSDT".into()).await.unwrap();
        assert_eq!(position.side, Side::Short);
        assert!((position.size - 150.0).abs() < 1e-9);

        let events = h.sink.recent(10, Some("reverse"));
        assert_eq!(events.len(), 1);
        let AuditRecord::Reverse(event) = &events[0].record else { panic!("expected reverse record") };
        assert!((event.loss_pct - 2.1).abs() < 1e-6);
        assert_eq!(event.new_side, Side::Short);
        assert_eq!(event.new_size, Some(150.0));
        assert_eq!(event.outcome, ReverseOutcome::Reopened);
    }

    #[tokio::test]
    async fn test_trailing_arms_then_closes() {
        let h = Harness::new();
        h.gateway.set_price("ETHUSDT", 2_000.0);
        h.open_long("ETHUSDT", 200.0, 3).await;

        h.gateway.set_price("ETHUSDT", 2_040.0);
        h.monitor.tick().await;
        let armed = h.store.get(&"ETHUSDT".into()).await.unwrap();
        assert!((armed.trailing.stop().unwrap() - 2_020.0).abs() < 1e-6);

        h.gateway.set_price("ETHUSDT", 2_015.0);
        let report = h.monitor.tick().await;
        assert_eq!(report.closed, 1);
        assert!(!h.store.contains(&"ETHUSDT".into()).await);

        let closed = h.sink.recent(10, Some("closed"));
        let AuditRecord::Closed(summary) = &closed[0].record else { panic!("expected closed record") };
        assert_eq!(summary.reason, CloseReason::TrailingStop);
    }

    #[tokio::test]
    async fn test_reverse_wins_over_armed_trailing_on_gap_down() {
        let h = Harness::new();
        h.gateway.set_price("ETHUSDT", 2_000.0);
        h.open_long("ETHUSDT", 200.0, 3).await;

        h.gateway.set_price("ETHUSDT", 2_040.0);
        h.monitor.tick().await;
        assert!(h.store.get(&"ETHUSDT".into()).await.unwrap().trailing.stop().is_some());

        // one tick from +2 % to -2.5 %: through the trailing stop and past the reverse threshold
        h.gateway.set_price("ETHUSDT", 1_950.0);
        let report = h.monitor.tick().await;
        assert_eq!(report.reversed, 1);

        let position = h.store.get(&"ETHUSDT".into()).await.unwrap();
        assert_eq!(position.side, Side::Short);
        let closed = h.sink.recent(10, Some("closed"));
        assert!(!closed.is_empty());
        for entry in &closed {
            let AuditRecord::Closed(summary) = &entry.record else { panic!("expected closed record") };
            assert_eq!(summary.reason, CloseReason::Reverse);
        }
    }

    #[tokio::test]
    async fn test_hard_stop_wins_over_reverse() {
        let h = Harness::with_hard_stop(1.5);
        h.gateway.set_price("SOLUSDT", 100.0);
        h.open_long("SOLUSDT", 50.0, 2).await;

        h.gateway.set_price("SOLUSDT", 97.0);
        let report = h.monitor.tick().await;
        assert_eq!(report.closed, 1);
        assert_eq!(report.reversed, 0);
        assert!(!h.store.contains(&"SOLUSDT".into()).await);
    }

    #[tokio::test]
    async fn test_busy_symbol_is_skipped() {
        let h = Harness::new();
        h.gateway.set_price("BTCUSDT", 65_000.0);
        h.open_long("BTCUSDT", 100.0, 5).await;

        let _held = h.store.lock_symbol(&"BTCUSDT".into()).await;
        h.gateway.set_price("BTCUSDT", 60_000.0);
        let report = h.monitor.tick().await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.reversed, 0);
    }

    #[tokio::test]
    async fn test_reconcile_adopts_and_drops_via_tick() {
        let h = Harness::new();
        h.gateway.set_price("BTCUSDT", 65_000.0);
        h.open_long("BTCUSDT", 100.0, 5).await;
        h.gateway.forget_position("BTCUSDT");
        h.gateway.inject_position("XRPUSDT", Side::Short, 0.5, 80.0, 4);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = h.monitor.tick().await;
        assert_eq!(report.dropped, 1);
        assert_eq!(report.adopted, 1);
        assert!(!h.store.contains(&"BTCUSDT".into()).await);
        let adopted = h.store.get(&"XRPUSDT".into()).await.unwrap();
        assert_eq!(adopted.origin, PositionOrigin::Adopted);

        let closed = h.sink.recent(10, Some("closed"));
        let AuditRecord::Closed(summary) = &closed[0].record else { panic!("expected closed record") };
        assert_eq!(summary.reason, CloseReason::ExchangeClosed);
    }

    #[tokio::test]
    async fn test_mark_failure_skips_symbol() {
        let h = Harness::new();
        h.gateway.set_price("BTCUSDT", 65_000.0);
        h.open_long("BTCUSDT", 100.0, 5).await;
        h.gateway.fail_marks(true);

        let report = h.monitor.tick().await;
        assert_eq!(report.skipped, 1);
        assert!(h.store.contains(&"BTCUSDT".into()).await);
    }

    #[tokio::test]
    async fn test_equity_snapshot_sums_unrealized() {
        let h = Harness::new();
        h.gateway.set_price("BTCUSDT", 100.0);
        h.open_long("BTCUSDT", 200.0, 2).await;
        h.gateway.set_price("BTCUSDT", 101.0);
        h.monitor.tick().await;

        let snapshot = h.monitor.equity_snapshot().await.unwrap();
        assert_eq!(snapshot.open_positions, 1);
        assert!((snapshot.unrealized_pnl - 2.0).abs() < 1e-9);
        assert_eq!(h.sink.recent(10, Some("equity")).len(), 1);
    }
}
