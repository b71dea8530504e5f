//! # engine::executor
//!
//! **Open / close execution paths** shared by the scan pipeline, the reverse
//! engine, the monitor and the control API.
//!
//! ## Open path (`open_locked`, symbol lock held by the caller)
//! ```text
//!  halt check ─▶ get_balance ─▶ ┌ admission lock ─────────────────────────┐
//!                               │ fresh count ─▶ Risk Guard ─▶ open order │
//!                               │ ─▶ insert into store                     │
//!                               └──────────────────────────────────────────┘
//! ```
//! A failed open never creates a record. A failed close leaves the record as
//! it was; the next monitor tick re-reads the exchange.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::engine::risk::{Admission, AdmissionRequest, RiskLimits, RiskManager};
use crate::engine::store::PositionStore;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::gateway::{with_timeout, ExchangeGateway, OpenOrder};
use crate::insights::TradeRecorder;
use crate::models::{
    AuditRecord, ClosedPosition, CloseReason, Position, PositionOrigin, Side, Symbol, TradeIntent,
};
use crate::sink::Auditor;

/// How much to open.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpenSize {
    /// Fraction of free balance, `0.0..=1.0` (scan path).
    Fraction(f64),
    /// Exact quote notional in USDT (reverse path).
    Notional(f64),
}

/// Blocks re-entering a symbol on the side just closed after a large move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReentryCooldown {
    /// Closes with `|roi%|` at or above this start a cooldown.
    pub min_roi_pct: f64,
    /// Zero disables the cooldown.
    pub window:      Duration,
}

impl ReentryCooldown {
    pub fn disabled() -> Self {
        Self { min_roi_pct: 0.0, window: Duration::ZERO }
    }
}

pub struct Executor {
    store:            Arc<PositionStore>,
    risk:             Arc<RiskManager>,
    gateway:          Arc<dyn ExchangeGateway>,
    auditor:          Auditor,
    events:           EventBus,
    recorder:         Arc<dyn TradeRecorder>,
    exchange_timeout: Duration,
    reentry:          ReentryCooldown,
    opened_total:     AtomicU64,
    closed_total:     AtomicU64,
}

impl Executor {
    pub fn new(
        store: Arc<PositionStore>,
        risk: Arc<RiskManager>,
        gateway: Arc<dyn ExchangeGateway>,
        auditor: Auditor,
        events: EventBus,
        recorder: Arc<dyn TradeRecorder>,
        exchange_timeout: Duration,
        reentry: ReentryCooldown,
    ) -> Self {
        Self {
            store,
            risk,
            gateway,
            auditor,
            events,
            recorder,
            exchange_timeout,
            reentry,
            opened_total: AtomicU64::new(0),
            closed_total: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<PositionStore> {
        &self.store
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    pub fn opened_total(&self) -> u64 {
        self.opened_total.load(Ordering::Relaxed)
    }

    pub fn closed_total(&self) -> u64 {
        self.closed_total.load(Ordering::Relaxed)
    }

    // ─── Scan path ────────────────────────────────────────────────────────────

    /// Open the position an intent asks for. Takes the symbol lock itself.
    pub async fn open_from_intent(&self, intent: &TradeIntent, limits: &RiskLimits) -> Result<Position, EngineError> {
        let Some(side) = intent.direction.side() else {
            return Err(EngineError::ValidationFailure(format!("{}: intent is NONE", intent.symbol)));
        };
        let symbol = &intent.symbol;

        let _symbol_guard = self.store.lock_symbol(symbol).await;
        if self.store.is_reversing(symbol) {
            return Err(EngineError::Busy { symbol: symbol.clone(), reason: "reverse in progress".into() });
        }
        if self.store.contains(symbol).await {
            return Err(EngineError::Busy { symbol: symbol.clone(), reason: "position already open".into() });
        }
        if self.store.in_cooldown(symbol, side) {
            return Err(self.reject(symbol, format!("{side} re-entry cooldown active")).await);
        }

        self.open_locked(
            symbol,
            side,
            intent.leverage,
            OpenSize::Fraction(intent.size_fraction),
            PositionOrigin::Scan,
            limits,
        )
        .await
    }

    // ─── Open ─────────────────────────────────────────────────────────────────

    /// Admission + open + record. The caller must hold `symbol`'s lock and
    /// have checked the symbol is flat.
    pub async fn open_locked(
        &self,
        symbol: &Symbol,
        side: Side,
        leverage: u32,
        size: OpenSize,
        origin: PositionOrigin,
        limits: &RiskLimits,
    ) -> Result<Position, EngineError> {
        // ── [1] Halt switch ───────────────────────────────────────────────────
        if let Some(reason) = self.risk.halted().await {
            return Err(EngineError::Halted(reason));
        }

        // ── [2] Balance (before the admission lock) ──────────────────────────
        let balance = with_timeout("get_balance", self.exchange_timeout, self.gateway.get_balance())
            .await
            .map_err(|e| EngineError::TransportFailure(format!("balance unavailable: {e}")))?;
        if !(balance.free.is_finite() && balance.free > 0.0) {
            return Err(self.reject(symbol, format!("no free balance ({})", balance.free)).await);
        }

        let requested_pct = match size {
            OpenSize::Fraction(f) => f * 100.0,
            OpenSize::Notional(n) => n / balance.free * 100.0,
        };

        // ── [3] Admission, atomic with the insert ────────────────────────────
        let _admission = self.store.admission().await;
        let open_count = self.store.count().await;
        let request = AdmissionRequest { symbol: symbol.clone(), side, leverage, size_pct: requested_pct };

        let notional = match self.risk.evaluate(&request, open_count, limits) {
            Admission::Rejected(reason) => return Err(self.reject(symbol, reason).await),
            Admission::Approved { size_pct, clamped } => match size {
                OpenSize::Notional(n) if !clamped => n,
                _ => {
                    if clamped {
                        info!(symbol = %symbol, requested_pct, size_pct, "🛡️ size clamped to max_size_pct");
                    }
                    balance.free * size_pct / 100.0
                }
            },
        };

        // ── [4] Exchange ─────────────────────────────────────────────────────
        let order = OpenOrder { symbol: symbol.clone(), side, size: notional, leverage };
        let fill = match with_timeout("open_position", self.exchange_timeout, self.gateway.open_position(&order)).await {
            Ok(fill) => fill,
            Err(e) => {
                error!(symbol = %symbol, side = %side, error = %e, "❌ open failed, no record created");
                self.events.publish(&EngineEvent::OpenFailed { symbol: symbol.clone(), error: e.to_string() });
                self.note_failure().await;
                return Err(e.into_engine(symbol));
            }
        };
        self.risk.record_success().await;

        // ── [5] Record ───────────────────────────────────────────────────────
        let mut position = Position::new(symbol.clone(), side, fill.entry_price, notional, leverage, origin);
        position.order_id = fill.order_id;
        if let Err(existing) = self.store.insert_new(position.clone()).await {
            // only reachable if someone mutated the symbol without its lock
            error!(symbol = %symbol, "store already held a record after a confirmed open");
            return Err(EngineError::Busy { symbol: existing.symbol, reason: "record appeared during open".into() });
        }
        drop(_admission);

        self.opened_total.fetch_add(1, Ordering::Relaxed);
        info!(
            symbol   = %symbol,
            side     = %side,
            entry    = position.entry_price,
            notional = position.size,
            leverage,
            ?origin,
            "✅ Position opened"
        );
        self.auditor.record(AuditRecord::Opened(position.clone())).await;
        self.events.publish(&EngineEvent::PositionOpened { position: Box::new(position.clone()) });
        Ok(position)
    }

    async fn reject(&self, symbol: &Symbol, reason: String) -> EngineError {
        warn!(symbol = %symbol, reason = %reason, "🛡️ admission rejected");
        self.auditor
            .record(AuditRecord::Rejected { symbol: symbol.clone(), reason: reason.clone() })
            .await;
        self.events.publish(&EngineEvent::AdmissionRejected { symbol: symbol.clone(), reason: reason.clone() });
        EngineError::AdmissionRejected { symbol: symbol.clone(), reason }
    }

    async fn note_failure(&self) {
        if let Some(reason) = self.risk.record_failure().await {
            self.events.publish(&EngineEvent::RiskHalted { reason });
        }
    }

    // ─── Close ────────────────────────────────────────────────────────────────

    /// Close `symbol`'s position. Takes the symbol lock itself (control API).
    pub async fn close(&self, symbol: &Symbol, reason: CloseReason) -> Result<ClosedPosition, EngineError> {
        let _symbol_guard = self.store.lock_symbol(symbol).await;
        if self.store.is_reversing(symbol) {
            return Err(EngineError::Busy { symbol: symbol.clone(), reason: "reverse in progress".into() });
        }
        let position = self
            .store
            .get(symbol)
            .await
            .ok_or_else(|| EngineError::NotOpen(symbol.clone()))?;
        self.close_locked(&position, reason).await
    }

    /// Close via the gateway and drop the record. Caller holds the symbol lock.
    pub async fn close_locked(&self, position: &Position, reason: CloseReason) -> Result<ClosedPosition, EngineError> {
        let symbol = &position.symbol;
        let fill = match with_timeout("close_position", self.exchange_timeout, self.gateway.close_position(symbol)).await {
            Ok(fill) => fill,
            Err(e) => {
                error!(symbol = %symbol, ?reason, error = %e, "❌ close failed, record kept");
                self.events.publish(&EngineEvent::CloseFailed { symbol: symbol.clone(), error: e.to_string() });
                self.note_failure().await;
                return Err(e.into_engine(symbol));
            }
        };
        self.risk.record_success().await;

        self.store.remove(symbol).await;
        let closed = ClosedPosition::from_position(position, fill.exit_price, reason);
        info!(
            symbol  = %symbol,
            side    = %closed.side,
            exit    = closed.exit_price,
            pnl_pct = closed.pnl_pct,
            ?reason,
            "📕 Position closed"
        );
        self.record_closed(closed.clone()).await;
        Ok(closed)
    }

    /// Start the re-entry cooldown if due, then audit, broadcast and forward
    /// the close to the learning agent.
    pub async fn record_closed(&self, closed: ClosedPosition) {
        self.closed_total.fetch_add(1, Ordering::Relaxed);
        if !self.reentry.window.is_zero() && closed.roi_pct.abs() >= self.reentry.min_roi_pct {
            self.store.start_cooldown(&closed.symbol, closed.side, Instant::now() + self.reentry.window);
            info!(
                symbol  = %closed.symbol,
                side    = %closed.side,
                roi_pct = closed.roi_pct,
                window  = ?self.reentry.window,
                "⏳ re-entry cooldown started"
            );
        }
        self.auditor.record(AuditRecord::Closed(closed.clone())).await;
        self.events.publish(&EngineEvent::PositionClosed { closed: Box::new(closed.clone()) });

        let recorder = Arc::clone(&self.recorder);
        tokio::spawn(async move {
            recorder.record(&closed).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use crate::testkit::{intent, Harness, HarnessOptions};

    #[tokio::test]
    async fn test_open_from_intent_records_position() {
        let h = Harness::new();
        h.gateway.set_price("BTCUSDT", 65_000.0);

        let position = h
            .executor
            .open_from_intent(&intent("BTCUSDT", Direction::Long, 0.01, 5), &h.limits())
            .await
            .unwrap();

        assert_eq!(position.side, Side::Long);
        assert!((position.size - 100.0).abs() < 1e-9);
        assert_eq!(h.store.count().await, 1);
        assert!(h.gateway.has_position("BTCUSDT"));
        assert_eq!(h.sink.recent(10, Some("opened")).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_open_creates_no_record() {
        let h = Harness::new();
        h.gateway.set_price("ETHUSDT", 2_000.0);
        h.gateway.fail_opens(true);

        let err = h
            .executor
            .open_from_intent(&intent("ETHUSDT", Direction::Short, 0.05, 3), &h.limits())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ExecutionFailure { .. }));
        assert_eq!(h.store.count().await, 0);
        assert_eq!(h.risk.status().await.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_oversized_intent_is_clamped() {
        let h = Harness::new();
        h.gateway.set_price("SOLUSDT", 150.0);

        let position = h
            .executor
            .open_from_intent(&intent("SOLUSDT", Direction::Long, 0.9, 5), &h.limits())
            .await
            .unwrap();
        // free 10_000 × max 20 %
        assert!((position.size - 2_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_leverage_over_limit_rejected_and_audited() {
        let h = Harness::new();
        h.gateway.set_price("SOLUSDT", 150.0);

        let err = h
            .executor
            .open_from_intent(&intent("SOLUSDT", Direction::Long, 0.1, 50), &h.limits())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AdmissionRejected { .. }));
        assert_eq!(h.gateway.open_calls(), 0);
        assert_eq!(h.sink.recent(10, Some("rejected")).len(), 1);
    }

    #[tokio::test]
    async fn test_halted_engine_opens_nothing_but_still_closes() {
        let h = Harness::new();
        h.gateway.set_price("BTCUSDT", 65_000.0);
        h.executor
            .open_from_intent(&intent("BTCUSDT", Direction::Long, 0.01, 5), &h.limits())
            .await
            .unwrap();
        h.risk.kill("test").await;

        h.gateway.set_price("ETHUSDT", 2_000.0);
        let err = h
            .executor
            .open_from_intent(&intent("ETHUSDT", Direction::Long, 0.01, 5), &h.limits())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Halted(_)));

        let closed = h.executor.close(&"BTCUSDT".into(), CloseReason::Manual).await.unwrap();
        assert_eq!(closed.reason, CloseReason::Manual);
        assert_eq!(h.store.count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_close_keeps_record() {
        let h = Harness::new();
        h.gateway.set_price("BTCUSDT", 65_000.0);
        h.executor
            .open_from_intent(&intent("BTCUSDT", Direction::Long, 0.01, 5), &h.limits())
            .await
            .unwrap();
        h.gateway.fail_closes(true);

        assert!(h.executor.close(&"BTCUSDT".into(), CloseReason::Manual).await.is_err());
        assert!(h.store.contains(&"BTCUSDT".into()).await);
    }

    #[tokio::test]
    async fn test_close_unknown_symbol_is_not_open() {
        let h = Harness::new();
        let err = h.executor.close(&"XRPUSDT".into(), CloseReason::Manual).await.unwrap_err();
        assert!(matches!(err, EngineError::NotOpen(_)));
    }

    #[tokio::test]
    async fn test_large_loss_close_blocks_same_side_reentry() {
        let h = Harness::with_options(HarnessOptions {
            reentry: ReentryCooldown { min_roi_pct: 5.0, window: Duration::from_secs(3600) },
            ..HarnessOptions::default()
        });
        h.gateway.set_price("BTCUSDT", 60_000.0);
        h.executor
            .open_from_intent(&intent("BTCUSDT", Direction::Long, 0.01, 5), &h.limits())
            .await
            .unwrap();
        // -1.5 % at 5x
        h.gateway.set_price("BTCUSDT", 59_100.0);
        let closed = h.executor.close(&"BTCUSDT".into(), CloseReason::Manual).await.unwrap();
        assert!(closed.roi_pct <= -5.0);
        assert!(h.store.in_cooldown(&"BTCUSDT".into(), Side::Long));

        let err = h
            .executor
            .open_from_intent(&intent("BTCUSDT", Direction::Long, 0.01, 5), &h.limits())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AdmissionRejected { .. }));

        let position = h
            .executor
            .open_from_intent(&intent("BTCUSDT", Direction::Short, 0.01, 5), &h.limits())
            .await
            .unwrap();
        assert_eq!(position.side, Side::Short);
    }

    #[tokio::test]
    async fn test_small_close_starts_no_cooldown() {
        let h = Harness::with_options(HarnessOptions {
            reentry: ReentryCooldown { min_roi_pct: 5.0, window: Duration::from_secs(3600) },
            ..HarnessOptions::default()
        });
        h.gateway.set_price("ETHUSDT", 2_000.0);
        h.executor
            .open_from_intent(&intent("ETHUSDT", Direction::Long, 0.01, 5), &h.limits())
            .await
            .unwrap();
        // -0.5 % at 5x
        h.gateway.set_price("ETHUSDT", 1_990.0);
        h.executor.close(&"ETHUSDT".into(), CloseReason::Manual).await.unwrap();

        assert!(!h.store.in_cooldown(&"ETHUSDT".into(), Side::Long));
        assert!(h
            .executor
            .open_from_intent(&intent("ETHUSDT", Direction::Long, 0.01, 5), &h.limits())
            .await
            .is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admissions_never_exceed_max_positions() {
        let h = Harness::new();
        let symbols: Vec<String> = (0..12).map(|i| format!("C{i}USDT")).collect();
        for s in &symbols {
            h.gateway.set_price(s, 10.0);
        }
        h.gateway.set_open_delay(Duration::from_millis(5));
        let limits = h.limits();

        let mut tasks = tokio::task::JoinSet::new();
        for s in symbols {
            let executor = Arc::clone(&h.executor);
            tasks.spawn(async move {
                executor
                    .open_from_intent(&intent(&s, Direction::Long, 0.01, 2), &limits)
                    .await
                    .is_ok()
            });
        }
        let mut opened = 0;
        while let Some(ok) = tasks.join_next().await {
            if ok.unwrap() {
                opened += 1;
            }
        }

        assert_eq!(opened, limits.max_positions);
        assert_eq!(h.store.count().await, limits.max_positions);
        assert_eq!(h.gateway.open_position_count(), limits.max_positions);
    }
}
