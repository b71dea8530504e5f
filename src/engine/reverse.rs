//! # engine::reverse — Reverse Strategy Engine
//!
//! When a position's loss crosses the threshold, close it and reopen on the
//! opposite side with `size × recovery_multiplier`.
//!
//! ```text
//!  loss ≥ threshold ─▶ mark reversing ─▶ close (REVERSE) ─┬─ fail ─▶ CLOSE_FAILED, keep original
//!                                                          │
//!                                                          └─ ok ──▶ admission + open opposite
//!                                                                     ├─ ok       ─▶ REOPENED
//!                                                                     ├─ rejected ─▶ ADMISSION_REJECTED (flat)
//!                                                                     └─ failed   ─▶ REOPEN_FAILED (flat)
//! ```
//!
//! Runs with the symbol lock held by the monitor. The reversing marker is a
//! drop guard, so it clears on every exit path. Every attempt produces one
//! [`ReverseEvent`]; a failed reopen is not retried on the same tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::executor::{Executor, OpenSize};
use crate::engine::risk::RiskLimits;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::models::{
    AuditRecord, CloseReason, Position, PositionOrigin, ReverseEvent, ReverseOutcome, Symbol,
};
use crate::sink::Auditor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseConfig {
    pub enabled:             bool,
    /// Loss in percent (positive) that triggers a reverse.
    pub loss_threshold_pct:  f64,
    pub recovery_multiplier: f64,
    /// No second reverse on the same symbol within this window.
    #[serde(with = "secs")]
    pub cooldown:            Duration,
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

pub struct ReverseEngine {
    config:    ReverseConfig,
    executor:  Arc<Executor>,
    auditor:   Auditor,
    events:    EventBus,
    last_fire: Mutex<HashMap<Symbol, Instant>>,
}

impl ReverseEngine {
    pub fn new(config: ReverseConfig, executor: Arc<Executor>, auditor: Auditor, events: EventBus) -> Self {
        Self { config, executor, auditor, events, last_fire: Mutex::new(HashMap::new()) }
    }

    pub fn config(&self) -> &ReverseConfig {
        &self.config
    }

    pub fn in_cooldown(&self, symbol: &Symbol) -> bool {
        self.last_fire
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .is_some_and(|at| at.elapsed() < self.config.cooldown)
    }

    /// Trigger test for a freshly marked position. `pnl_pct` is signed.
    pub fn should_trigger(&self, position: &Position, pnl_pct: f64) -> bool {
        self.config.enabled
            && -pnl_pct >= self.config.loss_threshold_pct
            && !self.executor.store().is_reversing(&position.symbol)
            && !self.in_cooldown(&position.symbol)
    }

    /// Execute one reverse. Caller holds `position.symbol`'s lock.
    ///
    /// `None` if the symbol was already marked reversing.
    pub async fn run(&self, position: &Position, loss_pct: f64, limits: &RiskLimits) -> Option<ReverseEvent> {
        let symbol = &position.symbol;
        let _marker = self.executor.store().begin_reverse(symbol)?;

        let new_side = position.side.opposite();
        let multiplier = self.config.recovery_multiplier;
        warn!(
            symbol   = %symbol,
            side     = %position.side,
            loss_pct,
            new_side = %new_side,
            "🔄 [REVERSE] loss threshold crossed, reversing"
        );

        // ── [1] Close ────────────────────────────────────────────────────────
        if let Err(e) = self.executor.close_locked(position, CloseReason::Reverse).await {
            let event = self.event(position, loss_pct, None, ReverseOutcome::CloseFailed, Some(e.to_string()));
            return Some(self.finish(event).await);
        }

        // ── [2] Reopen opposite ──────────────────────────────────────────────
        let new_size = position.size * multiplier;
        let reopened = self
            .executor
            .open_locked(
                symbol,
                new_side,
                position.leverage,
                OpenSize::Notional(new_size),
                PositionOrigin::Reverse,
                limits,
            )
            .await;

        let (outcome, detail) = match reopened {
            Ok(opened) => {
                self.last_fire
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(symbol.clone(), Instant::now());
                (ReverseOutcome::Reopened, Some(format!("opened {} {:.2} USDT", opened.side, opened.size)))
            }
            Err(e @ (EngineError::AdmissionRejected { .. } | EngineError::Halted(_))) => {
                (ReverseOutcome::AdmissionRejected, Some(e.to_string()))
            }
            Err(e) => (ReverseOutcome::ReopenFailed, Some(e.to_string())),
        };

        let event = self.event(position, loss_pct, Some(new_size), outcome, detail);
        Some(self.finish(event).await)
    }

    fn event(
        &self,
        position: &Position,
        loss_pct: f64,
        new_size: Option<f64>,
        outcome: ReverseOutcome,
        detail: Option<String>,
    ) -> ReverseEvent {
        ReverseEvent {
            event_id:        Uuid::new_v4(),
            symbol:          position.symbol.clone(),
            original_side:   position.side,
            loss_pct,
            new_side:        position.side.opposite(),
            size_multiplier: self.config.recovery_multiplier,
            new_size,
            outcome,
            detail,
            timestamp:       Utc::now(),
        }
    }

    async fn finish(&self, event: ReverseEvent) -> ReverseEvent {
        match event.outcome {
            ReverseOutcome::Reopened => info!(symbol = %event.symbol, new_side = %event.new_side, "✅ [REVERSE] reopened"),
            outcome => warn!(symbol = %event.symbol, ?outcome, detail = ?event.detail, "⚠️ [REVERSE] incomplete"),
        }
        self.auditor.record(AuditRecord::Reverse(event.clone())).await;
        self.events.publish(&EngineEvent::ReverseFired { reverse: Box::new(event.clone()) });
        event
    }
}
