//! # models::position
//!
//! [`Position`] is the engine's record of one open exchange position.
//! Absence of a record always means *flat*; a record is created only after a
//! confirmed open and removed only after a confirmed close.
//!
//! `OpenPosition` vs `ClosedPosition`:
//! - [`Position`]       = live, owned by the Position Store, mutated by the monitor
//! - [`ClosedPosition`] = immutable summary written to the audit sink on close

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Side, Symbol};

// ─── Sub-states ───────────────────────────────────────────────────────────────

/// Trailing-stop sub-state. Stop prices are absolute prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrailingState {
    Inactive,
    Armed { activation_price: f64, stop: f64 },
    Trailing { stop: f64 },
}

impl TrailingState {
    pub fn stop(&self) -> Option<f64> {
        match *self {
            TrailingState::Inactive => None,
            TrailingState::Armed { stop, .. } | TrailingState::Trailing { stop } => Some(stop),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverseState {
    Idle,
    Reversing,
}

/// How the record came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionOrigin {
    Scan,
    Reverse,
    /// Found on the exchange during reconciliation.
    Adopted,
}

// ─── Position ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id:        Uuid,
    pub symbol:             Symbol,
    pub side:               Side,
    pub entry_price:        f64,
    /// Quote notional in USDT.
    pub size:               f64,
    pub leverage:           u32,
    pub opened_at:          DateTime<Utc>,
    pub mark_price:         f64,
    /// Unlevered price move in percent, signed by side.
    pub unrealized_pnl_pct: f64,
    pub trailing:           TrailingState,
    pub reverse:            ReverseState,
    pub origin:             PositionOrigin,
    /// Exchange order id of the opening fill, when known.
    pub order_id:           Option<String>,
}

impl Position {
    pub fn new(
        symbol: Symbol,
        side: Side,
        entry_price: f64,
        size: f64,
        leverage: u32,
        origin: PositionOrigin,
    ) -> Self {
        Self {
            position_id:        Uuid::new_v4(),
            symbol,
            side,
            entry_price,
            size,
            leverage,
            opened_at:          Utc::now(),
            mark_price:         entry_price,
            unrealized_pnl_pct: 0.0,
            trailing:           TrailingState::Inactive,
            reverse:            ReverseState::Idle,
            origin,
            order_id:           None,
        }
    }

    /// Unlevered PnL% at `mark`: `sign × (mark − entry) / entry × 100`.
    pub fn pnl_pct_at(&self, mark: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.side.sign() * (mark - self.entry_price) / self.entry_price * 100.0
    }

    /// Return on margin, for dashboards.
    #[inline]
    pub fn roi_pct(&self) -> f64 {
        self.unrealized_pnl_pct * self.leverage as f64
    }

    /// Refresh mark and PnL. Returns the new PnL%.
    pub fn mark_to(&mut self, mark: f64) -> f64 {
        self.mark_price = mark;
        self.unrealized_pnl_pct = self.pnl_pct_at(mark);
        self.unrealized_pnl_pct
    }
}

// ─── Closed Position ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    TrailingStop,
    HardStop,
    Reverse,
    Manual,
    /// The exchange stopped reporting the position (liquidation, external close).
    ExchangeClosed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub position_id:   Uuid,
    pub symbol:        Symbol,
    pub side:          Side,
    pub entry_price:   f64,
    pub exit_price:    f64,
    pub size:          f64,
    pub leverage:      u32,
    pub pnl_pct:       f64,
    pub roi_pct:       f64,
    pub opened_at:     DateTime<Utc>,
    pub closed_at:     DateTime<Utc>,
    pub duration_secs: i64,
    pub reason:        CloseReason,
}

impl ClosedPosition {
    pub fn from_position(position: &Position, exit_price: f64, reason: CloseReason) -> Self {
        let closed_at = Utc::now();
        let pnl_pct = position.pnl_pct_at(exit_price);
        Self {
            position_id:   position.position_id,
            symbol:        position.symbol.clone(),
            side:          position.side,
            entry_price:   position.entry_price,
            exit_price,
            size:          position.size,
            leverage:      position.leverage,
            pnl_pct,
            roi_pct:       pnl_pct * position.leverage as f64,
            opened_at:     position.opened_at,
            closed_at,
            duration_secs: (closed_at - position.opened_at).num_seconds().max(0),
            reason,
        }
    }
}
