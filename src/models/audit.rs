//! # models::audit
//!
//! Records written to the audit sink. Write-only from the engine's view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ClosedPosition, Position, Side, Symbol, TradeIntent};

// ─── Reverse Event ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReverseOutcome {
    /// Closed and reopened on the opposite side.
    Reopened,
    /// Closed, but admission refused the opposite open. Now flat.
    AdmissionRejected,
    /// Close was not confirmed; original position kept.
    CloseFailed,
    /// Closed, opposite open failed at the exchange. Now flat.
    ReopenFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseEvent {
    pub event_id:        Uuid,
    pub symbol:          Symbol,
    pub original_side:   Side,
    /// Loss at trigger time, positive number (2.1 = −2.1 %).
    pub loss_pct:        f64,
    pub new_side:        Side,
    pub size_multiplier: f64,
    /// Requested notional of the opposite open, `None` if the close never
    /// confirmed.
    pub new_size:        Option<f64>,
    pub outcome:         ReverseOutcome,
    pub detail:          Option<String>,
    pub timestamp:       DateTime<Utc>,
}

// ─── Equity Snapshot ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub total_balance:    f64,
    pub free_balance:     f64,
    /// Sum of `size × pnl%` across open positions, in USDT.
    pub unrealized_pnl:   f64,
    pub open_positions:   usize,
    pub timestamp:        DateTime<Utc>,
}

// ─── Audit Record ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AuditRecord {
    Intent(TradeIntent),
    Opened(Position),
    Closed(ClosedPosition),
    Reverse(ReverseEvent),
    Equity(EquitySnapshot),
    /// Admission refusal of an otherwise actionable open.
    Rejected { symbol: Symbol, reason: String },
}

impl AuditRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditRecord::Intent(_) => "intent",
            AuditRecord::Opened(_) => "opened",
            AuditRecord::Closed(_) => "closed",
            AuditRecord::Reverse(_) => "reverse",
            AuditRecord::Equity(_) => "equity",
            AuditRecord::Rejected { .. } => "rejected",
        }
    }

    pub fn symbol(&self) -> Option<&Symbol> {
        match self {
            AuditRecord::Intent(i) => Some(&i.symbol),
            AuditRecord::Opened(p) => Some(&p.symbol),
            AuditRecord::Closed(c) => Some(&c.symbol),
            AuditRecord::Reverse(r) => Some(&r.symbol),
            AuditRecord::Rejected { symbol, .. } => Some(symbol),
            AuditRecord::Equity(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id:          Uuid,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record:      AuditRecord,
}

impl AuditEntry {
    pub fn new(record: AuditRecord) -> Self {
        Self { id: Uuid::new_v4(), recorded_at: Utc::now(), record }
    }
}
