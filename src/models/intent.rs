//! # models::intent
//!
//! [`TradeIntent`]: what the Decision Oracle wants done with a symbol this
//! cycle. Consumed once by the open path; afterwards it only lives in the
//! audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Symbol;

// ─── Direction ────────────────────────────────────────────────────────────────

/// Oracle verdict direction. Accepts the wire spellings the decision
/// services use (`OPEN_LONG`, `BUY`, `WAIT`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "LONG", alias = "OPEN_LONG", alias = "BUY", alias = "long")]
    Long,
    #[serde(rename = "SHORT", alias = "OPEN_SHORT", alias = "SELL", alias = "short")]
    Short,
    #[serde(rename = "NONE", alias = "WAIT", alias = "HOLD", alias = "NO_TRADE", alias = "none")]
    NoTrade,
}

impl Direction {
    /// Unknown spellings are treated as "do nothing".
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "LONG" | "OPEN_LONG" | "BUY" => Direction::Long,
            "SHORT" | "OPEN_SHORT" | "SELL" => Direction::Short,
            _ => Direction::NoTrade,
        }
    }

    /// The position side this direction opens, if any.
    pub fn side(self) -> Option<Side> {
        match self {
            Direction::Long => Some(Side::Long),
            Direction::Short => Some(Side::Short),
            Direction::NoTrade => None,
        }
    }
}

// ─── Side ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    #[serde(alias = "long", alias = "Buy", alias = "BUY")]
    Long,
    #[serde(alias = "short", alias = "Sell", alias = "SELL")]
    Short,
}

impl Side {
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// `+1` for long, `-1` for short. Multiplies a raw price move into PnL.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Trade Intent ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub intent_id:     Uuid,
    pub symbol:        Symbol,
    pub direction:     Direction,
    /// 0–100.
    pub confidence:    f64,
    pub leverage:      u32,
    /// Fraction of free balance, `0.0..=1.0`.
    pub size_fraction: f64,
    pub rationale:     String,
    pub created_at:    DateTime<Utc>,
}

impl TradeIntent {
    /// Fail-safe intent: used when the oracle is down or silent on a symbol.
    pub fn no_trade(symbol: Symbol, rationale: impl Into<String>) -> Self {
        Self {
            intent_id:     Uuid::new_v4(),
            symbol,
            direction:     Direction::NoTrade,
            confidence:    0.0,
            leverage:      0,
            size_fraction: 0.0,
            rationale:     rationale.into(),
            created_at:    Utc::now(),
        }
    }

    #[inline]
    pub fn is_actionable(&self) -> bool {
        self.direction != Direction::NoTrade
    }
}
