//! # events
//!
//! [`EngineEvent`]: everything the engine broadcasts live to `/ws/monitor`
//! subscribers.
//!
//! Uses `tokio::sync::broadcast::Sender<String>` with events pre-serialized to
//! JSON, so slow subscribers never hold up the engine and no `Clone` bound
//! leaks into the event payloads.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::engine::risk::RiskLimits;
use crate::models::{ClosedPosition, Position, ReverseEvent, Symbol, TradeIntent};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    /// Oracle verdicts for one scan cycle (NONE included).
    IntentsDecided {
        cycle_id: Uuid,
        intents:  Vec<TradeIntent>,
    },

    PositionOpened {
        position: Box<Position>,
    },

    PositionClosed {
        closed: Box<ClosedPosition>,
    },

    /// Open refused by the Risk Guard.
    AdmissionRejected {
        symbol: Symbol,
        reason: String,
    },

    /// Exchange refused or never answered an open.
    OpenFailed {
        symbol: Symbol,
        error:  String,
    },

    CloseFailed {
        symbol: Symbol,
        error:  String,
    },

    ReverseFired {
        reverse: Box<ReverseEvent>,
    },

    TrailingUpdated {
        symbol: Symbol,
        stop:   f64,
        armed:  bool,
    },

    RiskHalted {
        reason: String,
    },

    RiskRearmed,

    LimitsChanged {
        limits: RiskLimits,
    },

    ScanCompleted {
        cycle_id:   Uuid,
        candidates: usize,
        eligible:   usize,
        opened:     usize,
    },

    MonitorTick {
        open_positions: usize,
        evaluated:      usize,
        skipped:        usize,
    },
}

impl EngineEvent {
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"SERIALIZATION_ERROR"}"#.to_string())
    }
}

/// Fire-and-forget broadcaster shared by every component.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<String>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Never fails: no subscribers is the normal headless case.
    pub fn publish(&self, event: &EngineEvent) {
        let _ = self.tx.send(event.to_json());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
