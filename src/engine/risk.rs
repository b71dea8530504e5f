//! # engine::risk — Risk Guard
//!
//! Last gate before any order reaches the exchange.
//!
//! ## Layers
//! 1. **Halt switch**     — manual kill, or automatic after N consecutive
//!                          execution failures. Blocks opens and reopens only;
//!                          closes stay allowed.
//! 2. **Admission**       — pure [`admit`]: max concurrent positions and max
//!                          leverage are hard rejects, size is clamped.
//!
//! Admission must run under the Position Store's admission lock with a fresh
//! open count; see `engine::executor`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::{Side, Symbol};

// ─── Limits ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_positions: usize,
    pub max_leverage:  u32,
    /// Percent of free balance per position, `(0, 100]`.
    pub max_size_pct:  f64,
}

impl RiskLimits {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_positions == 0 {
            return Err("max_positions must be at least 1".into());
        }
        if self.max_leverage == 0 {
            return Err("max_leverage must be at least 1".into());
        }
        if !self.max_size_pct.is_finite() || self.max_size_pct <= 0.0 || self.max_size_pct > 100.0 {
            return Err(format!("max_size_pct {} must be in (0, 100]", self.max_size_pct));
        }
        Ok(())
    }
}

// ─── Admission ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionRequest {
    pub symbol:   Symbol,
    pub side:     Side,
    pub leverage: u32,
    /// Requested percent of free balance.
    pub size_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Approved { size_pct: f64, clamped: bool },
    Rejected(String),
}

/// Pure admission decision. `open_count` must be read under the admission lock.
pub fn admit(req: &AdmissionRequest, open_count: usize, limits: &RiskLimits) -> Admission {
    if open_count >= limits.max_positions {
        return Admission::Rejected(format!(
            "max positions reached: {open_count}/{}",
            limits.max_positions
        ));
    }
    if req.leverage == 0 {
        return Admission::Rejected("leverage must be at least 1".into());
    }
    if req.leverage > limits.max_leverage {
        return Admission::Rejected(format!(
            "leverage {}x exceeds max {}x",
            req.leverage, limits.max_leverage
        ));
    }
    if !req.size_pct.is_finite() || req.size_pct <= 0.0 {
        return Admission::Rejected(format!("invalid size {}%", req.size_pct));
    }

    if req.size_pct > limits.max_size_pct {
        Admission::Approved { size_pct: limits.max_size_pct, clamped: true }
    } else {
        Admission::Approved { size_pct: req.size_pct, clamped: false }
    }
}

// ─── Internal State ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct RiskInner {
    limits:               RiskLimits,
    is_halted:            bool,
    halt_reason:          Option<String>,
    consecutive_failures: u32,
    last_failure_at:      Option<DateTime<Utc>>,
}

// ─── Status (for API) ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RiskStatus {
    pub is_halted:                bool,
    pub halt_reason:              Option<String>,
    pub consecutive_failures:     u32,
    pub max_consecutive_failures: u32,
    pub last_failure_at:          Option<DateTime<Utc>>,
    pub admissions_evaluated:     u64,
    pub limits:                   RiskLimits,
}

// ─── Risk Manager ─────────────────────────────────────────────────────────────

pub struct RiskManager {
    inner:                    Arc<RwLock<RiskInner>>,
    max_consecutive_failures: u32,
    admissions_evaluated:     AtomicU64,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, max_consecutive_failures: u32) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RiskInner {
                limits,
                is_halted:            false,
                halt_reason:          None,
                consecutive_failures: 0,
                last_failure_at:      None,
            })),
            max_consecutive_failures,
            admissions_evaluated: AtomicU64::new(0),
        }
    }

    // ─── Limits ───────────────────────────────────────────────────────────────

    /// Per-cycle snapshot. Callers keep using their copy even if limits change.
    pub async fn limits(&self) -> RiskLimits {
        self.inner.read().await.limits
    }

    pub async fn set_limits(&self, limits: RiskLimits) -> Result<(), String> {
        limits.validate()?;
        let mut inner = self.inner.write().await;
        inner.limits = limits;
        info!(
            max_positions = limits.max_positions,
            max_leverage  = limits.max_leverage,
            max_size_pct  = limits.max_size_pct,
            "🛡️ Risk limits replaced"
        );
        Ok(())
    }

    /// Admission against a fresh count, counted for observability.
    pub fn evaluate(&self, req: &AdmissionRequest, open_count: usize, limits: &RiskLimits) -> Admission {
        self.admissions_evaluated.fetch_add(1, Ordering::Relaxed);
        admit(req, open_count, limits)
    }

    pub fn admissions_evaluated(&self) -> u64 {
        self.admissions_evaluated.load(Ordering::Relaxed)
    }

    // ─── Halt switch ──────────────────────────────────────────────────────────

    /// `Some(reason)` while halted.
    pub async fn halted(&self) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .is_halted
            .then(|| inner.halt_reason.clone().unwrap_or_else(|| "manual activation".into()))
    }

    /// Returns `true` if this call flipped the switch.
    pub async fn kill(&self, reason: &str) -> bool {
        let mut inner = self.inner.write().await;
        let was_halted = inner.is_halted;
        inner.is_halted   = true;
        inner.halt_reason = Some(reason.to_string());
        warn!(reason, "⛔ TRADING HALTED");
        !was_halted
    }

    pub async fn rearm(&self) {
        let mut inner = self.inner.write().await;
        inner.is_halted            = false;
        inner.halt_reason          = None;
        inner.consecutive_failures = 0;
        inner.last_failure_at      = None;
        info!("✅ Trading re-armed");
    }

    // ─── Execution results ────────────────────────────────────────────────────

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        let prev = inner.consecutive_failures;
        inner.consecutive_failures = 0;
        if prev > 0 {
            info!("Risk: consecutive_failures reset (was {prev})");
        }
    }

    /// Returns the halt reason if this failure tripped the auto-halt.
    pub async fn record_failure(&self) -> Option<String> {
        let mut inner = self.inner.write().await;
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(Utc::now());
        warn!(
            consecutive = inner.consecutive_failures,
            max         = self.max_consecutive_failures,
            "⚠️ Risk: execution failure recorded"
        );

        if self.max_consecutive_failures > 0
            && !inner.is_halted
            && inner.consecutive_failures >= self.max_consecutive_failures
        {
            let reason = format!(
                "Auto-halt: {} consecutive execution failures",
                inner.consecutive_failures
            );
            inner.is_halted   = true;
            inner.halt_reason = Some(reason.clone());
            warn!("⛔ Risk auto-halt activated: {reason}");
            return Some(reason);
        }
        None
    }

    pub async fn status(&self) -> RiskStatus {
        let inner = self.inner.read().await;
        RiskStatus {
            is_halted:                inner.is_halted,
            halt_reason:              inner.halt_reason.clone(),
            consecutive_failures:     inner.consecutive_failures,
            max_consecutive_failures: self.max_consecutive_failures,
            last_failure_at:          inner.last_failure_at,
            admissions_evaluated:     self.admissions_evaluated(),
            limits:                   inner.limits,
        }
    }
}
