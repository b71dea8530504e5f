//! # engine::store — Position Store
//!
//! Process-wide authoritative view of open positions, keyed by symbol. The
//! only owner of mutation rights: callers get clones, never references.
//!
//! ## Locks
//! - **Symbol lock** (`lock_symbol`): serialises every mutation of one
//!   symbol's position. Held across the gateway call that justifies the
//!   mutation.
//! - **Admission lock** (`admission`): serialises opens and reopens so that
//!   the open-count check and the insert are atomic with respect to each other.
//!
//! Lock order is always symbol lock → admission lock.
//!
//! The `reversing` marker lives outside the position map because a reverse
//! removes the record between close and reopen; the marker must survive that
//! gap so scan opens stay out.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::gateway::ExchangePosition;
use crate::models::{Position, PositionOrigin, ReverseState, Side, Symbol};

pub type SymbolGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct PositionStore {
    positions:       RwLock<HashMap<Symbol, Position>>,
    symbol_locks:    Mutex<HashMap<Symbol, Arc<AsyncMutex<()>>>>,
    admission:       AsyncMutex<()>,
    reversing:       Mutex<HashSet<Symbol>>,
    recently_closed: Mutex<HashMap<Symbol, DateTime<Utc>>>,
    /// Re-entry blocked per (symbol, side) until the stored instant.
    cooldowns:       Mutex<HashMap<(Symbol, Side), Instant>>,
}

/// Result of one reconciliation pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileReport {
    /// Exchange positions the store did not know about, now recorded.
    pub adopted: Vec<Position>,
    /// Records the exchange no longer reports, now removed.
    pub dropped: Vec<Position>,
    /// Symbols skipped because they were busy or mid-reverse.
    pub skipped: Vec<Symbol>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Locks ────────────────────────────────────────────────────────────────

    fn symbol_mutex(&self, symbol: &Symbol) -> Arc<AsyncMutex<()>> {
        let mut locks = self.symbol_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(symbol.clone()).or_default().clone()
    }

    pub async fn lock_symbol(&self, symbol: &Symbol) -> SymbolGuard {
        self.symbol_mutex(symbol).lock_owned().await
    }

    /// Non-blocking variant for the monitor: a busy symbol is skipped, not queued.
    pub fn try_lock_symbol(&self, symbol: &Symbol) -> Option<SymbolGuard> {
        self.symbol_mutex(symbol).try_lock_owned().ok()
    }

    /// Take while holding the symbol lock, never the other way round.
    pub async fn admission(&self) -> MutexGuard<'_, ()> {
        self.admission.lock().await
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    fn overlay(&self, mut position: Position) -> Position {
        position.reverse = if self.is_reversing(&position.symbol) {
            ReverseState::Reversing
        } else {
            ReverseState::Idle
        };
        position
    }

    pub async fn get(&self, symbol: &Symbol) -> Option<Position> {
        let positions = self.positions.read().await;
        positions.get(symbol).cloned().map(|p| self.overlay(p))
    }

    /// All positions, ordered by symbol.
    pub async fn snapshot(&self) -> Vec<Position> {
        let positions = self.positions.read().await;
        let mut all: Vec<Position> = positions.values().cloned().map(|p| self.overlay(p)).collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    pub async fn count(&self) -> usize {
        self.positions.read().await.len()
    }

    pub async fn contains(&self, symbol: &Symbol) -> bool {
        self.positions.read().await.contains_key(symbol)
    }

    /// Insert only if the symbol is flat. Hands the position back otherwise.
    pub async fn insert_new(&self, position: Position) -> Result<(), Position> {
        let mut positions = self.positions.write().await;
        if positions.contains_key(&position.symbol) {
            return Err(position);
        }
        debug!(symbol = %position.symbol, side = %position.side, "store: position recorded");
        positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    /// Mutate in place; returns the updated clone, `None` if flat.
    pub async fn update<F>(&self, symbol: &Symbol, mutate: F) -> Option<Position>
    where
        F: FnOnce(&mut Position),
    {
        let mut positions = self.positions.write().await;
        let position = positions.get_mut(symbol)?;
        mutate(position);
        Some(position.clone())
    }

    pub async fn remove(&self, symbol: &Symbol) -> Option<Position> {
        let removed = self.positions.write().await.remove(symbol);
        if removed.is_some() {
            self.recently_closed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(symbol.clone(), Utc::now());
        }
        removed
    }

    fn closed_after(&self, symbol: &Symbol, instant: DateTime<Utc>) -> bool {
        self.recently_closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .is_some_and(|closed_at| *closed_at >= instant)
    }

    // ─── Reverse marker ───────────────────────────────────────────────────────

    pub fn is_reversing(&self, symbol: &Symbol) -> bool {
        self.reversing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(symbol)
    }

    /// Mark `symbol` as reversing. `None` if it already is. The marker is
    /// released when the returned guard drops, on every exit path.
    pub fn begin_reverse(self: &Arc<Self>, symbol: &Symbol) -> Option<ReverseMarker> {
        let inserted = self
            .reversing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(symbol.clone());
        inserted.then(|| ReverseMarker { store: Arc::clone(self), symbol: symbol.clone() })
    }

    pub fn reversing_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self
            .reversing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        symbols.sort();
        symbols
    }

    // ─── Re-entry cooldown ─────────────────────────────────────────────────────

    pub fn start_cooldown(&self, symbol: &Symbol, side: Side, until: Instant) {
        self.cooldowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((symbol.clone(), side), until);
    }

    pub fn in_cooldown(&self, symbol: &Symbol, side: Side) -> bool {
        self.cooldowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(symbol.clone(), side))
            .is_some_and(|until| Instant::now() < *until)
    }

    /// Symbols with at least one side still cooling. Expired entries are pruned.
    pub fn cooling_symbols(&self) -> HashSet<Symbol> {
        let now = Instant::now();
        let mut cooldowns = self.cooldowns.lock().unwrap_or_else(PoisonError::into_inner);
        cooldowns.retain(|_, until| now < *until);
        cooldowns.keys().map(|(symbol, _)| symbol.clone()).collect()
    }

    // ─── Reconciliation ───────────────────────────────────────────────────────

    /// Forget close times no read at or after `observed_at` can consult, and
    /// lock entries for flat symbols nobody holds.
    async fn prune(&self, observed_at: DateTime<Utc>) {
        self.recently_closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, closed_at| *closed_at >= observed_at);

        let positions = self.positions.read().await;
        let mut locks = self.symbol_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|symbol, lock| positions.contains_key(symbol) || Arc::strong_count(lock) > 1);
    }

    /// Align the store with a gateway read that started at `observed_at`.
    ///
    /// Symbols whose lock is busy or that are mid-reverse are skipped: their
    /// state is in flux and the read may predate it. A record opened after
    /// `observed_at` is never dropped, and a symbol closed after it is never
    /// adopted back.
    pub async fn reconcile(&self, live: &[ExchangePosition], observed_at: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        self.prune(observed_at).await;
        let live_by_symbol: HashMap<&Symbol, &ExchangePosition> =
            live.iter().map(|p| (&p.symbol, p)).collect();

        // ── Drop records the exchange no longer reports ──────────────────────
        let known: Vec<Symbol> = self.positions.read().await.keys().cloned().collect();
        for symbol in known.iter().filter(|s| !live_by_symbol.contains_key(s)) {
            if self.is_reversing(symbol) {
                report.skipped.push(symbol.clone());
                continue;
            }
            let Some(_guard) = self.try_lock_symbol(symbol) else {
                report.skipped.push(symbol.clone());
                continue;
            };
            let stale = {
                let mut positions = self.positions.write().await;
                let predates_read = positions.get(symbol).is_some_and(|p| p.opened_at < observed_at);
                if predates_read { positions.remove(symbol) } else { None }
            };
            if let Some(dropped) = stale {
                self.recently_closed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(symbol.clone(), Utc::now());
                warn!(symbol = %symbol, "🔍 exchange no longer reports position, record dropped");
                report.dropped.push(dropped);
            }
        }

        // ── Adopt exchange positions the store does not know ─────────────────
        for live_position in live {
            let symbol = &live_position.symbol;
            if self.contains(symbol).await {
                continue;
            }
            if self.is_reversing(symbol) || self.closed_after(symbol, observed_at) {
                report.skipped.push(symbol.clone());
                continue;
            }
            let Some(_guard) = self.try_lock_symbol(symbol) else {
                report.skipped.push(symbol.clone());
                continue;
            };

            let mut adopted = Position::new(
                symbol.clone(),
                live_position.side,
                live_position.entry_price,
                live_position.notional,
                live_position.leverage,
                PositionOrigin::Adopted,
            );
            adopted.opened_at = observed_at;
            if let Some(mark) = live_position.mark_price {
                adopted.mark_to(mark);
            }

            let _admission = self.admission().await;
            if self.insert_new(adopted.clone()).await.is_ok() {
                info!(symbol = %symbol, side = %adopted.side, "🔍 adopted exchange position");
                report.adopted.push(adopted);
            }
        }

        report
    }
}

// ─── Reverse marker guard ─────────────────────────────────────────────────────

/// Holds a symbol in the `reversing` state until dropped.
pub struct ReverseMarker {
    store:  Arc<PositionStore>,
    symbol: Symbol,
}

impl ReverseMarker {
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }
}

impl Drop for ReverseMarker {
    fn drop(&mut self) {
        self.store
            .reversing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.symbol);
    }
}
