//! # engine::trailing — Trailing-stop state machine
//!
//! ```text
//!            pnl ≥ activation              tighter stop
//!  Inactive ─────────────────▶ Armed ───────────────────▶ Trailing ─┐
//!                               │                           ▲   │   │ tighter
//!                               │ mark crosses stop         └───┼───┘
//!                               ▼                               │
//!                             Close ◀───────────────────────────┘
//! ```
//!
//! The stop for a given PnL sits `callback_pct` behind it:
//! `entry × (1 ± (pnl% − callback%)/100)` (+ LONG, − SHORT).
//! Once armed the stop only ever moves in the favourable direction.

use serde::{Deserialize, Serialize};

use crate::models::{Side, TrailingState};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingConfig {
    pub enabled:        bool,
    pub activation_pct: f64,
    pub callback_pct:   f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrailingAction {
    Hold,
    Armed { stop: f64 },
    Ratcheted { from: f64, to: f64 },
    /// Mark crossed the stop: take profit.
    Close { stop: f64 },
}

/// Relative slack so a mark sitting exactly on the stop counts as crossed.
const CROSS_EPSILON: f64 = 1e-9;

fn stop_for(side: Side, entry: f64, pnl_pct: f64, callback_pct: f64) -> f64 {
    entry * (1.0 + side.sign() * (pnl_pct - callback_pct) / 100.0)
}

fn crossed(side: Side, mark: f64, stop: f64) -> bool {
    let slack = stop.abs() * CROSS_EPSILON;
    match side {
        Side::Long => mark <= stop + slack,
        Side::Short => mark >= stop - slack,
    }
}

fn tighter(side: Side, candidate: f64, current: f64) -> bool {
    match side {
        Side::Long => candidate > current,
        Side::Short => candidate < current,
    }
}

/// Advance the state machine for one mark. Pure.
pub fn evaluate(
    state: TrailingState,
    side: Side,
    entry: f64,
    mark: f64,
    cfg: &TrailingConfig,
) -> (TrailingState, TrailingAction) {
    if !cfg.enabled || entry <= 0.0 || !mark.is_finite() {
        return (state, TrailingAction::Hold);
    }

    let pnl_pct = side.sign() * (mark - entry) / entry * 100.0;

    match state {
        TrailingState::Inactive => {
            if pnl_pct >= cfg.activation_pct {
                let stop = stop_for(side, entry, pnl_pct, cfg.callback_pct);
                (TrailingState::Armed { activation_price: mark, stop }, TrailingAction::Armed { stop })
            } else {
                (state, TrailingAction::Hold)
            }
        }
        TrailingState::Armed { stop, .. } | TrailingState::Trailing { stop } => {
            if crossed(side, mark, stop) {
                return (state, TrailingAction::Close { stop });
            }
            let candidate = stop_for(side, entry, pnl_pct, cfg.callback_pct);
            if tighter(side, candidate, stop) {
                (
                    TrailingState::Trailing { stop: candidate },
                    TrailingAction::Ratcheted { from: stop, to: candidate },
                )
            } else {
                (state, TrailingAction::Hold)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn cfg() -> TrailingConfig {
        TrailingConfig { enabled: true, activation_pct: 1.8, callback_pct: 1.0 }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_arms_at_activation_and_closes_on_retreat() {
        let entry = 65_000.0;

        // +1.5 %: below activation
        let (state, action) = evaluate(TrailingState::Inactive, Side::Long, entry, entry * 1.015, &cfg());
        assert_eq!(action, TrailingAction::Hold);
        assert_eq!(state, TrailingState::Inactive);

        // +2.0 %: arms at entry × 1.01
        let (state, action) = evaluate(state, Side::Long, entry, entry * 1.02, &cfg());
        let TrailingAction::Armed { stop } = action else { panic!("expected Armed, got {action:?}") };
        assert!(approx(stop, entry * 1.01));

        // retreat to +1.5 %: still above the stop
        let (state, action) = evaluate(state, Side::Long, entry, entry * 1.015, &cfg());
        assert_eq!(action, TrailingAction::Hold);

        // retreat to +1.0 %: closes at the armed stop
        let (_, action) = evaluate(state, Side::Long, entry, entry * 1.01, &cfg());
        assert!(matches!(action, TrailingAction::Close { stop } if approx(stop, entry * 1.01)));
    }

    #[test]
    fn test_short_side_mirrors() {
        let entry = 100.0;
        let (state, action) = evaluate(TrailingState::Inactive, Side::Short, entry, 97.5, &cfg());
        let TrailingAction::Armed { stop } = action else { panic!("expected Armed") };
        assert!(approx(stop, 98.5));

        let (state, action) = evaluate(state, Side::Short, entry, 96.0, &cfg());
        assert!(matches!(action, TrailingAction::Ratcheted { to, .. } if approx(to, 97.0)));

        let (_, action) = evaluate(state, Side::Short, entry, 97.2, &cfg());
        assert!(matches!(action, TrailingAction::Close { .. }));
    }

    #[test]
    fn test_stop_never_loosens() {
        let entry = 200.0;
        let marks = [204.0, 206.5, 205.0, 209.0, 207.8, 211.0, 210.2, 212.5, 211.9];
        let mut state = TrailingState::Inactive;
        let mut last_stop = f64::MIN;

        for mark in marks {
            let (next, action) = evaluate(state, Side::Long, entry, mark, &cfg());
            if let TrailingAction::Close { .. } = action {
                break;
            }
            if let Some(stop) = next.stop() {
                assert!(stop >= last_stop, "stop loosened: {last_stop} -> {stop}");
                last_stop = stop;
            }
            state = next;
        }
        assert!(last_stop > entry);
    }

    #[test]
    fn test_disabled_is_inert() {
        let off = TrailingConfig { enabled: false, ..cfg() };
        let (state, action) = evaluate(TrailingState::Inactive, Side::Long, 100.0, 150.0, &off);
        assert_eq!(state, TrailingState::Inactive);
        assert_eq!(action, TrailingAction::Hold);
    }

    proptest! {
        #[test]
        fn test_armed_stop_never_loosens_on_random_walks(
            entry in 10.0..500.0_f64,
            long in any::<bool>(),
            steps in prop::collection::vec(-2.5..2.5_f64, 1..80),
        ) {
            let side = if long { Side::Long } else { Side::Short };
            let mut state = TrailingState::Inactive;
            let mut mark = entry;

            for step in steps {
                mark *= 1.0 + step / 100.0;
                let (next, action) = evaluate(state, side, entry, mark, &cfg());
                if let TrailingAction::Close { stop } = action {
                    prop_assert_eq!(Some(stop), state.stop());
                    break;
                }
                if let (Some(before), Some(after)) = (state.stop(), next.stop()) {
                    match side {
                        Side::Long => prop_assert!(after >= before, "long stop loosened: {} -> {}", before, after),
                        Side::Short => prop_assert!(after <= before, "short stop loosened: {} -> {}", before, after),
                    }
                }
                if state.stop().is_some() {
                    prop_assert!(next.stop().is_some());
                }
                state = next;
            }
        }
    }
}
