//! # engine::scanner — Scan Aggregator
//!
//! Fan-out to every configured agent for every candidate symbol, fan-in into
//! one [`AnalysisBundle`] per symbol.
//!
//! ```text
//!  candidates ──┬─▶ technical ─┐
//!               ├─▶ fibonacci ─┤   (bounded by a semaphore)
//!               ├─▶ gann      ─┼─▶ merge ─▶ eligible bundles, symbol order
//!               └─▶ sentiment ─┘
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::engine::agent_client::{AgentCaller, AgentEndpoint};
use crate::engine::store::PositionStore;
use crate::models::{AnalysisBundle, AnalysisResult, Symbol};

// ─── Candidates ───────────────────────────────────────────────────────────────

/// Configured symbols that are flat and not blocked (mid-reverse or in a
/// re-entry cooldown), in configuration order, truncated to `free_slots`.
pub fn select_candidates(
    symbols: &[Symbol],
    open: &HashSet<Symbol>,
    blocked: &HashSet<Symbol>,
    free_slots: usize,
) -> Vec<Symbol> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .filter(|s| !open.contains(*s) && !blocked.contains(*s))
        .filter(|s| seen.insert((*s).clone()))
        .take(free_slots)
        .cloned()
        .collect()
}

pub async fn candidates_from_store(store: &PositionStore, symbols: &[Symbol], free_slots: usize) -> Vec<Symbol> {
    let open: HashSet<Symbol> = store.snapshot().await.into_iter().map(|p| p.symbol).collect();
    let mut blocked: HashSet<Symbol> = store.reversing_symbols().into_iter().collect();
    blocked.extend(store.cooling_symbols());
    select_candidates(symbols, &open, &blocked, free_slots)
}

// ─── Merge ────────────────────────────────────────────────────────────────────

/// Group results by symbol, drop bundles without a single success.
pub fn merge(results: Vec<AnalysisResult>) -> Vec<AnalysisBundle> {
    let mut bundles: BTreeMap<Symbol, AnalysisBundle> = BTreeMap::new();
    for result in results {
        bundles
            .entry(result.symbol.clone())
            .or_insert_with(|| AnalysisBundle::new(result.symbol.clone()))
            .insert(result);
    }

    bundles
        .into_values()
        .filter(|bundle| {
            if !bundle.is_eligible() {
                warn!(symbol = %bundle.symbol, "🕳️ no agent answered, symbol dropped from cycle");
            }
            bundle.is_eligible()
        })
        .collect()
}

// ─── Aggregator ───────────────────────────────────────────────────────────────

pub struct ScanAggregator {
    caller:      Arc<dyn AgentCaller>,
    agents:      Arc<Vec<AgentEndpoint>>,
    timeout:     Duration,
    concurrency: usize,
}

impl ScanAggregator {
    pub fn new(caller: Arc<dyn AgentCaller>, agents: Vec<AgentEndpoint>, timeout: Duration, concurrency: usize) -> Self {
        Self { caller, agents: Arc::new(agents), timeout, concurrency: concurrency.max(1) }
    }

    /// Every agent × every symbol, concurrently under the ceiling.
    pub async fn scan(&self, symbols: &[Symbol]) -> Vec<AnalysisBundle> {
        if symbols.is_empty() || self.agents.is_empty() {
            return Vec::new();
        }

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut calls = JoinSet::new();

        for symbol in symbols {
            for index in 0..self.agents.len() {
                let caller  = Arc::clone(&self.caller);
                let agents  = Arc::clone(&self.agents);
                let permits = Arc::clone(&permits);
                let symbol  = symbol.clone();
                let timeout = self.timeout;

                calls.spawn(async move {
                    // closed only if the semaphore is dropped, which it is not while we await
                    let _permit = permits.acquire_owned().await.ok();
                    caller.call(&agents[index], &symbol, timeout).await
                });
            }
        }

        let mut results = Vec::with_capacity(symbols.len() * self.agents.len());
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "💥 agent call task panicked; result discarded"),
            }
        }

        let bundles = merge(results);
        info!(
            candidates = symbols.len(),
            eligible   = bundles.len(),
            agents     = self.agents.len(),
            "🔭 scan merged"
        );
        bundles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentKind, FailureKind};
    use crate::testkit::{ok_result, FakeAgentCaller};

    fn symbols(names: &[&str]) -> Vec<Symbol> {
        names.iter().map(|s| Symbol::new(s)).collect()
    }

    #[test]
    fn test_candidates_skip_open_and_reversing_then_truncate() {
        let configured = symbols(&["BTCUSDT", "ETHUSDT", "SOLUSDT", "XRPUSDT", "ETHUSDT"]);
        let open: HashSet<Symbol> = symbols(&["BTCUSDT"]).into_iter().collect();
        let reversing: HashSet<Symbol> = symbols(&["SOLUSDT"]).into_iter().collect();

        assert_eq!(select_candidates(&configured, &open, &reversing, 5), symbols(&["ETHUSDT", "XRPUSDT"]));
        assert_eq!(select_candidates(&configured, &open, &reversing, 1), symbols(&["ETHUSDT"]));
        assert!(select_candidates(&configured, &open, &reversing, 0).is_empty());
    }

    #[tokio::test]
    async fn test_candidates_skip_cooling_symbols() {
        let store = PositionStore::new();
        let until = std::time::Instant::now() + Duration::from_secs(60);
        store.start_cooldown(&"ETHUSDT".into(), crate::models::Side::Short, until);

        let configured = symbols(&["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
        assert_eq!(candidates_from_store(&store, &configured, 3).await, symbols(&["BTCUSDT", "SOLUSDT"]));
    }

    #[test]
    fn test_zero_success_bundle_dropped() {
        let results = vec![
            AnalysisResult::failure("gann", AgentKind::Gann, "BTCUSDT".into(), FailureKind::Transport, "timeout"),
            AnalysisResult::failure("technical", AgentKind::Technical, "BTCUSDT".into(), FailureKind::Validation, "bad"),
            ok_result(AgentKind::Sentiment, "ETHUSDT"),
            AnalysisResult::failure("gann", AgentKind::Gann, "ETHUSDT".into(), FailureKind::Transport, "timeout"),
        ];
        let bundles = merge(results);
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].symbol, Symbol::new("ETHUSDT"));
        assert_eq!(bundles[0].success_count(), 1);
    }

    #[test]
    fn test_bundles_in_symbol_order() {
        let results = vec![
            ok_result(AgentKind::Sentiment, "SOLUSDT"),
            ok_result(AgentKind::Sentiment, "ADAUSDT"),
            ok_result(AgentKind::Sentiment, "ETHUSDT"),
        ];
        let order: Vec<String> = merge(results).into_iter().map(|b| b.symbol.to_string()).collect();
        assert_eq!(order, vec!["ADAUSDT", "ETHUSDT", "SOLUSDT"]);
    }

    #[tokio::test]
    async fn test_scan_tolerates_partial_failure() {
        let caller = Arc::new(FakeAgentCaller::new().failing_kind(AgentKind::Gann));
        let agents = vec![
            AgentEndpoint::new(AgentKind::Gann, "http://gann"),
            AgentEndpoint::new(AgentKind::Sentiment, "http://sentiment"),
        ];
        let aggregator = ScanAggregator::new(caller.clone(), agents, Duration::from_secs(1), 2);

        let bundles = aggregator.scan(&symbols(&["BTCUSDT", "ETHUSDT"])).await;
        assert_eq!(bundles.len(), 2);
        assert!(bundles.iter().all(|b| b.results.len() == 2 && b.success_count() == 1));
        assert_eq!(caller.calls(), 4);
    }

    #[tokio::test]
    async fn test_scan_respects_concurrency_ceiling() {
        let caller = Arc::new(FakeAgentCaller::new().with_delay(Duration::from_millis(20)));
        let agents = vec![
            AgentEndpoint::new(AgentKind::Gann, "http://gann"),
            AgentEndpoint::new(AgentKind::Sentiment, "http://sentiment"),
        ];
        let aggregator = ScanAggregator::new(caller.clone(), agents, Duration::from_secs(1), 3);

        aggregator.scan(&symbols(&["A1USDT", "A2USDT", "A3USDT", "A4USDT"])).await;
        assert_eq!(caller.calls(), 8);
        assert!(caller.max_in_flight() <= 3);
    }
}
