//! # insights — learning-agent collaborator
//!
//! Two narrow capabilities backed by the same service:
//! - [`InsightSource`]: per-symbol historical performance, advisory input to
//!   the oracle batch. Failure yields empty insights, never an error.
//! - [`TradeRecorder`]: every confirmed close is forwarded best-effort so the
//!   learning agent can grow its history.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::models::{ClosedPosition, Symbol};

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolPerformance {
    #[serde(default)]
    pub has_data:        bool,
    #[serde(default)]
    pub total_trades:    u32,
    #[serde(default)]
    pub win_rate:        f64,
    #[serde(default, alias = "avg_pnl_percentage")]
    pub avg_pnl_pct:     f64,
    #[serde(default)]
    pub reversed_count:  u32,
    #[serde(default)]
    pub recommendation:  Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_preference: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceInsights {
    pub by_symbol:              BTreeMap<Symbol, SymbolPerformance>,
    pub overall_recommendation: Option<String>,
}

impl PerformanceInsights {
    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty() && self.overall_recommendation.is_none()
    }
}

#[async_trait]
pub trait InsightSource: Send + Sync {
    async fn insights(&self, symbols: &[Symbol]) -> PerformanceInsights;
}

#[async_trait]
pub trait TradeRecorder: Send + Sync {
    async fn record(&self, closed: &ClosedPosition);
}

// ─── Learning agent client ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    symbols_analysis:       BTreeMap<Symbol, SymbolEntry>,
    #[serde(default)]
    overall_recommendation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SymbolEntry {
    #[serde(default)]
    performance:     SymbolPerformance,
    #[serde(default)]
    side_preference: Option<Value>,
}

pub struct LearningClient {
    client:   reqwest::Client,
    base_url: Option<String>,
    timeout:  Duration,
}

impl LearningClient {
    /// `base_url = None` turns both capabilities into no-ops.
    pub fn new(client: reqwest::Client, base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            timeout,
        }
    }

    async fn fetch(&self, base: &str, symbols: &[Symbol]) -> Result<PerformanceInsights, String> {
        let response = self
            .client
            .post(format!("{base}/analyze_symbols"))
            .json(&json!({ "symbols": symbols, "days": 30 }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let body: AnalyzeResponse = response.json().await.map_err(|e| e.to_string())?;

        Ok(PerformanceInsights {
            by_symbol: body
                .symbols_analysis
                .into_iter()
                .map(|(symbol, entry)| {
                    let mut perf = entry.performance;
                    perf.side_preference = entry.side_preference;
                    (symbol, perf)
                })
                .collect(),
            overall_recommendation: body.overall_recommendation,
        })
    }
}

#[async_trait]
impl InsightSource for LearningClient {
    async fn insights(&self, symbols: &[Symbol]) -> PerformanceInsights {
        let Some(base) = self.base_url.as_deref() else {
            return PerformanceInsights::default();
        };
        if symbols.is_empty() {
            return PerformanceInsights::default();
        }
        match self.fetch(base, symbols).await {
            Ok(insights) => {
                debug!(symbols = insights.by_symbol.len(), "📚 learning insights loaded");
                insights
            }
            Err(e) => {
                warn!(error = %e, "⚠️ learning insights unavailable, continuing without");
                PerformanceInsights::default()
            }
        }
    }
}

#[async_trait]
impl TradeRecorder for LearningClient {
    async fn record(&self, closed: &ClosedPosition) {
        let Some(base) = self.base_url.as_deref() else { return };

        let body = json!({
            "timestamp":        closed.closed_at,
            "symbol":           closed.symbol,
            "side":             closed.side.as_str().to_lowercase(),
            "entry_price":      closed.entry_price,
            "exit_price":       closed.exit_price,
            "pnl_pct":          closed.roi_pct,
            "leverage":         closed.leverage,
            "size":             closed.size,
            "duration_minutes": closed.duration_secs / 60,
            "market_conditions": { "close_reason": closed.reason },
        });

        let result = self
            .client
            .post(format!("{base}/record_trade"))
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(symbol = %closed.symbol, pnl_pct = closed.roi_pct, "📚 trade recorded for learning");
            }
            Ok(resp) => warn!(symbol = %closed.symbol, status = %resp.status(), "⚠️ learning agent refused trade record"),
            Err(e) => warn!(symbol = %closed.symbol, error = %e, "⚠️ failed to record trade for learning"),
        }
    }
}
