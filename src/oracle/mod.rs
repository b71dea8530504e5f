//! # oracle — Decision Oracle Adapter
//!
//! Batches every eligible [`AnalysisBundle`] of a cycle into **one** oracle
//! request and turns the answer into one [`TradeIntent`] per bundle.
//!
//! Everything that goes wrong pushes towards inaction:
//! - oracle down, timed out or unparseable → every intent is `NONE`
//! - symbol missing from the verdicts      → `NONE`
//! - confidence below `min_confidence`     → `NONE`, whatever the direction

pub mod http;
pub mod llm;
pub mod prompt;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::OracleError;
use crate::insights::PerformanceInsights;
use crate::models::{AnalysisBundle, Direction, Symbol, TradeIntent};

pub use http::HttpOracle;
pub use llm::LlmOracle;

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum OracleBackend {
    /// Remote decision service: POST the batch, get verdicts back.
    Http { url: String },
    Claude { api_key: String },
    OpenAi { api_key: String },
}

impl std::fmt::Display for OracleBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleBackend::Http { url } => write!(f, "http ({url})"),
            OracleBackend::Claude { .. } => write!(f, "Claude"),
            OracleBackend::OpenAi { .. } => write!(f, "OpenAI"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub backend: OracleBackend,
    pub timeout: Duration,
}

/// Build the configured back-end.
pub fn build_oracle(config: &OracleConfig, client: reqwest::Client) -> Arc<dyn DecisionOracle> {
    match &config.backend {
        OracleBackend::Http { url } => Arc::new(HttpOracle::new(client, url.clone())),
        OracleBackend::Claude { api_key } => Arc::new(LlmOracle::claude(client, api_key.clone())),
        OracleBackend::OpenAi { api_key } => Arc::new(LlmOracle::openai(client, api_key.clone())),
    }
}

// ─── Request / Verdict ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DecisionRequest {
    pub cycle_id: Uuid,
    pub bundles:  Vec<AnalysisBundle>,
    /// Advisory only.
    pub insights: PerformanceInsights,
    /// Symbols currently held, so the oracle can weigh exposure.
    pub open_positions: Vec<Symbol>,
}

/// One symbol's answer, normalised from whatever spelling the oracle used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub symbol:        Symbol,
    pub direction:     Direction,
    pub confidence:    f64,
    pub leverage:      Option<u32>,
    pub size_fraction: Option<f64>,
    pub rationale:     String,
}

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<Vec<Verdict>, OracleError>;
}

// ─── Adapter ──────────────────────────────────────────────────────────────────

/// Used when a verdict names a direction but no leverage.
const FALLBACK_LEVERAGE: u32 = 1;

pub struct DecisionAdapter {
    oracle:         Arc<dyn DecisionOracle>,
    min_confidence: f64,
    timeout:        Duration,
}

impl DecisionAdapter {
    pub fn new(oracle: Arc<dyn DecisionOracle>, min_confidence: f64, timeout: Duration) -> Self {
        Self { oracle, min_confidence, timeout }
    }

    /// One intent per bundle, in bundle order. No bundles → no oracle call.
    pub async fn decide(
        &self,
        cycle_id: Uuid,
        bundles: Vec<AnalysisBundle>,
        insights: PerformanceInsights,
        open_positions: Vec<Symbol>,
    ) -> Vec<TradeIntent> {
        if bundles.is_empty() {
            return Vec::new();
        }

        let symbols: Vec<Symbol> = bundles.iter().map(|b| b.symbol.clone()).collect();
        let request = DecisionRequest { cycle_id, bundles, insights, open_positions };

        let outcome = match tokio::time::timeout(self.timeout, self.oracle.decide(&request)).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout),
        };

        let verdicts = match outcome {
            Ok(verdicts) => verdicts,
            Err(e) => {
                warn!(%cycle_id, error = %e, symbols = symbols.len(), "🧠 oracle failed, every intent is NONE");
                let reason = format!("oracle unavailable: {e}");
                return symbols
                    .into_iter()
                    .map(|s| TradeIntent::no_trade(s, reason.clone()))
                    .collect();
            }
        };

        let mut by_symbol: HashMap<Symbol, Verdict> = HashMap::with_capacity(verdicts.len());
        for verdict in verdicts {
            by_symbol.insert(verdict.symbol.clone(), verdict);
        }

        let intents: Vec<TradeIntent> = symbols
            .into_iter()
            .map(|symbol| match by_symbol.remove(&symbol) {
                Some(verdict) => self.to_intent(verdict),
                None => TradeIntent::no_trade(symbol, "no verdict from oracle"),
            })
            .collect();

        info!(
            %cycle_id,
            intents    = intents.len(),
            actionable = intents.iter().filter(|i| i.is_actionable()).count(),
            "🧠 oracle verdicts parsed"
        );
        intents
    }

    fn to_intent(&self, verdict: Verdict) -> TradeIntent {
        let confidence = if verdict.confidence.is_finite() {
            verdict.confidence.clamp(0.0, 100.0)
        } else {
            0.0
        };

        // Accept both 0.15 and 15 for "15 % of free balance".
        let size_fraction = match verdict.size_fraction {
            Some(f) if f.is_finite() && f > 1.0 => (f / 100.0).min(1.0),
            Some(f) if f.is_finite() && f > 0.0 => f,
            _ => 0.0,
        };

        let (direction, rationale) = if verdict.direction != Direction::NoTrade && confidence < self.min_confidence {
            (
                Direction::NoTrade,
                format!(
                    "confidence {confidence:.0} below minimum {:.0}: {}",
                    self.min_confidence, verdict.rationale
                ),
            )
        } else {
            (verdict.direction, verdict.rationale)
        };

        TradeIntent {
            intent_id: Uuid::new_v4(),
            symbol: verdict.symbol,
            direction,
            confidence,
            leverage: verdict.leverage.unwrap_or(FALLBACK_LEVERAGE),
            size_fraction,
            rationale,
            created_at: Utc::now(),
        }
    }
}
