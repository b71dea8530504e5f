//! # models::analysis
//!
//! What the analysis agents say about a symbol in one scan cycle.
//!
//! Every agent answers with its own JSON shape. Instead of passing those
//! around as open dictionaries, each kind is parsed into a typed report and
//! wrapped in the closed [`AgentPayload`] union. Anything that does not parse
//! becomes [`AgentPayload::Unparseable`] and the result is marked failed.
//!
//! ```text
//!  Agent Client ──▶ AnalysisResult ─┐
//!  Agent Client ──▶ AnalysisResult ─┼─▶ AnalysisBundle (one per symbol)
//!  Agent Client ──▶ AnalysisResult ─┘
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Symbol;

// ─── Agent Kind ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Technical,
    Fibonacci,
    Gann,
    Sentiment,
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentKind::Technical => "technical",
            AgentKind::Fibonacci => "fibonacci",
            AgentKind::Gann => "gann",
            AgentKind::Sentiment => "sentiment",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    #[serde(alias = "bullish", alias = "UP")]
    Bullish,
    #[serde(alias = "bearish", alias = "DOWN")]
    Bearish,
    #[serde(alias = "neutral", alias = "RANGE")]
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SentimentLabel {
    #[serde(alias = "positive")]
    Positive,
    #[serde(alias = "negative")]
    Negative,
    #[serde(alias = "neutral")]
    Neutral,
}

// ─── Typed Reports ────────────────────────────────────────────────────────────

/// One timeframe of the technical analyzer (`"15"`, `"60"`, `"240"`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeReading {
    #[serde(default, alias = "close")]
    pub price: Option<f64>,
    #[serde(default)]
    pub trend: Option<Trend>,
    #[serde(default)]
    pub rsi: Option<f64>,
    #[serde(default)]
    pub macd_hist: Option<f64>,
    #[serde(default)]
    pub atr: Option<f64>,
    #[serde(default)]
    pub ema_20: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalReport {
    pub timeframes: BTreeMap<String, TimeframeReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibonacciReport {
    #[serde(alias = "current_price")]
    pub price: f64,
    #[serde(default, alias = "fib_levels")]
    pub levels: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GannReport {
    pub price: f64,
    #[serde(alias = "gann_support")]
    pub support: f64,
    #[serde(alias = "gann_resistance")]
    pub resistance: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentReport {
    /// Average score in `[-1, 1]`.
    #[serde(alias = "average_sentiment_score")]
    pub score: f64,
    #[serde(alias = "sentiment_label")]
    pub label: SentimentLabel,
    #[serde(default)]
    pub article_count: u32,
}

// ─── Payload ──────────────────────────────────────────────────────────────────

/// Closed union of everything an agent can answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentPayload {
    Technical(TechnicalReport),
    Fibonacci(FibonacciReport),
    Gann(GannReport),
    Sentiment(SentimentReport),
    Unparseable { reason: String },
}

impl AgentPayload {
    /// Parse a raw agent body into the variant for `kind`.
    ///
    /// Returns the validation message on failure; the caller turns that into
    /// a failed [`AnalysisResult`].
    pub fn parse(kind: AgentKind, body: &Value) -> Result<Self, String> {
        if !body.is_object() {
            return Err("payload is not a JSON object".into());
        }
        if let Some(err) = body.get("error").and_then(Value::as_str) {
            return Err(format!("agent reported error: {err}"));
        }
        if body.get("status").and_then(Value::as_str) == Some("error") {
            return Err("agent reported status=error".into());
        }

        match kind {
            AgentKind::Technical => parse_technical(body).map(AgentPayload::Technical),
            AgentKind::Fibonacci => {
                let report: FibonacciReport = decode(body)?;
                require_price(report.price)?;
                Ok(AgentPayload::Fibonacci(report))
            }
            AgentKind::Gann => {
                let report: GannReport = decode(body)?;
                require_price(report.price)?;
                if report.support > report.resistance {
                    return Err("gann support above resistance".into());
                }
                Ok(AgentPayload::Gann(report))
            }
            AgentKind::Sentiment => {
                let report: SentimentReport = decode(body)?;
                if !report.score.is_finite() || !(-1.0..=1.0).contains(&report.score) {
                    return Err(format!("sentiment score {} outside [-1, 1]", report.score));
                }
                Ok(AgentPayload::Sentiment(report))
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &Value) -> Result<T, String> {
    serde_json::from_value(body.clone()).map_err(|e| format!("malformed payload: {e}"))
}

fn require_price(price: f64) -> Result<(), String> {
    if price.is_finite() && price > 0.0 {
        Ok(())
    } else {
        Err(format!("invalid price {price}"))
    }
}

/// The technical analyzer answers either with `{"data": {"15": {...}}}`
/// (multi-timeframe) or with a single flat reading.
fn parse_technical(body: &Value) -> Result<TechnicalReport, String> {
    let timeframes: BTreeMap<String, TimeframeReading> = match body.get("data") {
        Some(data) => decode(data)?,
        None => BTreeMap::from([("default".to_string(), decode(body)?)]),
    };

    let priced = timeframes
        .values()
        .any(|tf| tf.price.is_some_and(|p| p.is_finite() && p > 0.0));
    if !priced {
        return Err("no timeframe carries a valid price".into());
    }

    Ok(TechnicalReport { timeframes })
}

// ─── Analysis Result ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Network error, timeout, 5xx.
    Transport,
    /// Reached the agent but the answer was unusable.
    Validation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// One agent's opinion about one symbol in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub agent: String,
    pub kind: AgentKind,
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub payload: AgentPayload,
    /// `None` = success.
    pub failure: Option<AgentFailure>,
}

impl AnalysisResult {
    pub fn success(agent: &str, kind: AgentKind, symbol: Symbol, payload: AgentPayload) -> Self {
        Self {
            agent: agent.to_string(),
            kind,
            symbol,
            timestamp: Utc::now(),
            payload,
            failure: None,
        }
    }

    pub fn failure(
        agent: &str,
        kind: AgentKind,
        symbol: Symbol,
        failure_kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            agent: agent.to_string(),
            kind,
            symbol,
            timestamp: Utc::now(),
            payload: AgentPayload::Unparseable { reason: message.clone() },
            failure: Some(AgentFailure { kind: failure_kind, message }),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

// ─── Analysis Bundle ──────────────────────────────────────────────────────────

/// All agent opinions about one symbol in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisBundle {
    pub symbol: Symbol,
    pub results: BTreeMap<AgentKind, AnalysisResult>,
    /// Successful agents / queried agents, for the oracle to weigh the bundle.
    pub coverage: f64,
}

impl AnalysisBundle {
    pub fn new(symbol: Symbol) -> Self {
        Self { symbol, results: BTreeMap::new(), coverage: 0.0 }
    }

    /// Add a result. A duplicate agent kind keeps the most recent timestamp.
    pub fn insert(&mut self, result: AnalysisResult) {
        match self.results.get(&result.kind) {
            Some(existing) if existing.timestamp > result.timestamp => {}
            _ => {
                self.results.insert(result.kind, result);
            }
        }
        self.coverage = self.success_count() as f64 / self.results.len() as f64;
    }

    pub fn success_count(&self) -> usize {
        self.results.values().filter(|r| r.is_success()).count()
    }

    /// Only bundles with at least one successful agent may reach the oracle.
    #[inline]
    pub fn is_eligible(&self) -> bool {
        self.success_count() > 0
    }

    pub fn failed_agents(&self) -> Vec<AgentKind> {
        self.results
            .values()
            .filter(|r| !r.is_success())
            .map(|r| r.kind)
            .collect()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_multi_timeframe_technical() {
        let body = json!({
            "symbol": "BTCUSDT",
            "data": {
                "15":  { "price": 65000.0, "trend": "BULLISH", "rsi": 58.2 },
                "240": { "price": 65010.0, "trend": "BEARISH", "macd_hist": -12.5 }
            }
        });
        let payload = AgentPayload::parse(AgentKind::Technical, &body).unwrap();
        match payload {
            AgentPayload::Technical(report) => {
                assert_eq!(report.timeframes.len(), 2);
                assert_eq!(report.timeframes["15"].trend, Some(Trend::Bullish));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_agent_error_field_is_validation_failure() {
        let body = json!({ "symbol": "BTCUSDT", "error": "Analysis Failed", "price": 0, "rsi": 50 });
        let err = AgentPayload::parse(AgentKind::Technical, &body).unwrap_err();
        assert!(err.contains("Analysis Failed"));
    }

    #[test]
    fn test_gann_aliases() {
        let body = json!({ "price": 64900.0, "gann_support": 64516.0, "gann_resistance": 65025.0, "trend": "BULLISH" });
        let payload = AgentPayload::parse(AgentKind::Gann, &body).unwrap();
        assert!(matches!(payload, AgentPayload::Gann(GannReport { support, .. }) if support == 64516.0));
    }

    #[test]
    fn test_sentiment_out_of_range_rejected() {
        let body = json!({ "average_sentiment_score": 3.2, "sentiment_label": "POSITIVE" });
        assert!(AgentPayload::parse(AgentKind::Sentiment, &body).is_err());
    }

    #[test]
    fn test_bundle_eligibility() {
        let symbol = Symbol::new("ETHUSDT");
        let mut bundle = AnalysisBundle::new(symbol.clone());
        bundle.insert(AnalysisResult::failure(
            "gann", AgentKind::Gann, symbol.clone(), FailureKind::Transport, "timeout",
        ));
        assert!(!bundle.is_eligible());

        bundle.insert(AnalysisResult::success(
            "sentiment",
            AgentKind::Sentiment,
            symbol,
            AgentPayload::Sentiment(SentimentReport {
                score: 0.4,
                label: SentimentLabel::Positive,
                article_count: 12,
            }),
        ));
        assert!(bundle.is_eligible());
        assert_eq!(bundle.coverage, 0.5);
        assert_eq!(bundle.failed_agents(), vec![AgentKind::Gann]);
    }

    #[test]
    fn test_duplicate_kind_most_recent_wins() {
        let symbol = Symbol::new("SOLUSDT");
        let mut newer = AnalysisResult::failure(
            "fib-b", AgentKind::Fibonacci, symbol.clone(), FailureKind::Validation, "bad",
        );
        let mut older = AnalysisResult::success(
            "fib-a",
            AgentKind::Fibonacci,
            symbol.clone(),
            AgentPayload::Fibonacci(FibonacciReport { price: 150.0, levels: BTreeMap::new() }),
        );
        older.timestamp = Utc::now() - chrono::Duration::seconds(10);
        newer.timestamp = Utc::now();

        let mut bundle = AnalysisBundle::new(symbol);
        bundle.insert(newer.clone());
        bundle.insert(older);
        assert_eq!(bundle.results[&AgentKind::Fibonacci].agent, "fib-b");
        assert_eq!(bundle.results.len(), 1);
    }
}
