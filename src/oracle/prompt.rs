//! # oracle::prompt — prompt construction and verdict parsing
//!
//! The LLM gets one prompt for the whole batch and must answer with a JSON
//! object `{"decisions": [...]}`. Parsing is forgiving about spelling
//! (`decision` / `direction`, `confidence_score` / `confidence`, nested
//! `trade_setup`) but strict about structure.

use serde::Deserialize;
use serde_json::Value;

use super::{DecisionRequest, Verdict};
use crate::error::OracleError;
use crate::models::{Direction, Symbol};

/// Build the batch prompt.
pub fn build_prompt(request: &DecisionRequest) -> String {
    let mut sections = String::new();
    for bundle in &request.bundles {
        let analysis = serde_json::to_string_pretty(&bundle.results).unwrap_or_else(|_| "{}".into());
        let failed = bundle.failed_agents();
        let failed_line = if failed.is_empty() {
            String::new()
        } else {
            let names: Vec<String> = failed.iter().map(|k| k.to_string()).collect();
            format!("Unavailable agents (treat as missing evidence): {}\n", names.join(", "))
        };
        sections.push_str(&format!(
            "### {symbol}\nAgent coverage: {coverage:.0}%\n{failed_line}{analysis}\n\n",
            symbol   = bundle.symbol,
            coverage = bundle.coverage * 100.0,
        ));
    }

    let history = if request.insights.is_empty() {
        "No historical performance available.".to_string()
    } else {
        serde_json::to_string_pretty(&request.insights).unwrap_or_default()
    };

    let open = if request.open_positions.is_empty() {
        "None".to_string()
    } else {
        request.open_positions.iter().map(Symbol::as_str).collect::<Vec<_>>().join(", ")
    };

    format!(r#"You are an elite crypto futures trading AI. Decide for every symbol below.

## Historical Performance (advisory)
{history}

## Open Positions
{open}

## Market Analysis
{sections}
## Rules
1. Need one clear timeframe signal plus a supporting factor to trade
2. Symbols with poor historical performance require confidence 70+
3. Missing agents lower your confidence; never invent their data
4. If unclear → "NONE"

**CRITICAL**: Respond with ONLY a valid JSON object. No explanations, no markdown, no code fences.

## Required JSON Format
{{
  "decisions": [
    {{
      "symbol": "<symbol>",
      "direction": "LONG" | "SHORT" | "NONE",
      "confidence": 0-100,
      "leverage": <int>,
      "size_fraction": <0.0-1.0 of free balance>,
      "rationale": "<brief explanation max 200 chars>"
    }}
  ]
}}

Respond with JSON only:"#)
}

/// Strip the markdown code fences an LLM may wrap its JSON in.
pub fn strip_markdown(text: &str) -> &str {
    let text = text.trim();
    let inner = if let Some(inner) = text.strip_prefix("```json") {
        inner
    } else if let Some(inner) = text.strip_prefix("```") {
        inner
    } else {
        return text;
    };
    inner.trim_end().trim_end_matches("```").trim()
}

// ─── Verdict parsing ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TradeSetup {
    #[serde(default)]
    leverage: Option<f64>,
    #[serde(default)]
    size_pct: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    symbol:        Symbol,
    #[serde(alias = "decision", alias = "action")]
    direction:     String,
    #[serde(default, alias = "confidence_score")]
    confidence:    f64,
    #[serde(default)]
    leverage:      Option<f64>,
    #[serde(default, alias = "size_pct")]
    size_fraction: Option<f64>,
    #[serde(default, alias = "reasoning")]
    rationale:     String,
    #[serde(default)]
    trade_setup:   Option<TradeSetup>,
}

impl From<RawVerdict> for Verdict {
    fn from(raw: RawVerdict) -> Self {
        let setup = raw.trade_setup.as_ref();
        let leverage = raw
            .leverage
            .or_else(|| setup.and_then(|s| s.leverage))
            .filter(|l| l.is_finite() && *l >= 1.0)
            .map(|l| l.round() as u32);
        Verdict {
            symbol:        raw.symbol,
            direction:     Direction::parse_lenient(&raw.direction),
            confidence:    raw.confidence,
            leverage,
            size_fraction: raw.size_fraction.or_else(|| setup.and_then(|s| s.size_pct)),
            rationale:     raw.rationale,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope {
    Wrapped { decisions: Vec<RawVerdict> },
    List(Vec<RawVerdict>),
    Single(RawVerdict),
}

pub fn verdicts_from_value(value: Value) -> Result<Vec<Verdict>, OracleError> {
    let envelope: Envelope = serde_json::from_value(value)
        .map_err(|e| OracleError::Parse(format!("unexpected verdict shape: {e}")))?;
    let raw = match envelope {
        Envelope::Wrapped { decisions } | Envelope::List(decisions) => decisions,
        Envelope::Single(one) => vec![one],
    };
    Ok(raw.into_iter().map(Verdict::from).collect())
}

/// Parse raw LLM text (possibly fenced) into verdicts.
pub fn parse_verdicts(text: &str) -> Result<Vec<Verdict>, OracleError> {
    let cleaned = strip_markdown(text);
    let value: Value = serde_json::from_str(cleaned)
        .map_err(|e| OracleError::Parse(format!("invalid JSON ({e}): {cleaned}")))?;
    verdicts_from_value(value)
}
