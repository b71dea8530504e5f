//! # engine::agent_client — Agent Client
//!
//! One request to one analysis agent. Never errors past its boundary: every
//! outcome is an [`AnalysisResult`], failed ones tagged with a
//! [`FailureKind`].
//!
//! | Outcome                          | Kind         | Retried |
//! |----------------------------------|--------------|---------|
//! | timeout, connect error           | Transport    | once    |
//! | HTTP 5xx, 429, 408               | Transport    | once    |
//! | other HTTP 4xx                   | Validation   | never   |
//! | body not JSON / wrong shape      | Validation   | never   |
//! | body carries an `error` field    | Validation   | never   |

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::models::{AgentKind, AgentPayload, AnalysisResult, FailureKind, Symbol};
use crate::retry::{with_retry, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEndpoint {
    pub name: String,
    pub kind: AgentKind,
    pub url:  String,
}

impl AgentEndpoint {
    pub fn new(kind: AgentKind, url: impl Into<String>) -> Self {
        Self { name: kind.to_string(), kind, url: url.into() }
    }
}

#[async_trait]
pub trait AgentCaller: Send + Sync {
    async fn call(&self, endpoint: &AgentEndpoint, symbol: &Symbol, timeout: Duration) -> AnalysisResult;
}

// ─── HTTP implementation ──────────────────────────────────────────────────────

#[derive(Debug)]
enum CallError {
    Transport(String),
    Validation(String),
}

impl CallError {
    fn is_transport(&self) -> bool {
        matches!(self, CallError::Transport(_))
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Transport(m) | CallError::Validation(m) => f.write_str(m),
        }
    }
}

pub struct AgentClient {
    client: reqwest::Client,
    retry:  RetryPolicy,
}

impl AgentClient {
    pub fn new(client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    fn request_body(kind: AgentKind, symbol: &Symbol) -> Value {
        match kind {
            AgentKind::Technical => json!({ "symbol": symbol, "timeframes": ["15", "60", "240"] }),
            AgentKind::Fibonacci => json!({ "symbol": symbol, "crypto_symbol": symbol }),
            AgentKind::Gann | AgentKind::Sentiment => json!({ "symbol": symbol }),
        }
    }

    async fn attempt(&self, endpoint: &AgentEndpoint, body: &Value, timeout: Duration) -> Result<Value, CallError> {
        let response = self
            .client
            .post(&endpoint.url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::Transport(format!("timed out after {timeout:?}"))
                } else {
                    CallError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 || status.as_u16() == 408 {
            return Err(CallError::Transport(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Validation(format!("HTTP {status}: {body}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| CallError::Validation(format!("body is not JSON: {e}")))
    }
}

#[async_trait]
impl AgentCaller for AgentClient {
    async fn call(&self, endpoint: &AgentEndpoint, symbol: &Symbol, timeout: Duration) -> AnalysisResult {
        let body = Self::request_body(endpoint.kind, symbol);
        let label = format!("{}:{symbol}", endpoint.name);

        let outcome = with_retry(
            self.retry,
            &label,
            || self.attempt(endpoint, &body, timeout),
            CallError::is_transport,
        )
        .await;

        let parsed = outcome.and_then(|raw| {
            AgentPayload::parse(endpoint.kind, &raw).map_err(CallError::Validation)
        });

        match parsed {
            Ok(payload) => {
                debug!(agent = %endpoint.name, symbol = %symbol, "📡 agent answered");
                AnalysisResult::success(&endpoint.name, endpoint.kind, symbol.clone(), payload)
            }
            Err(err) => {
                let kind = if err.is_transport() { FailureKind::Transport } else { FailureKind::Validation };
                warn!(agent = %endpoint.name, symbol = %symbol, ?kind, error = %err, "⚠️ agent failed");
                AnalysisResult::failure(&endpoint.name, endpoint.kind, symbol.clone(), kind, err.to_string())
            }
        }
    }
}
