//! # gateway::http
//!
//! [`HttpExchangeGateway`] talks to the position-manager service that fronts
//! the exchange.
//!
//! ## Contract
//! | Call                    | Request                                        | Success body                                   |
//! |-------------------------|------------------------------------------------|------------------------------------------------|
//! | `GET  /get_wallet_balance` |                                             | `{"equity": f, "available": f}`                |
//! | `GET  /get_open_positions` |                                             | `{"details": [{symbol, side, size, entry_price, mark_price, leverage}]}` |
//! | `GET  /mark_price/{sym}`   |                                             | `{"mark_price": f}`                            |
//! | `POST /open_position`      | `{symbol, side, size, leverage}`            | `{"status": "executed", "id", "entry_price"}`  |
//! | `POST /close_position`     | `{symbol}`                                  | `{"status": "closed", "exit_price"}`           |
//!
//! `{"status": "error", "msg": "..."}` is a rejection regardless of HTTP status.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::{Balance, CloseFill, ExchangeGateway, ExchangePosition, OpenFill, OpenOrder};
use crate::error::GatewayError;
use crate::models::{Side, Symbol};
use crate::retry::{with_retry, RetryPolicy};

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(alias = "total")]
    equity:    f64,
    #[serde(alias = "free")]
    available: f64,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    #[serde(default, alias = "positions")]
    details: Vec<WirePosition>,
}

#[derive(Debug, Deserialize)]
struct WirePosition {
    symbol:      Symbol,
    side:        Side,
    /// Contracts (base quantity).
    #[serde(default)]
    size:        f64,
    /// Quote notional, preferred over `size × entry_price` when present.
    #[serde(default)]
    notional:    Option<f64>,
    entry_price: f64,
    #[serde(default)]
    mark_price:  Option<f64>,
    #[serde(default = "one")]
    leverage:    f64,
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct MarkResponse {
    #[serde(alias = "price", alias = "markPrice")]
    mark_price: f64,
}

#[derive(Debug, Deserialize)]
struct ExecResponse {
    status:      String,
    #[serde(default)]
    id:          Option<Value>,
    #[serde(default)]
    entry_price: Option<f64>,
    #[serde(default)]
    exit_price:  Option<f64>,
    #[serde(default, alias = "message")]
    msg:         Option<String>,
}

// ─── Gateway ──────────────────────────────────────────────────────────────────

pub struct HttpExchangeGateway {
    client:   reqwest::Client,
    base_url: String,
    timeout:  Duration,
    retry:    RetryPolicy,
}

impl HttpExchangeGateway {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            retry,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_once<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(self.url(path))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    /// Reads are idempotent; retried on transient failures.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        with_retry(self.retry, path, || self.get_once(path), GatewayError::is_transient).await
    }

    /// Writes are sent exactly once.
    async fn post(&self, path: &str, body: &Value) -> Result<ExecResponse, GatewayError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                error!(path, error = %e, "exchange gateway unreachable");
                transport(e)
            })?;
        let exec: ExecResponse = decode(response).await?;
        if exec.status.eq_ignore_ascii_case("error") {
            let msg = exec.msg.unwrap_or_else(|| "unspecified".into());
            warn!(path, msg = %msg, "exchange rejected request");
            return Err(GatewayError::Rejected(msg));
        }
        Ok(exec)
    }
}

fn transport(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout("http")
    } else {
        GatewayError::Transport(e.to_string())
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(if status.is_server_error() || status.as_u16() == 429 {
            GatewayError::Transport(format!("HTTP {status}: {body}"))
        } else {
            // 4xx bodies may still carry the {"status":"error","msg"} shape
            let msg = serde_json::from_str::<ExecResponse>(&body)
                .ok()
                .and_then(|r| r.msg)
                .unwrap_or(body);
            GatewayError::Rejected(format!("HTTP {status}: {msg}"))
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| GatewayError::Malformed(e.to_string()))
}

#[async_trait]
impl ExchangeGateway for HttpExchangeGateway {
    async fn get_balance(&self) -> Result<Balance, GatewayError> {
        let resp: BalanceResponse = self.get("/get_wallet_balance").await?;
        Ok(Balance { total: resp.equity, free: resp.available })
    }

    async fn get_open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError> {
        let resp: PositionsResponse = self.get("/get_open_positions").await?;
        Ok(resp
            .details
            .into_iter()
            .filter(|p| p.entry_price > 0.0 && (p.size > 0.0 || p.notional.is_some_and(|n| n > 0.0)))
            .map(|p| ExchangePosition {
                notional:    p.notional.unwrap_or(p.size * p.entry_price),
                symbol:      p.symbol,
                side:        p.side,
                entry_price: p.entry_price,
                leverage:    p.leverage.round().max(1.0) as u32,
                mark_price:  p.mark_price,
            })
            .collect())
    }

    async fn open_position(&self, order: &OpenOrder) -> Result<OpenFill, GatewayError> {
        info!(
            symbol   = %order.symbol,
            side     = %order.side,
            size     = order.size,
            leverage = order.leverage,
            "🚀 [GATEWAY] Sending open order"
        );
        let body = json!({
            "symbol":   order.symbol,
            "side":     order.side,
            "size":     order.size,
            "leverage": order.leverage,
        });
        let exec = self.post("/open_position", &body).await?;
        if !exec.status.eq_ignore_ascii_case("executed") {
            return Err(GatewayError::Malformed(format!("unexpected open status '{}'", exec.status)));
        }

        let entry_price = match exec.entry_price {
            Some(price) if price > 0.0 => price,
            // filled, but no price in the ack: fall back to the current mark
            _ => self.get_mark_price(&order.symbol).await?,
        };
        let order_id = exec.id.map(|id| match id {
            Value::String(s) => s,
            other => other.to_string(),
        });

        info!(symbol = %order.symbol, ?order_id, entry_price, "✅ [GATEWAY] Open confirmed");
        Ok(OpenFill { order_id, entry_price })
    }

    async fn close_position(&self, symbol: &Symbol) -> Result<CloseFill, GatewayError> {
        info!(symbol = %symbol, "📤 [GATEWAY] Sending close order");
        let exec = self.post("/close_position", &json!({ "symbol": symbol })).await?;
        if !exec.status.eq_ignore_ascii_case("closed") && !exec.status.eq_ignore_ascii_case("executed") {
            return Err(GatewayError::Malformed(format!("unexpected close status '{}'", exec.status)));
        }
        let exit_price = match exec.exit_price {
            Some(price) if price > 0.0 => price,
            _ => self.get_mark_price(symbol).await?,
        };
        info!(symbol = %symbol, exit_price, "✅ [GATEWAY] Close confirmed");
        Ok(CloseFill { exit_price })
    }

    async fn get_mark_price(&self, symbol: &Symbol) -> Result<f64, GatewayError> {
        let resp: MarkResponse = self.get(&format!("/mark_price/{symbol}")).await?;
        if !resp.mark_price.is_finite() || resp.mark_price <= 0.0 {
            return Err(GatewayError::Malformed(format!("invalid mark price {}", resp.mark_price)));
        }
        Ok(resp.mark_price)
    }
}
