//! # gateway — Exchange Gateway capability
//!
//! The engine never talks to an exchange directly. Everything goes through
//! [`ExchangeGateway`]: three reads (balance, open positions, mark price)
//! and two writes (open, close).
//!
//! Reads may be retried on timeout. Writes report an unambiguous
//! success/failure and are never retried automatically: a retried open that
//! actually filled the first time would double the exposure.

pub mod http;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::models::{Side, Symbol};

pub use http::HttpExchangeGateway;

// ─── Wire-independent types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub total: f64,
    pub free:  f64,
}

/// A position as the exchange reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol:      Symbol,
    pub side:        Side,
    pub entry_price: f64,
    /// Quote notional in USDT.
    pub notional:    f64,
    pub leverage:    u32,
    pub mark_price:  Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenOrder {
    pub symbol:   Symbol,
    pub side:     Side,
    /// Quote notional in USDT.
    pub size:     f64,
    pub leverage: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenFill {
    pub order_id:    Option<String>,
    pub entry_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseFill {
    pub exit_price: f64,
}

// ─── Capability ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn get_balance(&self) -> Result<Balance, GatewayError>;

    async fn get_open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError>;

    async fn open_position(&self, order: &OpenOrder) -> Result<OpenFill, GatewayError>;

    async fn close_position(&self, symbol: &Symbol) -> Result<CloseFill, GatewayError>;

    async fn get_mark_price(&self, symbol: &Symbol) -> Result<f64, GatewayError>;
}

/// Bound a gateway call. An elapsed deadline becomes [`GatewayError::Timeout`].
pub async fn with_timeout<T, F>(label: &'static str, limit: Duration, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(label)),
    }
}
