//! # error
//!
//! Error taxonomy of the engine plus the HTTP error type.
//!
//! | Kind                | Handling                                         |
//! |---------------------|--------------------------------------------------|
//! | `TransportFailure`  | retried once, then degraded                      |
//! | `ValidationFailure` | never retried, degrades the bundle               |
//! | `AdmissionRejected` | logged, no action                                |
//! | `ExecutionFailure`  | logged, local state kept, next tick reconciles   |
//!
//! Handlers return `Result<_, AppError>`; its `IntoResponse` impl always
//! produces `{ "ok": false, "error": "..." }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::Symbol;

// ─── Engine ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("validation failure: {0}")]
    ValidationFailure(String),

    #[error("admission rejected for {symbol}: {reason}")]
    AdmissionRejected { symbol: Symbol, reason: String },

    #[error("execution failure for {symbol}: {message}")]
    ExecutionFailure { symbol: Symbol, message: String },

    #[error("trading halted: {0}")]
    Halted(String),

    /// Symbol already has a position, or is mid-reverse.
    #[error("{symbol} is busy: {reason}")]
    Busy { symbol: Symbol, reason: String },

    #[error("no open position for {0}")]
    NotOpen(Symbol),
}

// ─── Exchange Gateway ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("gateway call '{0}' timed out")]
    Timeout(&'static str),

    #[error("gateway unreachable: {0}")]
    Transport(String),

    /// The exchange answered and said no.
    #[error("exchange rejected request: {0}")]
    Rejected(String),

    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Timeouts and connection failures; only these are retried, and only on reads.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Timeout(_) | GatewayError::Transport(_))
    }

    pub fn into_engine(self, symbol: &Symbol) -> EngineError {
        EngineError::ExecutionFailure { symbol: symbol.clone(), message: self.to_string() }
    }
}

// ─── Decision Oracle ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle unreachable: {0}")]
    Transport(String),

    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle answer could not be parsed: {0}")]
    Parse(String),

    #[error("oracle call timed out")]
    Timeout,
}

// ─── Audit Sink ───────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[cfg(feature = "postgres")]
    #[error("audit database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ─── HTTP ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Engine(EngineError::NotOpen(_)) => StatusCode::NOT_FOUND,
            AppError::Engine(EngineError::Busy { .. }) => StatusCode::CONFLICT,
            AppError::Engine(EngineError::Halted(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Engine(EngineError::AdmissionRejected { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Engine(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "ok":    false,
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
