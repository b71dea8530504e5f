//! # routes::health
//!
//! `GET /api/health`: liveness, exempt from API-key auth.

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::state::SharedState;

pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let halted = state.risk.halted().await.is_some();
    Json(json!({
        "ok":             true,
        "service":        "sentinel",
        "version":        env!("CARGO_PKG_VERSION"),
        "uptime_secs":    state.started_at.elapsed().as_secs(),
        "open_positions": state.store.count().await,
        "halted":         halted,
    }))
}
