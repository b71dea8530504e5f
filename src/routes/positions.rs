//! # routes::positions
//!
//! | Method | Path                   | Description                   |
//! |--------|------------------------|-------------------------------|
//! | GET    | `/api/positions`       | Every open position           |
//! | POST   | `/api/positions/close` | Manual close `{ "symbol" }`   |

use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::AppError;
use crate::models::{CloseReason, Symbol};
use crate::state::SharedState;

/// GET /api/positions
pub async fn get_positions(State(state): State<SharedState>) -> impl IntoResponse {
    let positions = state.store.snapshot().await;
    Json(json!({
        "ok":        true,
        "count":     positions.len(),
        "positions": positions,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CloseBody {
    pub symbol: String,
}

/// POST /api/positions/close
pub async fn close_position(
    State(state): State<SharedState>,
    Json(body): Json<CloseBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.symbol.trim().is_empty() {
        return Err(AppError::BadRequest("symbol is required".into()));
    }
    let symbol = Symbol::new(&body.symbol);
    info!(symbol = %symbol, "🖐️ manual close requested");

    let closed = state.executor.close(&symbol, CloseReason::Manual).await?;
    Ok(Json(json!({ "ok": true, "closed": closed })))
}
