//! # routes::risk
//!
//! | Method | Path               | Description                           |
//! |--------|--------------------|---------------------------------------|
//! | GET    | `/api/risk/status` | Halt state, failure streak, limits    |
//! | PUT    | `/api/risk/limits` | Replace limits (next cycle onwards)   |
//! | POST   | `/api/risk/kill`   | Halt opens and reopens                |
//! | POST   | `/api/risk/rearm`  | Lift the halt                         |

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::engine::risk::RiskLimits;
use crate::error::AppError;
use crate::events::EngineEvent;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct KillBody {
    pub reason: Option<String>,
}

/// POST /api/risk/kill
pub async fn kill_switch_on(
    State(state): State<SharedState>,
    body: Option<Json<KillBody>>,
) -> impl IntoResponse {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "Manual kill via API".to_string());

    if state.risk.kill(&reason).await {
        state.events.publish(&EngineEvent::RiskHalted { reason: reason.clone() });
    }

    (StatusCode::OK, Json(json!({
        "ok":      true,
        "message": format!("Kill switch activated: {reason}"),
    })))
}

/// POST /api/risk/rearm
pub async fn kill_switch_off(State(state): State<SharedState>) -> impl IntoResponse {
    state.risk.rearm().await;
    state.events.publish(&EngineEvent::RiskRearmed);

    Json(json!({
        "ok":      true,
        "message": "System re-armed, trading enabled",
    }))
}

/// GET /api/risk/status
pub async fn get_risk_status(State(state): State<SharedState>) -> impl IntoResponse {
    let status = state.risk.status().await;
    Json(json!({ "ok": true, "risk": status }))
}

/// PUT /api/risk/limits
pub async fn put_limits(
    State(state): State<SharedState>,
    Json(limits): Json<RiskLimits>,
) -> Result<impl IntoResponse, AppError> {
    state.risk.set_limits(limits).await.map_err(AppError::BadRequest)?;
    state.events.publish(&EngineEvent::LimitsChanged { limits });
    Ok(Json(json!({ "ok": true, "limits": limits })))
}
