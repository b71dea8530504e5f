//! HTTP control surface.

pub mod health;
pub mod monitor;
pub mod positions;
pub mod risk;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::require_api_key;
use crate::state::SharedState;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health",          get(health::health_check))
        // ── Monitor ───────────────────────────────────────────────────────────
        .route("/ws/monitor",          get(monitor::ws_monitor))
        .route("/api/stats",           get(monitor::get_stats))
        .route("/api/events",          get(monitor::get_events))
        // ── Positions ─────────────────────────────────────────────────────────
        .route("/api/positions",       get(positions::get_positions))
        .route("/api/positions/close", post(positions::close_position))
        // ── Risk Management ───────────────────────────────────────────────────
        .route("/api/risk/status",     get(risk::get_risk_status))
        .route("/api/risk/limits",     put(risk::put_limits))
        .route("/api/risk/kill",       post(risk::kill_switch_on))
        .route("/api/risk/rearm",      post(risk::kill_switch_off))
        // ── Middleware ────────────────────────────────────────────────────────
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
