//! # routes::monitor
//!
//! | Method   | Path          | Description                                    |
//! |----------|---------------|------------------------------------------------|
//! | GET (WS) | `/ws/monitor` | Live [`EngineEvent`](crate::events::EngineEvent) stream |
//! | GET      | `/api/stats`  | Counters, uptime, configuration summary        |
//! | GET      | `/api/events` | Recent audit records (`?limit=&kind=`)         |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::state::SharedState;

const DEFAULT_EVENT_LIMIT: usize = 100;
const MAX_EVENT_LIMIT: usize = 1_000;

// ─── WebSocket ────────────────────────────────────────────────────────────────

pub async fn ws_monitor(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let mut rx = state.events.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!("🔌 WebSocket client connected");

    // Current positions first, so the client does not wait for the next event.
    let snapshot = json!({
        "event":     "SNAPSHOT",
        "positions": state.store.snapshot().await,
        "risk":      state.risk.status().await,
    })
    .to_string();
    if sender.send(Message::Text(snapshot)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(json_str) => {
                        if sender.send(Message::Text(json_str)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("WS client lagged, skipped {n} events");
                    }
                    Err(_) => break,
                }
            }

            result = receiver.next() => {
                match result {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("🔌 WebSocket client disconnected");
}

// ─── REST ─────────────────────────────────────────────────────────────────────

/// GET /api/stats
pub async fn get_stats(State(state): State<SharedState>) -> impl IntoResponse {
    let config = &state.config;
    Json(json!({
        "ok":              true,
        "uptime_secs":     state.started_at.elapsed().as_secs(),
        "scan_cycles":     state.pipeline.cycles(),
        "open_positions":  state.store.count().await,
        "reversing":       state.store.reversing_symbols(),
        "opened_total":    state.executor.opened_total(),
        "closed_total":    state.executor.closed_total(),
        "audit_buffered":  state.memory_sink.len(),
        "symbols":         state.pipeline.symbols(),
        "reverse":         state.reverse.config(),
        "trailing":        config.trailing,
        "intervals_secs": {
            "scan":    config.scan_interval.as_secs(),
            "monitor": config.monitor_interval.as_secs(),
            "equity":  config.equity_interval.as_secs(),
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
    /// `intent`, `opened`, `closed`, `reverse`, `equity`, `rejected`.
    pub kind:  Option<String>,
}

/// GET /api/events
pub async fn get_events(
    State(state): State<SharedState>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT).min(MAX_EVENT_LIMIT);
    let records = state.memory_sink.recent(limit, query.kind.as_deref());
    Json(json!({
        "ok":      true,
        "count":   records.len(),
        "records": records,
    }))
}
