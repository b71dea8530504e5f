//! # Sentinel — multi-agent orchestration & position-lifecycle engine
//!
//! ```text
//!   ┌──────────────── scan driver ─────────────────┐
//!   │ technical / fibonacci / gann / sentiment     │
//!   │ agents ─▶ Scan Aggregator ─▶ Decision Oracle │
//!   └──────────────────────┬───────────────────────┘
//!                          ▼ TradeIntents
//!                 Risk Guard 🛡️ ─▶ Executor ─▶ Exchange Gateway
//!                          │            ▲
//!                          ▼            │ close / reopen
//!                   Position Store ◀── Position Monitor (trailing · reverse)
//!                          │
//!   Dashboard ◀── ws://host/ws/monitor, GET /api/*, audit sinks
//! ```
//!
//! ## Environment Variables
//!
//! | Variable              | Default                               |
//! |-----------------------|---------------------------------------|
//! | `BIND_ADDR`           | `0.0.0.0:3000`                        |
//! | `SYMBOLS`             | `BTCUSDT,ETHUSDT,SOLUSDT`             |
//! | `ORACLE_MODE`         | `http` (`claude`, `openai`)           |
//! | `EXCHANGE_URL`        | `http://position-manager-agent:8000`  |
//! | `LEARNING_AGENT_URL`  | unset (insights disabled)             |
//! | `AUDIT_LOG_PATH`      | unset                                 |
//! | `API_KEY`             | unset (dev mode)                      |
//! | `RUST_LOG`            | `sentinel=debug`                      |
//!
//! The full list lives in `config.rs`.

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod auth;
mod config;
mod engine;
mod error;
mod events;
mod gateway;
mod insights;
mod models;
mod oracle;
mod retry;
mod routes;
mod sink;
mod state;

#[cfg(test)]
mod testkit;

use config::Config;
use engine::scheduler::{spawn_equity_driver, spawn_monitor_driver, spawn_scan_driver};
use state::build_state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env ──────────────────────────────────────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("sentinel=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!(r#"

  ╔═══════════════════════════════════════════════════════╗
  ║              SENTINEL — Trading Orchestrator          ║
  ║   Scan · Oracle · Risk · Monitor · Trailing · Reverse ║
  ╚═══════════════════════════════════════════════════════╝"#);

    // ── 3. Configuration & shared state ───────────────────────────────────────
    let config = Config::from_env()?;
    let addr = config.bind_addr;
    let state = build_state(config).await?;

    // ── 4. Periodic drivers ───────────────────────────────────────────────────
    let drivers = [
        spawn_monitor_driver(state.monitor.clone(), state.config.monitor_interval),
        spawn_scan_driver(state.pipeline.clone(), state.config.scan_interval),
        spawn_equity_driver(state.monitor.clone(), state.config.equity_interval),
    ];

    // ── 5. Router (CORS, tracing, API key) ────────────────────────────────────
    let app = routes::router(state);

    // ── 6. Bind & Serve ───────────────────────────────────────────────────────
    info!(?addr, "🚀 Sentinel server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for driver in drivers {
        driver.abort();
    }
    info!("👋 Sentinel stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler available: run until killed
        std::future::pending::<()>().await;
    }
    info!("🛑 shutdown requested");
}
