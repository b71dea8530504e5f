//! # config — read configuration from environment variables
//!
//! Everything has a default except what the chosen back-ends strictly need
//! (an API key for the LLM oracle). Unparseable numbers fall back to the
//! default with a warning rather than aborting startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::warn;

use crate::engine::agent_client::AgentEndpoint;
use crate::engine::executor::ReentryCooldown;
use crate::engine::reverse::ReverseConfig;
use crate::engine::risk::RiskLimits;
use crate::engine::trailing::TrailingConfig;
use crate::models::{AgentKind, Symbol};
use crate::oracle::{OracleBackend, OracleConfig};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr:        SocketAddr,
    pub symbols:          Vec<Symbol>,

    // ── Scan path ─────────────────────────────────────────────────────────────
    pub agents:           Vec<AgentEndpoint>,
    pub agent_timeout:    Duration,
    pub retry:            RetryPolicy,
    pub scan_concurrency: usize,
    pub oracle:           OracleConfig,
    pub min_confidence:   f64,

    // ── Exchange / collaborators ─────────────────────────────────────────────
    pub exchange_url:     String,
    pub exchange_timeout: Duration,
    /// `None` disables insights and trade recording.
    pub learning_url:     Option<String>,
    pub audit_log_path:   Option<PathBuf>,
    pub database_url:     Option<String>,
    /// `None` = dev mode, every request allowed.
    pub api_key:          Option<String>,

    // ── Drivers ───────────────────────────────────────────────────────────────
    pub scan_interval:    Duration,
    pub monitor_interval: Duration,
    pub equity_interval:  Duration,

    // ── Risk / position lifecycle ────────────────────────────────────────────
    pub limits:                   RiskLimits,
    pub max_consecutive_failures: u32,
    pub reverse:                  ReverseConfig,
    pub trailing:                 TrailingConfig,
    /// Loss (positive %) that closes a position outright. 0 disables.
    pub hard_stop_loss_pct:       f64,
    pub reentry:                  ReentryCooldown,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let vars = Vars(&lookup);

        let bind_addr: SocketAddr = vars
            .string("BIND_ADDR", "0.0.0.0:3000")
            .parse()
            .context("BIND_ADDR must be a socket address")?;

        let symbols: Vec<Symbol> = vars
            .string("SYMBOLS", "BTCUSDT,ETHUSDT,SOLUSDT")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Symbol::new)
            .collect();
        if symbols.is_empty() {
            bail!("SYMBOLS must name at least one symbol");
        }

        let agents = [
            (AgentKind::Technical, "TECHNICAL_AGENT_URL", "http://technical-analyzer-agent:8000/analyze_multi_tf"),
            (AgentKind::Fibonacci, "FIBONACCI_AGENT_URL", "http://fibonacci-cyclical-agent:8000/analyze_fibonacci"),
            (AgentKind::Gann,      "GANN_AGENT_URL",      "http://gann-analyzer-agent:8000/analyze_gann"),
            (AgentKind::Sentiment, "SENTIMENT_AGENT_URL", "http://news-sentiment-agent:8000/analyze_sentiment"),
        ]
        .into_iter()
        .filter_map(|(kind, key, default)| {
            // An explicitly empty URL disables the agent.
            let url = vars.string(key, default);
            (!url.trim().is_empty()).then(|| AgentEndpoint::new(kind, url))
        })
        .collect::<Vec<_>>();
        if agents.is_empty() {
            bail!("at least one analysis agent URL must be configured");
        }

        let oracle_timeout = Duration::from_secs(vars.parse("ORACLE_TIMEOUT_SECS", 60));
        let backend = match vars.string("ORACLE_MODE", "http").to_lowercase().as_str() {
            "http" => OracleBackend::Http {
                url: vars.string("ORACLE_URL", "http://master-ai-agent:8000/decide_batch"),
            },
            "claude" => OracleBackend::Claude {
                api_key: vars.required("AI_API_KEY")?,
            },
            "openai" => OracleBackend::OpenAi {
                api_key: vars.required("AI_API_KEY")?,
            },
            other => bail!("Unknown ORACLE_MODE: '{other}'. Use 'http', 'claude' or 'openai'"),
        };

        let limits = RiskLimits {
            max_positions: vars.parse("MAX_POSITIONS", 3),
            max_leverage:  vars.parse("MAX_LEVERAGE", 10),
            max_size_pct:  vars.parse("MAX_SIZE_PCT", 20.0),
        };
        limits.validate().map_err(anyhow::Error::msg)?;

        let reverse = ReverseConfig {
            enabled:             vars.flag("REVERSE_ENABLED", true),
            loss_threshold_pct:  vars.parse("REVERSE_LOSS_THRESHOLD_PCT", 2.0),
            recovery_multiplier: vars.parse("REVERSE_RECOVERY_MULTIPLIER", 1.5),
            cooldown:            Duration::from_secs(vars.parse("REVERSE_COOLDOWN_SECS", 1800)),
        };
        if reverse.recovery_multiplier <= 0.0 || reverse.loss_threshold_pct <= 0.0 {
            bail!("REVERSE_LOSS_THRESHOLD_PCT and REVERSE_RECOVERY_MULTIPLIER must be positive");
        }

        // Never shorter than the reverse cooldown.
        let reentry = ReentryCooldown {
            min_roi_pct: vars.parse::<f64>("COOLDOWN_PNL_THRESHOLD_PCT", 5.0).max(0.0),
            window:      Duration::from_secs(vars.parse::<u64>("COOLDOWN_MINUTES", 60).saturating_mul(60)).max(reverse.cooldown),
        };

        let trailing = TrailingConfig {
            enabled:        vars.flag("TRAILING_ENABLED", true),
            activation_pct: vars.parse("TRAILING_ACTIVATION_PCT", 1.8),
            callback_pct:   vars.parse("TRAILING_CALLBACK_PCT", 1.0),
        };
        if trailing.callback_pct <= 0.0 || trailing.activation_pct <= 0.0 {
            bail!("TRAILING_ACTIVATION_PCT and TRAILING_CALLBACK_PCT must be positive");
        }

        Ok(Self {
            bind_addr,
            symbols,
            agents,
            agent_timeout:    Duration::from_secs(vars.parse("AGENT_TIMEOUT_SECS", 30)),
            retry:            RetryPolicy::new(
                vars.parse("RETRY_ATTEMPTS", 1),
                Duration::from_millis(vars.parse("RETRY_BACKOFF_MS", 500)),
            ),
            scan_concurrency: vars.parse::<usize>("SCAN_CONCURRENCY", 8).max(1),
            oracle:           OracleConfig { backend, timeout: oracle_timeout },
            min_confidence:   vars.parse::<f64>("MIN_CONFIDENCE", 60.0).clamp(0.0, 100.0),
            exchange_url:     vars.string("EXCHANGE_URL", "http://position-manager-agent:8000"),
            exchange_timeout: Duration::from_secs(vars.parse("EXCHANGE_TIMEOUT_SECS", 10)),
            learning_url:     vars.optional("LEARNING_AGENT_URL"),
            audit_log_path:   vars.optional("AUDIT_LOG_PATH").map(PathBuf::from),
            database_url:     vars.optional("DATABASE_URL"),
            api_key:          vars.optional("API_KEY"),
            scan_interval:    Duration::from_secs(vars.parse::<u64>("SCAN_INTERVAL_SECS", 900).max(1)),
            monitor_interval: Duration::from_secs(vars.parse::<u64>("MONITOR_INTERVAL_SECS", 30).max(1)),
            equity_interval:  Duration::from_secs(vars.parse::<u64>("EQUITY_INTERVAL_SECS", 60).max(1)),
            limits,
            max_consecutive_failures: vars.parse("RISK_MAX_CONSECUTIVE_FAILS", 3),
            reverse,
            trailing,
            hard_stop_loss_pct: vars.parse::<f64>("HARD_STOP_LOSS_PCT", 0.0).max(0.0),
            reentry,
        })
    }
}

// ─── Lookup helpers ───────────────────────────────────────────────────────────

struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &str) -> anyhow::Result<String> {
        self.optional(key)
            .with_context(|| format!("{key} environment variable is required"))
    }

    fn parse<T: FromStr + Copy + std::fmt::Debug>(&self, key: &str, default: T) -> T {
        match self.optional(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(key, value = %raw, ?default, "⚠️ unparseable config value, using default");
                default
            }),
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.optional(key).map(|v| v.to_lowercase()) {
            None => default,
            Some(v) => matches!(v.as_str(), "1" | "true" | "yes" | "on"),
        }
    }
}
