//! In-process fakes for the engine's collaborators, plus a wired-up harness.
//!
//! `FakeGateway` keeps its own exchange truth (positions, prices, balance)
//! so tests can check the store against what the "exchange" holds.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::engine::agent_client::{AgentCaller, AgentEndpoint};
use crate::engine::executor::{Executor, OpenSize, ReentryCooldown};
use crate::engine::monitor::PositionMonitor;
use crate::engine::reverse::{ReverseConfig, ReverseEngine};
use crate::engine::risk::{RiskLimits, RiskManager};
use crate::engine::scanner::ScanAggregator;
use crate::engine::scheduler::ScanPipeline;
use crate::engine::store::PositionStore;
use crate::engine::trailing::TrailingConfig;
use crate::error::{GatewayError, OracleError};
use crate::events::EventBus;
use crate::gateway::{Balance, CloseFill, ExchangeGateway, ExchangePosition, OpenFill, OpenOrder};
use crate::insights::LearningClient;
use crate::models::analysis::{
    FibonacciReport, GannReport, SentimentLabel, SentimentReport, TechnicalReport, TimeframeReading, Trend,
};
use crate::models::{
    AgentKind, AgentPayload, AnalysisBundle, AnalysisResult, Direction, FailureKind, Position, PositionOrigin,
    Side, Symbol, TradeIntent,
};
use crate::oracle::{DecisionAdapter, DecisionOracle, DecisionRequest, Verdict};
use crate::sink::{Auditor, MemorySink};

// ─── Analysis fixtures ────────────────────────────────────────────────────────

pub fn ok_result(kind: AgentKind, symbol: &str) -> AnalysisResult {
    let payload = match kind {
        AgentKind::Technical => AgentPayload::Technical(TechnicalReport {
            timeframes: BTreeMap::from([(
                "60".to_string(),
                TimeframeReading {
                    price:     Some(100.0),
                    trend:     Some(Trend::Bullish),
                    rsi:       Some(58.0),
                    macd_hist: Some(0.4),
                    atr:       Some(1.2),
                    ema_20:    Some(99.1),
                },
            )]),
        }),
        AgentKind::Fibonacci => AgentPayload::Fibonacci(FibonacciReport {
            price:  100.0,
            levels: BTreeMap::from([("0.618".to_string(), 95.0), ("1.0".to_string(), 104.0)]),
        }),
        AgentKind::Gann => AgentPayload::Gann(GannReport {
            price:      100.0,
            support:    95.0,
            resistance: 105.0,
            trend:      Trend::Neutral,
        }),
        AgentKind::Sentiment => AgentPayload::Sentiment(SentimentReport {
            score:         0.35,
            label:         SentimentLabel::Positive,
            article_count: 12,
        }),
    };
    AnalysisResult::success(&kind.to_string(), kind, Symbol::new(symbol), payload)
}

/// Technical + sentiment succeeded, gann timed out.
pub fn eligible_bundle(symbol: &str) -> AnalysisBundle {
    let mut bundle = AnalysisBundle::new(Symbol::new(symbol));
    bundle.insert(ok_result(AgentKind::Technical, symbol));
    bundle.insert(ok_result(AgentKind::Sentiment, symbol));
    bundle.insert(AnalysisResult::failure(
        "gann",
        AgentKind::Gann,
        Symbol::new(symbol),
        FailureKind::Transport,
        "timed out",
    ));
    bundle
}

pub fn intent(symbol: &str, direction: Direction, size_fraction: f64, leverage: u32) -> TradeIntent {
    TradeIntent {
        intent_id:  Uuid::new_v4(),
        symbol:     Symbol::new(symbol),
        direction,
        confidence: 80.0,
        leverage,
        size_fraction,
        rationale:  "test".into(),
        created_at: Utc::now(),
    }
}

// ─── Agents ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeAgentCaller {
    failing:       HashSet<AgentKind>,
    delay:         Option<Duration>,
    calls:         AtomicUsize,
    in_flight:     AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeAgentCaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_kind(mut self, kind: AgentKind) -> Self {
        self.failing.insert(kind);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentCaller for FakeAgentCaller {
    async fn call(&self, endpoint: &AgentEndpoint, symbol: &Symbol, _timeout: Duration) -> AnalysisResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&endpoint.kind) {
            AnalysisResult::failure(&endpoint.name, endpoint.kind, symbol.clone(), FailureKind::Transport, "injected")
        } else {
            ok_result(endpoint.kind, symbol.as_str())
        }
    }
}

// ─── Oracle ───────────────────────────────────────────────────────────────────

pub struct FakeOracle {
    verdicts: Option<Vec<Verdict>>,
    delay:    Option<Duration>,
    panics:   bool,
    calls:    AtomicUsize,
}

impl FakeOracle {
    pub fn answering(verdicts: Vec<Verdict>) -> Self {
        Self { verdicts: Some(verdicts), delay: None, panics: false, calls: AtomicUsize::new(0) }
    }

    pub fn failing() -> Self {
        Self { verdicts: None, delay: None, panics: false, calls: AtomicUsize::new(0) }
    }

    /// Panics inside `decide`, like a back-end bug would.
    pub fn panicking() -> Self {
        Self { verdicts: None, delay: None, panics: true, calls: AtomicUsize::new(0) }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionOracle for FakeOracle {
    async fn decide(&self, _request: &DecisionRequest) -> Result<Vec<Verdict>, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panics {
            panic!("oracle back-end bug");
        }
        self.verdicts
            .clone()
            .ok_or_else(|| OracleError::Transport("connection refused".into()))
    }
}

// ─── Exchange ─────────────────────────────────────────────────────────────────

struct Book {
    positions:      HashMap<Symbol, ExchangePosition>,
    prices:         HashMap<Symbol, f64>,
    balance:        Balance,
    fail_opens:     bool,
    fail_closes:    bool,
    fail_marks:     bool,
    fail_positions: bool,
    fault_rate:     f64,
    rng:            StdRng,
    open_delay:     Option<Duration>,
}

impl Book {
    /// Seeded, so a failing run replays with the same seed.
    fn roll(&mut self) -> bool {
        self.fault_rate > 0.0 && self.rng.gen_bool(self.fault_rate.min(1.0))
    }
}

pub struct FakeGateway {
    book:            Mutex<Book>,
    balance_calls:   AtomicUsize,
    open_calls:      AtomicUsize,
    close_calls:     AtomicUsize,
    duplicate_opens: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(Book {
                positions:      HashMap::new(),
                prices:         HashMap::new(),
                balance:        Balance { total: 10_000.0, free: 10_000.0 },
                fail_opens:     false,
                fail_closes:    false,
                fail_marks:     false,
                fail_positions: false,
                fault_rate:     0.0,
                rng:            StdRng::seed_from_u64(0),
                open_delay:     None,
            }),
            balance_calls:   AtomicUsize::new(0),
            open_calls:      AtomicUsize::new(0),
            close_calls:     AtomicUsize::new(0),
            duplicate_opens: AtomicUsize::new(0),
        }
    }

    fn book(&self) -> std::sync::MutexGuard<'_, Book> {
        self.book.lock().unwrap()
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.book().prices.insert(Symbol::new(symbol), price);
    }

    pub fn fail_opens(&self, on: bool) {
        self.book().fail_opens = on;
    }

    pub fn fail_closes(&self, on: bool) {
        self.book().fail_closes = on;
    }

    pub fn fail_marks(&self, on: bool) {
        self.book().fail_marks = on;
    }

    pub fn fail_positions(&self, on: bool) {
        self.book().fail_positions = on;
    }

    /// Every call fails with probability `rate`.
    pub fn set_fault_rate(&self, rate: f64, seed: u64) {
        let mut book = self.book();
        book.fault_rate = rate;
        book.rng = StdRng::seed_from_u64(seed);
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.book().open_delay = Some(delay);
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.book().positions.contains_key(&Symbol::new(symbol))
    }

    pub fn open_position_count(&self) -> usize {
        self.book().positions.len()
    }

    /// Simulate an external close (liquidation, manual close on the venue).
    pub fn forget_position(&self, symbol: &str) {
        self.book().positions.remove(&Symbol::new(symbol));
    }

    /// Simulate a position opened outside the engine.
    pub fn inject_position(&self, symbol: &str, side: Side, entry: f64, notional: f64, leverage: u32) {
        let symbol = Symbol::new(symbol);
        let mut book = self.book();
        book.prices.insert(symbol.clone(), entry);
        book.positions.insert(
            symbol.clone(),
            ExchangePosition { symbol, side, entry_price: entry, notional, leverage, mark_price: Some(entry) },
        );
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Opens received for a symbol the exchange already held.
    pub fn duplicate_opens(&self) -> usize {
        self.duplicate_opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeGateway for FakeGateway {
    async fn get_balance(&self) -> Result<Balance, GatewayError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        let mut book = self.book();
        if book.roll() {
            return Err(GatewayError::Transport("injected balance fault".into()));
        }
        Ok(book.balance)
    }

    async fn get_open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError> {
        let mut book = self.book();
        if book.fail_positions || book.roll() {
            return Err(GatewayError::Transport("injected positions fault".into()));
        }
        Ok(book
            .positions
            .values()
            .map(|p| ExchangePosition { mark_price: book.prices.get(&p.symbol).copied(), ..p.clone() })
            .collect())
    }

    async fn open_position(&self, order: &OpenOrder) -> Result<OpenFill, GatewayError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.book().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut book = self.book();
        if book.fail_opens || book.roll() {
            return Err(GatewayError::Rejected("injected open fault".into()));
        }
        let price = *book
            .prices
            .get(&order.symbol)
            .ok_or_else(|| GatewayError::Rejected(format!("no market for {}", order.symbol)))?;
        if book.positions.contains_key(&order.symbol) {
            self.duplicate_opens.fetch_add(1, Ordering::SeqCst);
        }
        book.positions.insert(
            order.symbol.clone(),
            ExchangePosition {
                symbol:      order.symbol.clone(),
                side:        order.side,
                entry_price: price,
                notional:    order.size,
                leverage:    order.leverage,
                mark_price:  Some(price),
            },
        );
        Ok(OpenFill { order_id: Some(Uuid::new_v4().to_string()), entry_price: price })
    }

    async fn close_position(&self, symbol: &Symbol) -> Result<CloseFill, GatewayError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let mut book = self.book();
        if book.fail_closes || book.roll() {
            return Err(GatewayError::Rejected("injected close fault".into()));
        }
        let position = book
            .positions
            .remove(symbol)
            .ok_or_else(|| GatewayError::Rejected(format!("no open position for {symbol}")))?;
        let exit_price = book.prices.get(symbol).copied().unwrap_or(position.entry_price);
        Ok(CloseFill { exit_price })
    }

    async fn get_mark_price(&self, symbol: &Symbol) -> Result<f64, GatewayError> {
        let mut book = self.book();
        if book.fail_marks || book.roll() {
            return Err(GatewayError::Transport("injected mark fault".into()));
        }
        book.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::Rejected(format!("no market for {symbol}")))
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub limits:                   RiskLimits,
    pub max_consecutive_failures: u32,
    pub hard_stop_loss_pct:       f64,
    pub reverse_cooldown:         Duration,
    pub reentry:                  ReentryCooldown,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            limits:                   RiskLimits { max_positions: 3, max_leverage: 10, max_size_pct: 20.0 },
            max_consecutive_failures: 3,
            hard_stop_loss_pct:       0.0,
            reverse_cooldown:         Duration::from_secs(1800),
            reentry:                  ReentryCooldown::disabled(),
        }
    }
}

/// Every engine component wired to the fakes, the way `build_state` wires the
/// real ones.
pub struct Harness {
    pub gateway:  Arc<FakeGateway>,
    pub store:    Arc<PositionStore>,
    pub risk:     Arc<RiskManager>,
    pub sink:     Arc<MemorySink>,
    pub auditor:  Auditor,
    pub events:   EventBus,
    pub executor: Arc<Executor>,
    pub reverse:  Arc<ReverseEngine>,
    pub monitor:  Arc<PositionMonitor>,
    limits:       RiskLimits,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    pub fn with_hard_stop(pct: f64) -> Self {
        Self::with_options(HarnessOptions { hard_stop_loss_pct: pct, ..HarnessOptions::default() })
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        let timeout = Duration::from_secs(1);
        let gateway = Arc::new(FakeGateway::new());
        let store = Arc::new(PositionStore::new());
        let risk = Arc::new(RiskManager::new(options.limits, options.max_consecutive_failures));
        let sink = Arc::new(MemorySink::new(1_000));
        let auditor = Auditor::new(sink.clone());
        let events = EventBus::new();
        let recorder = Arc::new(LearningClient::new(reqwest::Client::new(), None, timeout));

        let executor = Arc::new(Executor::new(
            Arc::clone(&store),
            Arc::clone(&risk),
            gateway.clone(),
            auditor.clone(),
            events.clone(),
            recorder,
            timeout,
            options.reentry,
        ));
        let reverse = Arc::new(ReverseEngine::new(
            ReverseConfig {
                enabled:             true,
                loss_threshold_pct:  2.0,
                recovery_multiplier: 1.5,
                cooldown:            options.reverse_cooldown,
            },
            Arc::clone(&executor),
            auditor.clone(),
            events.clone(),
        ));
        let monitor = Arc::new(PositionMonitor::new(
            Arc::clone(&executor),
            Arc::clone(&reverse),
            gateway.clone(),
            TrailingConfig { enabled: true, activation_pct: 1.8, callback_pct: 1.0 },
            options.hard_stop_loss_pct,
            timeout,
            auditor.clone(),
            events.clone(),
        ));

        Self { gateway, store, risk, sink, auditor, events, executor, reverse, monitor, limits: options.limits }
    }

    pub fn limits(&self) -> RiskLimits {
        self.limits
    }

    /// Open a LONG of exactly `notional` USDT, panicking on failure.
    pub async fn open_long(&self, symbol: &str, notional: f64, leverage: u32) -> Position {
        let symbol = Symbol::new(symbol);
        let _guard = self.store.lock_symbol(&symbol).await;
        self.executor
            .open_locked(&symbol, Side::Long, leverage, OpenSize::Notional(notional), PositionOrigin::Scan, &self.limits)
            .await
            .unwrap()
    }

    /// Scan pipeline over BTC/ETH/SOL with a technical and a sentiment agent.
    pub fn pipeline(&self, caller: Arc<dyn AgentCaller>, oracle: Arc<dyn DecisionOracle>) -> ScanPipeline {
        let agents = vec![
            AgentEndpoint::new(AgentKind::Technical, "http://technical"),
            AgentEndpoint::new(AgentKind::Sentiment, "http://sentiment"),
        ];
        ScanPipeline::new(
            vec!["BTCUSDT".into(), "ETHUSDT".into(), "SOLUSDT".into()],
            ScanAggregator::new(caller, agents, Duration::from_secs(1), 4),
            DecisionAdapter::new(oracle, 60.0, Duration::from_secs(1)),
            Arc::new(LearningClient::new(reqwest::Client::new(), None, Duration::from_secs(1))),
            Arc::clone(&self.executor),
            self.auditor.clone(),
            self.events.clone(),
        )
    }
}
