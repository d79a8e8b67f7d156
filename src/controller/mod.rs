//! Controller: the scan/act loop that composes the engine.
//!
//! One controller task owns the risk gate and drives evaluate → validate →
//! execute → record, one execution in flight at most. Everything the
//! operator sees (status, stats, risk counters) is written through
//! [`SharedState`] once per tick.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::arbitrage::evaluator::evaluate;
use crate::arbitrage::executor::ArbitrageExecutor;
use crate::config::Config;
use crate::error::Result;
use crate::exchange::ExchangeApi;
use crate::history::TradeHistory;
use crate::metrics;
use crate::orderbook::cache::BookCache;
use crate::portfolio::PortfolioCache;
use crate::risk::{now_local, RiskGate, RiskStats};

/// Operating mode selected by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Trading enabled.
    Auto,
    /// Market data and evaluation only; the risk gate rejects everything.
    Monitor,
}

/// Controller lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ControllerStatus {
    /// Not running.
    Stopped,
    /// Spinning up.
    Starting,
    /// Scan loop active.
    Running,
    /// Shutdown in progress.
    Stopping,
    /// Terminal failure; requires a fresh start.
    Error,
}

impl ControllerStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ControllerStatus::Starting,
            2 => ControllerStatus::Running,
            3 => ControllerStatus::Stopping,
            4 => ControllerStatus::Error,
            _ => ControllerStatus::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ControllerStatus::Stopped => 0,
            ControllerStatus::Starting => 1,
            ControllerStatus::Running => 2,
            ControllerStatus::Stopping => 3,
            ControllerStatus::Error => 4,
        }
    }
}

/// Counters reported to the operator.
#[derive(Debug, Clone, Serialize)]
pub struct TradingStats {
    /// Unix seconds the run started at.
    pub started_at_unix: i64,
    /// Evaluation ticks completed.
    pub scans: u64,
    /// Opportunities emitted by the evaluator.
    pub opportunities: u64,
    /// Executions attempted.
    pub executions: u64,
    /// Executions with every leg filled.
    pub successes: u64,
    /// Executions that aborted or errored.
    pub failures: u64,
    /// Opportunities the risk gate rejected.
    pub rejections: u64,
    /// Net realized profit, start-asset/valuation units.
    pub net_profit: Decimal,
    /// Unix seconds of the newest opportunity, if any.
    pub last_opportunity_unix: Option<i64>,
    /// Unix seconds of the newest execution, if any.
    pub last_execution_unix: Option<i64>,
}

impl TradingStats {
    fn new(now: OffsetDateTime) -> Self {
        Self {
            started_at_unix: now.unix_timestamp(),
            scans: 0,
            opportunities: 0,
            executions: 0,
            successes: 0,
            failures: 0,
            rejections: 0,
            net_profit: Decimal::ZERO,
            last_opportunity_unix: None,
            last_execution_unix: None,
        }
    }
}

/// Status snapshot shared with the HTTP surface. The controller writes, the
/// API handlers read.
#[derive(Debug)]
pub struct SharedState {
    status: AtomicU8,
    stats: RwLock<TradingStats>,
    risk: RwLock<Option<RiskStats>>,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            status: AtomicU8::new(ControllerStatus::Stopped.as_u8()),
            stats: RwLock::new(TradingStats::new(OffsetDateTime::now_utc())),
            risk: RwLock::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ControllerStatus {
        ControllerStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub(crate) fn set_status(&self, status: ControllerStatus) {
        self.status.store(status.as_u8(), Ordering::SeqCst);
    }

    /// Latest trading counters.
    pub fn stats(&self) -> TradingStats {
        self.stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|_| TradingStats::new(OffsetDateTime::now_utc()))
    }

    fn set_stats(&self, stats: TradingStats) {
        if let Ok(mut guard) = self.stats.write() {
            *guard = stats;
        }
    }

    /// Latest risk counters, once the loop has produced any.
    pub fn risk_stats(&self) -> Option<RiskStats> {
        self.risk.read().ok().and_then(|r| r.clone())
    }

    fn set_risk(&self, stats: RiskStats) {
        if let Ok(mut guard) = self.risk.write() {
            *guard = Some(stats);
        }
    }

    /// Whether the scan loop is serving.
    pub fn is_ready(&self) -> bool {
        self.status() == ControllerStatus::Running
    }
}

struct TickState<E: ExchangeApi> {
    config: Arc<Config>,
    client: Arc<E>,
    books: Arc<BookCache>,
    portfolio: Arc<PortfolioCache>,
    risk: RiskGate,
    executor: ArbitrageExecutor<E>,
    history: TradeHistory,
    stats: TradingStats,
}

impl<E: ExchangeApi + 'static> TickState<E> {
    /// One scan/act cycle: refresh, evaluate, gate, execute at most once.
    async fn tick(&mut self, shared: &SharedState) -> Result<()> {
        self.stats.scans += 1;
        metrics::inc_scans();

        // Kick a background refresh when the snapshot ages out. The tick
        // itself never blocks on REST for balances.
        if self.portfolio.is_stale(self.config.balance_refresh) && !self.config.is_public_only() {
            let portfolio = self.portfolio.clone();
            let client = self.client.clone();
            let retries = self.config.network_retry_count;
            let delay = self.config.network_retry_delay;
            tokio::spawn(async move {
                let _ = portfolio.refresh(client.as_ref(), retries, delay).await;
            });
        }

        let eval_timer = std::time::Instant::now();
        let now = OffsetDateTime::now_utc();
        let opportunities = evaluate(&self.config, &self.books, now);
        metrics::record_evaluation_latency(eval_timer);

        if !opportunities.is_empty() {
            self.stats.opportunities += opportunities.len() as u64;
            self.stats.last_opportunity_unix = Some(now.unix_timestamp());
            metrics::inc_opportunities_detected(opportunities.len() as u64);
        }

        for opportunity in &opportunities {
            let snapshot = self.portfolio.snapshot();
            let decision = self.risk.validate(
                opportunity,
                snapshot.as_ref(),
                None,
                &self.books,
                now_local(),
            );

            if !decision.passed {
                if let Some(reason) = decision.reason {
                    info!(
                        route = %opportunity.path,
                        reason = %reason,
                        "opportunity rejected"
                    );
                    self.risk.record_rejection(reason);
                }
                self.stats.rejections += 1;
                metrics::inc_risk_rejections();
                continue;
            }

            for warning in &decision.warnings {
                warn!(route = %opportunity.path, "{warning}");
            }

            let stake = decision.suggested_stake;
            self.stats.executions += 1;
            self.stats.last_execution_unix = Some(now.unix_timestamp());

            match self.executor.execute(opportunity, stake).await {
                Ok(result) => {
                    let total = self
                        .portfolio
                        .snapshot()
                        .map(|p| p.total_value(&self.books))
                        .unwrap_or(Decimal::ZERO);
                    self.risk
                        .record(result.success, result.realized_profit, total, now_local());

                    if result.success {
                        self.stats.successes += 1;
                    } else {
                        self.stats.failures += 1;
                    }
                    self.stats.net_profit += result.realized_profit;

                    if let Err(e) = self.history.append(&result) {
                        warn!(error = %e, "failed to append trade record");
                    }
                }
                Err(e) => {
                    warn!(route = %opportunity.path, error = %e, "execution refused");
                    let total = self
                        .portfolio
                        .snapshot()
                        .map(|p| p.total_value(&self.books))
                        .unwrap_or(Decimal::ZERO);
                    self.risk.record(false, Decimal::ZERO, total, now_local());
                    self.stats.failures += 1;
                }
            }

            // One execution per tick; later opportunities are recomputed
            // from fresher books on the next pass.
            break;
        }

        shared.set_stats(self.stats.clone());
        shared.set_risk(self.risk.stats());
        Ok(())
    }
}

/// Owns the scan loop task and its lifecycle.
pub struct Controller<E: ExchangeApi + 'static> {
    shared: Arc<SharedState>,
    state: Arc<tokio::sync::Mutex<TickState<E>>>,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl<E: ExchangeApi + 'static> Controller<E> {
    /// Wire a controller from its collaborators.
    pub fn new(
        config: Arc<Config>,
        client: Arc<E>,
        books: Arc<BookCache>,
        portfolio: Arc<PortfolioCache>,
        mode: Mode,
    ) -> Self {
        let trading_enabled = mode == Mode::Auto && !config.is_public_only();
        if mode == Mode::Auto && config.is_public_only() {
            warn!("no API credentials: running as monitor despite auto mode");
        }

        let risk = RiskGate::new(config.clone(), trading_enabled);
        let executor = ArbitrageExecutor::new(
            client.clone(),
            config.clone(),
            books.clone(),
            portfolio.clone(),
        );
        let history = TradeHistory::new(&config.history_file);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            shared: Arc::new(SharedState::new()),
            state: Arc::new(tokio::sync::Mutex::new(TickState {
                config,
                client,
                books,
                portfolio,
                risk,
                executor,
                history,
                stats: TradingStats::new(OffsetDateTime::now_utc()),
            })),
            shutdown_tx,
            handle: None,
        }
    }

    /// Handle for the HTTP status surface.
    pub fn shared(&self) -> Arc<SharedState> {
        self.shared.clone()
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ControllerStatus {
        self.shared.status()
    }

    /// Latest trading counters.
    pub fn stats(&self) -> TradingStats {
        self.shared.stats()
    }

    /// Run a single tick without starting the loop. Stepping seam for the
    /// scenario tests.
    pub async fn tick_once(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.tick(&self.shared).await
    }

    /// Start the scan loop. Idempotent while running; a stopped or errored
    /// controller starts a fresh run.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        self.shared.set_status(ControllerStatus::Starting);
        let state = self.state.clone();
        let shared = self.shared.clone();
        let (shutdown_tx, mut shutdown) = watch::channel(false);
        self.shutdown_tx = shutdown_tx;

        let handle = tokio::spawn(async move {
            let interval = {
                let state = state.lock().await;
                info!(
                    interval_ms = state.config.monitor_interval.as_millis() as u64,
                    paths = state.config.paths.len(),
                    "controller starting"
                );
                state.config.monitor_interval
            };
            shared.set_status(ControllerStatus::Running);
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let result = {
                    let mut state = state.lock().await;
                    state.tick(&shared).await
                };
                if let Err(e) = result {
                    error!(error = %e, "fatal controller error");
                    shared.set_status(ControllerStatus::Error);
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
            info!("controller loop exited");
        });

        self.handle = Some(handle);
        Ok(())
    }

    /// Stop the scan loop and wait for it to drain. Idempotent: a second
    /// stop returns the same terminal state.
    pub async fn stop(&mut self) -> ControllerStatus {
        let Some(handle) = self.handle.take() else {
            // Never started or already stopped; Error stays terminal.
            if self.shared.status() != ControllerStatus::Error {
                self.shared.set_status(ControllerStatus::Stopped);
            }
            return self.shared.status();
        };

        self.shared.set_status(ControllerStatus::Stopping);
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = handle.await {
            error!(error = %e, "controller task join failed");
            self.shared.set_status(ControllerStatus::Error);
            return ControllerStatus::Error;
        }

        if self.shared.status() != ControllerStatus::Error {
            self.shared.set_status(ControllerStatus::Stopped);
        }
        info!(status = %self.shared.status(), "controller stopped");
        self.shared.status()
    }
}
