//! Sequenced execution of an opportunity's legs.
//!
//! One execution in flight at a time; the controller serializes calls. Legs
//! run strictly in order as marketable limit orders with per-leg timeouts.
//! An aborted chain never reverses earlier fills: they are valued and
//! reported, and the risk gate learns from the realized P&L.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::arbitrage::evaluator::Opportunity;
use crate::arbitrage::path::{Action, Pair, PathStep};
use crate::config::Config;
use crate::error::TradingError;
use crate::exchange::{ExchangeApi, OrderRequest, OrderType};
use crate::metrics;
use crate::orderbook::cache::BookCache;
use crate::portfolio::PortfolioCache;
use crate::trading::{cancel_quietly, place_order, wait_for_terminal};

/// Terminal disposition of one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    /// Filled to within the dust tolerance.
    Filled,
    /// Cancelled before any fill.
    Cancelled,
    /// Placement or exchange failure.
    Failed,
    /// Under-filled at the timeout; chain aborted.
    TimedOut,
    /// Never reached because an earlier leg aborted.
    NotAttempted,
}

/// Outcome of a single leg.
#[derive(Debug, Clone, Serialize)]
pub struct LegResult {
    /// Instrument traded.
    pub pair: String,
    /// Side taken.
    pub action: Action,
    /// Exchange order id, when placement succeeded.
    pub order_id: Option<String>,
    /// Size requested, base-asset units.
    pub requested_size: Decimal,
    /// Size actually filled.
    pub filled_size: Decimal,
    /// Average fill price; present iff `filled_size > 0`.
    pub avg_price: Option<Decimal>,
    /// Disposition.
    pub status: LegStatus,
    /// Wall time spent on this leg, milliseconds.
    pub elapsed_ms: u64,
}

impl LegResult {
    fn not_attempted(step: &PathStep) -> Self {
        Self {
            pair: step.pair.id(),
            action: step.action,
            order_id: None,
            requested_size: Decimal::ZERO,
            filled_size: Decimal::ZERO,
            avg_price: None,
            status: LegStatus::NotAttempted,
            elapsed_ms: 0,
        }
    }
}

/// Result bundle for one execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Route executed, e.g. `USDT->BTC->USDC->USDT`.
    pub route: String,
    /// Stake committed, start-asset units.
    pub stake: Decimal,
    /// Holdings at the end, valued in the start asset (estimated through
    /// cache mid-prices when the chain aborted mid-cycle).
    pub final_amount: Decimal,
    /// `final_amount - stake`. Negative on partial failure.
    pub realized_profit: Decimal,
    /// All legs filled to within tolerance.
    pub success: bool,
    /// Abort cause, when `success` is false.
    pub error: Option<String>,
    /// Per-leg outcomes, one per path step.
    pub legs: Vec<LegResult>,
    /// When the execution started.
    pub started_at: OffsetDateTime,
}

/// Executes opportunities leg by leg against the exchange.
pub struct ArbitrageExecutor<E> {
    client: Arc<E>,
    config: Arc<Config>,
    books: Arc<BookCache>,
    portfolio: Arc<PortfolioCache>,
    /// Monotonic source for client order ids.
    next_client_id: AtomicU64,
}

impl<E: ExchangeApi> ArbitrageExecutor<E> {
    /// Create an executor.
    pub fn new(
        client: Arc<E>,
        config: Arc<Config>,
        books: Arc<BookCache>,
        portfolio: Arc<PortfolioCache>,
    ) -> Self {
        Self {
            client,
            config,
            books,
            portfolio,
            next_client_id: AtomicU64::new(1),
        }
    }

    /// Execute `opportunity` with `stake` in the start asset. Pre-trade
    /// failures return `Err`; a chain that aborts mid-way returns
    /// `Ok(result)` with `success == false`.
    #[instrument(skip(self, opportunity), fields(route = %opportunity.path, stake = %stake))]
    pub async fn execute(
        &self,
        opportunity: &Opportunity,
        stake: Decimal,
    ) -> Result<ExecutionResult, TradingError> {
        let started_at = OffsetDateTime::now_utc();
        let timer = std::time::Instant::now();

        if opportunity.is_expired(self.config.opportunity_max_age, started_at) {
            return Err(TradingError::OpportunityExpired);
        }
        self.pre_trade_check(opportunity, stake)?;

        let path = &opportunity.path;
        let mut legs: Vec<LegResult> = path.steps.iter().map(LegResult::not_attempted).collect();

        info!(route = %path, stake = %stake, "executing arbitrage");
        metrics::inc_executions();

        let mut amount = stake;
        let mut abort: Option<String> = None;

        for (i, step) in path.steps.iter().enumerate() {
            match self.execute_leg(step, amount).await {
                Ok((leg, output)) => {
                    legs[i] = leg;
                    amount = output;
                }
                Err((leg, reason)) => {
                    warn!(route = %path, leg = i + 1, reason = %reason, "chain aborted");
                    legs[i] = leg;
                    abort = Some(format!("leg {} {}: {}", i + 1, step.pair, reason));
                    break;
                }
            }
        }

        // Reconcile with the exchange after any execution.
        if self
            .portfolio
            .refresh(
                self.client.as_ref(),
                self.config.network_retry_count,
                self.config.network_retry_delay,
            )
            .await
            .is_err()
        {
            warn!("post-execution balance refresh failed");
        }

        let success = abort.is_none();
        let final_amount = if success {
            amount
        } else {
            self.value_stranded_holdings(path, &legs, stake)
        };
        let realized_profit = final_amount - stake;

        if success {
            info!(
                route = %path,
                profit = %realized_profit,
                elapsed_ms = timer.elapsed().as_millis() as u64,
                "arbitrage complete"
            );
        } else {
            metrics::inc_executions_failed();
            warn!(
                route = %path,
                realized = %realized_profit,
                "arbitrage aborted, earlier fills kept"
            );
        }

        Ok(ExecutionResult {
            route: path.route(),
            stake,
            final_amount,
            realized_profit,
            success,
            error: abort,
            legs,
            started_at,
        })
    }

    /// Verify the start asset covers the stake plus headroom.
    fn pre_trade_check(
        &self,
        opportunity: &Opportunity,
        stake: Decimal,
    ) -> Result<(), TradingError> {
        let start_asset = opportunity.start_asset();
        let required = stake * self.config.balance_headroom;
        let available = self
            .portfolio
            .snapshot()
            .map(|p| p.free(start_asset))
            .unwrap_or(Decimal::ZERO);

        if available < required {
            return Err(TradingError::InsufficientBalance {
                asset: start_asset.to_string(),
                required,
                available,
            });
        }
        Ok(())
    }

    /// Run one leg to a terminal outcome. `Ok` carries the realized output
    /// amount for the next leg; `Err` carries the leg record and the abort
    /// reason.
    async fn execute_leg(
        &self,
        step: &PathStep,
        input: Decimal,
    ) -> Result<(LegResult, Decimal), (LegResult, TradingError)> {
        let leg_timer = std::time::Instant::now();
        let pair = &step.pair;
        let fee = self.config.fee_for(&pair.id());

        let fail = |status: LegStatus,
                    order_id: Option<String>,
                    requested: Decimal,
                    filled: Decimal,
                    avg: Option<Decimal>,
                    err: TradingError,
                    timer: &std::time::Instant| {
            Err((
                LegResult {
                    pair: pair.id(),
                    action: step.action,
                    order_id,
                    requested_size: requested,
                    filled_size: filled,
                    avg_price: avg,
                    status,
                    elapsed_ms: timer.elapsed().as_millis() as u64,
                },
                err,
            ))
        };

        // Price the leg marketable against the current top of book.
        let ticker = match self.client.get_ticker(pair).await {
            Ok(ticker) => ticker,
            Err(e) => {
                return fail(
                    LegStatus::Failed,
                    None,
                    Decimal::ZERO,
                    Decimal::ZERO,
                    None,
                    TradingError::PlacementFailed(e.to_string()),
                    &leg_timer,
                )
            }
        };

        let one = Decimal::ONE;
        let slip = self.config.slippage_tolerance;
        let (price, size) = match step.action {
            Action::Buy => {
                let price = round_up_to_step(ticker.best_ask * (one + slip), self.config.price_step);
                if price <= Decimal::ZERO {
                    return fail(
                        LegStatus::Failed,
                        None,
                        Decimal::ZERO,
                        Decimal::ZERO,
                        None,
                        TradingError::InvalidParams("non-positive buy price".to_string()),
                        &leg_timer,
                    );
                }
                // Spend `input` quote at the limit price.
                (price, round_down_to_step(input / price, self.config.size_step))
            }
            Action::Sell => {
                let price =
                    round_down_to_step(ticker.best_bid * (one - slip), self.config.price_step);
                (price, round_down_to_step(input, self.config.size_step))
            }
        };

        if size <= Decimal::ZERO || price <= Decimal::ZERO {
            return fail(
                LegStatus::Failed,
                None,
                size,
                Decimal::ZERO,
                None,
                TradingError::InvalidParams(format!(
                    "degenerate order for {pair}: size={size} price={price}"
                )),
                &leg_timer,
            );
        }

        let request = OrderRequest {
            pair: pair.clone(),
            side: step.action,
            order_type: OrderType::Limit,
            size,
            price,
            client_id: format!("triarb{}", self.next_client_id.fetch_add(1, Ordering::SeqCst)),
        };

        let order_id = match place_order(
            self.client.as_ref(),
            &request,
            self.config.network_retry_count,
            self.config.network_retry_delay,
        )
        .await
        {
            Ok(id) => id,
            Err(e) => {
                return fail(
                    LegStatus::Failed,
                    None,
                    size,
                    Decimal::ZERO,
                    None,
                    e,
                    &leg_timer,
                )
            }
        };

        // Local debit; the post-execution refresh reconciles.
        let spent = match step.action {
            Action::Buy => size * price,
            Action::Sell => size,
        };
        self.portfolio.adjust(step.input_asset(), -spent);

        let state = wait_for_terminal(
            self.client.as_ref(),
            pair,
            &order_id,
            size,
            self.config.order_timeout,
            self.config.order_poll_interval,
        )
        .await;

        let filled = state.filled_size.min(size);
        let fully_filled = state.status.map(|s| s.is_filled()).unwrap_or(false) || filled >= size;

        if !fully_filled {
            cancel_quietly(self.client.as_ref(), pair, &order_id).await;
            // Refund the unspent portion of the local debit.
            let refund = match step.action {
                Action::Buy => (size - filled) * price,
                Action::Sell => size - filled,
            };
            self.portfolio.adjust(step.input_asset(), refund);
        }

        let remaining = size - filled;
        let dust_limit = size * self.config.dust_ratio;
        let within_tolerance = fully_filled || (filled > Decimal::ZERO && remaining <= dust_limit);

        if !within_tolerance {
            metrics::inc_orders_failed();
            let (status, err) = if filled > Decimal::ZERO {
                (
                    LegStatus::TimedOut,
                    TradingError::PartialFill {
                        order_id: order_id.clone(),
                        filled,
                        requested: size,
                    },
                )
            } else {
                (
                    LegStatus::TimedOut,
                    TradingError::FillTimeout {
                        order_id: order_id.clone(),
                    },
                )
            };
            // Credit whatever partial output exists before aborting.
            if filled > Decimal::ZERO {
                let avg = state.avg_price.unwrap_or(price);
                let output = leg_output_amount(step.action, filled, avg, fee);
                self.portfolio.adjust(step.output_asset(), output);
            }
            return fail(
                status,
                Some(order_id),
                size,
                filled,
                state.avg_price,
                err,
                &leg_timer,
            );
        }

        metrics::inc_orders_filled();
        let avg = state.avg_price.unwrap_or(price);
        let output = leg_output_amount(step.action, filled, avg, fee);
        self.portfolio.adjust(step.output_asset(), output);

        Ok((
            LegResult {
                pair: pair.id(),
                action: step.action,
                order_id: Some(order_id),
                requested_size: size,
                filled_size: filled,
                avg_price: Some(avg),
                status: LegStatus::Filled,
                elapsed_ms: leg_timer.elapsed().as_millis() as u64,
            },
            output,
        ))
    }

    /// Value everything the aborted chain left behind, in start-asset terms.
    /// Holdings without a conversion price contribute zero (conservative).
    fn value_stranded_holdings(
        &self,
        path: &crate::arbitrage::path::Path,
        legs: &[LegResult],
        stake: Decimal,
    ) -> Decimal {
        let start = path.start_asset();
        let mut total = Decimal::ZERO;
        let mut carried = stake;

        for (step, leg) in path.steps.iter().zip(legs) {
            match leg.status {
                LegStatus::Filled => {
                    let avg = leg.avg_price.unwrap_or(Decimal::ZERO);
                    let fee = self.config.fee_for(&step.pair.id());
                    carried = leg_output_amount(step.action, leg.filled_size, avg, fee);
                }
                LegStatus::TimedOut | LegStatus::Cancelled | LegStatus::Failed => {
                    // Unspent input stays in the input asset.
                    let consumed_input = match step.action {
                        Action::Buy => leg.filled_size * leg.avg_price.unwrap_or(Decimal::ZERO),
                        Action::Sell => leg.filled_size,
                    };
                    let leftover = (carried - consumed_input).max(Decimal::ZERO);
                    total += self.value_in(step.input_asset(), leftover, start);

                    // Partial output sits in the output asset.
                    if leg.filled_size > Decimal::ZERO {
                        let avg = leg.avg_price.unwrap_or(Decimal::ZERO);
                        let fee = self.config.fee_for(&step.pair.id());
                        let output = leg_output_amount(step.action, leg.filled_size, avg, fee);
                        total += self.value_in(step.output_asset(), output, start);
                    }
                    return total;
                }
                LegStatus::NotAttempted => {
                    // Chain never got here; `carried` was already valued by
                    // the aborting leg above.
                    return total;
                }
            }
        }
        total + carried
    }

    fn value_in(&self, asset: &str, amount: Decimal, target: &str) -> Decimal {
        if amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.books
            .conversion_rate(asset, target)
            .map(|rate| amount * rate)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Output amount of a fill: base received for buys, quote for sells, fee
/// taken from the output side.
fn leg_output_amount(action: Action, filled: Decimal, avg_price: Decimal, fee: Decimal) -> Decimal {
    let keep = Decimal::ONE - fee;
    match action {
        Action::Buy => filled * keep,
        Action::Sell => filled * avg_price * keep,
    }
}

/// Round down to a multiple of `step`.
fn round_down_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).floor() * step
}

/// Round up to a multiple of `step`.
fn round_up_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).ceil() * step
}
