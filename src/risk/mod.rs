//! Risk gate: accept/reject/size every opportunity before execution.
//!
//! All counters live on the controller task; nothing here locks. Methods
//! take an explicit `now` so the daily rollover and frequency throttle are
//! deterministic under test. The day boundary follows the local calendar
//! day (UTC when the local offset is unavailable).

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;
use time::{Date, OffsetDateTime};
use tracing::{info, warn};

use crate::arbitrage::evaluator::Opportunity;
use crate::config::Config;
use crate::orderbook::cache::BookCache;
use crate::portfolio::{Portfolio, VALUATION_ASSET};

/// Current clock in the local offset, falling back to UTC.
pub fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Risk severity attached to decisions and to the gate itself.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskLevel {
    /// Daily loss within 1%.
    Low,
    /// Daily loss within 3%, or limits being approached.
    Medium,
    /// Daily loss under the stop-loss ratio.
    High,
    /// Stop-loss reached or trading disabled.
    Critical,
}

/// Why an opportunity was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RejectReason {
    /// Trading disabled by the operator (monitor mode).
    TradingDisabled,
    /// Kill switch tripped until the next day boundary.
    StopLoss,
    /// No portfolio snapshot (public-only mode).
    PublicOnly,
    /// Opportunity older than its maximum age.
    Expired,
    /// Minimum spacing between attempts not yet elapsed.
    Frequency,
    /// Daily attempt cap reached.
    DailyTradeCap,
    /// Daily loss ratio over the limit.
    DailyLoss,
    /// Stake over the single-trade ratio.
    StakeLimit,
    /// Projected position over the position ratio.
    PositionLimit,
    /// Stake over what the books can absorb.
    DepthLimit,
    /// Not enough free balance in the start asset.
    InsufficientBalance,
    /// Sizing could not reach the minimum trade amount.
    BelowMinimum,
    /// Portfolio could not be valued.
    Unvalued,
}

/// Outcome of one validation.
#[derive(Debug, Clone)]
pub struct RiskDecision {
    /// Whether the opportunity may execute.
    pub passed: bool,
    /// Populated iff `passed` is false.
    pub reason: Option<RejectReason>,
    /// Severity of this decision.
    pub level: RiskLevel,
    /// Stake to execute with; never exceeds the requested stake.
    pub suggested_stake: Decimal,
    /// Non-fatal observations.
    pub warnings: Vec<String>,
}

impl RiskDecision {
    fn reject(reason: RejectReason, level: RiskLevel, suggested_stake: Decimal) -> Self {
        Self {
            passed: false,
            reason: Some(reason),
            level,
            suggested_stake,
            warnings: Vec::new(),
        }
    }

    fn pass(level: RiskLevel, suggested_stake: Decimal, warnings: Vec<String>) -> Self {
        Self {
            passed: true,
            reason: None,
            level,
            suggested_stake,
            warnings,
        }
    }
}

/// Operator-facing counters.
#[derive(Debug, Clone, Serialize)]
pub struct RiskStats {
    /// Current gate severity.
    pub level: RiskLevel,
    /// Whether the gate will consider trades at all.
    pub trading_enabled: bool,
    /// Whether the kill switch is currently tripped.
    pub kill_switch_active: bool,
    /// Attempts today.
    pub trades_today: u32,
    /// Daily attempt cap.
    pub max_daily_trades: u32,
    /// Net realized P&L today, valuation-asset units.
    pub realized_pnl_today: Decimal,
    /// Total rejections since start.
    pub rejected_total: u64,
    /// Rejections by reason.
    pub rejections: HashMap<String, u64>,
}

/// Stateful policy engine guarding the executor.
#[derive(Debug)]
pub struct RiskGate {
    config: Arc<Config>,
    trading_enabled: bool,
    disabled_until: Option<Date>,
    last_attempt_at: Option<OffsetDateTime>,
    trades_today: u32,
    realized_pnl_today: Decimal,
    rejections: HashMap<RejectReason, u64>,
    day: Date,
    level: RiskLevel,
}

impl RiskGate {
    /// Create a gate. `trading_enabled` is false in monitor mode.
    pub fn new(config: Arc<Config>, trading_enabled: bool) -> Self {
        Self::new_at(config, trading_enabled, now_local())
    }

    /// Create a gate anchored to an explicit clock. The anchor fixes the
    /// first day boundary, which keeps tests deterministic.
    pub fn new_at(config: Arc<Config>, trading_enabled: bool, now: OffsetDateTime) -> Self {
        Self {
            config,
            trading_enabled,
            disabled_until: None,
            last_attempt_at: None,
            trades_today: 0,
            realized_pnl_today: Decimal::ZERO,
            rejections: HashMap::new(),
            day: now.date(),
            level: RiskLevel::Low,
        }
    }

    /// Validate an opportunity. When `requested` is `None` the gate sizes
    /// the trade itself; the suggested stake in a passing decision is what
    /// the executor should use.
    pub fn validate(
        &mut self,
        opportunity: &Opportunity,
        portfolio: Option<&Portfolio>,
        requested: Option<Decimal>,
        books: &BookCache,
        now: OffsetDateTime,
    ) -> RiskDecision {
        self.roll_day(now.date());

        if self.disabled_until.is_some() {
            return RiskDecision::reject(RejectReason::StopLoss, RiskLevel::Critical, Decimal::ZERO);
        }
        if !self.trading_enabled {
            return RiskDecision::reject(
                RejectReason::TradingDisabled,
                RiskLevel::Critical,
                Decimal::ZERO,
            );
        }
        let Some(portfolio) = portfolio else {
            return RiskDecision::reject(
                RejectReason::PublicOnly,
                RiskLevel::Critical,
                Decimal::ZERO,
            );
        };

        if opportunity.is_expired(self.config.opportunity_max_age, now) {
            return RiskDecision::reject(RejectReason::Expired, RiskLevel::Medium, Decimal::ZERO);
        }

        if let Some(last) = self.last_attempt_at {
            let elapsed = now - last;
            let min_interval =
                time::Duration::seconds_f64(self.config.min_arbitrage_interval.as_secs_f64());
            if elapsed < min_interval {
                return RiskDecision::reject(
                    RejectReason::Frequency,
                    RiskLevel::Medium,
                    Decimal::ZERO,
                );
            }
        }

        if self.trades_today >= self.config.max_daily_trades {
            return RiskDecision::reject(
                RejectReason::DailyTradeCap,
                RiskLevel::High,
                Decimal::ZERO,
            );
        }

        let total = portfolio.total_value(books);
        if total <= Decimal::ZERO {
            return RiskDecision::reject(RejectReason::Unvalued, RiskLevel::Critical, Decimal::ZERO);
        }

        let loss_ratio = self.daily_loss_ratio(total);
        if loss_ratio >= self.config.stop_loss_ratio {
            self.trip_kill_switch();
            return RiskDecision::reject(RejectReason::StopLoss, RiskLevel::Critical, Decimal::ZERO);
        }
        if loss_ratio >= self.config.max_daily_loss_ratio {
            return RiskDecision::reject(RejectReason::DailyLoss, RiskLevel::High, Decimal::ZERO);
        }

        let start_asset = opportunity.start_asset();
        let start_rate = books
            .conversion_rate(start_asset, VALUATION_ASSET)
            .unwrap_or(Decimal::ZERO);

        let stake = match requested {
            Some(stake) => stake,
            None => self.size_with(opportunity, portfolio, total, start_rate),
        };
        if stake < self.config.min_trade_amount {
            return RiskDecision::reject(RejectReason::BelowMinimum, RiskLevel::Medium, stake);
        }

        let stake_value = stake * start_rate;
        let single_cap = self.config.max_single_trade_ratio * total;
        if stake_value > single_cap {
            let suggested = if start_rate > Decimal::ZERO {
                single_cap / start_rate
            } else {
                Decimal::ZERO
            };
            return RiskDecision::reject(RejectReason::StakeLimit, RiskLevel::High, suggested.min(stake));
        }

        // Projected exposure for every asset the cycle passes through.
        let position_cap = self.config.max_position_ratio * total;
        for asset in opportunity.path.assets.iter().skip(1) {
            if asset == start_asset {
                continue;
            }
            let rate = books
                .conversion_rate(asset, VALUATION_ASSET)
                .unwrap_or(Decimal::ZERO);
            let projected = portfolio.free(asset) * rate + stake_value;
            if projected > position_cap {
                return RiskDecision::reject(
                    RejectReason::PositionLimit,
                    RiskLevel::High,
                    Decimal::ZERO,
                );
            }
        }

        if stake > opportunity.max_stake {
            return RiskDecision::reject(
                RejectReason::DepthLimit,
                RiskLevel::High,
                opportunity.max_stake,
            );
        }

        let free = portfolio.free(start_asset);
        if free < stake {
            return RiskDecision::reject(
                RejectReason::InsufficientBalance,
                RiskLevel::High,
                free.min(stake),
            );
        }

        let mut warnings = Vec::new();
        let mut level = self.level_for_loss(loss_ratio);
        let cap = self.config.max_daily_trades;
        if self.trades_today * 10 >= cap * 8 {
            warnings.push(format!(
                "daily trade count approaching cap: {}/{}",
                self.trades_today, cap
            ));
            level = level.max(RiskLevel::Medium);
        }

        RiskDecision::pass(level, stake, warnings)
    }

    /// Size a trade: depth, single-trade ratio and free balance, floored at
    /// the minimum trade amount. Zero when the floor is unreachable.
    pub fn size(
        &self,
        opportunity: &Opportunity,
        portfolio: &Portfolio,
        books: &BookCache,
    ) -> Decimal {
        let total = portfolio.total_value(books);
        if total <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let start_rate = books
            .conversion_rate(opportunity.start_asset(), VALUATION_ASSET)
            .unwrap_or(Decimal::ZERO);
        self.size_with(opportunity, portfolio, total, start_rate)
    }

    fn size_with(
        &self,
        opportunity: &Opportunity,
        portfolio: &Portfolio,
        total: Decimal,
        start_rate: Decimal,
    ) -> Decimal {
        if start_rate <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let single_cap = self.config.max_single_trade_ratio * total / start_rate;
        let free = portfolio.free(opportunity.start_asset());
        let stake = opportunity.max_stake.min(single_cap).min(free);

        let floor = self.config.min_trade_amount;
        if stake >= floor {
            stake
        } else if free >= floor && opportunity.max_stake >= floor {
            floor
        } else {
            Decimal::ZERO
        }
    }

    /// Record an attempt outcome. Every attempt counts toward the daily cap
    /// and moves the frequency throttle, success or not.
    pub fn record(
        &mut self,
        success: bool,
        realized_profit: Decimal,
        total_balance: Decimal,
        now: OffsetDateTime,
    ) {
        self.roll_day(now.date());
        self.trades_today += 1;
        self.realized_pnl_today += realized_profit;
        self.last_attempt_at = Some(now);

        let loss_ratio = self.daily_loss_ratio(total_balance);
        self.level = self.level_for_loss(loss_ratio);
        if total_balance > Decimal::ZERO && loss_ratio >= self.config.stop_loss_ratio {
            self.trip_kill_switch();
        }

        if success {
            info!(
                profit = %realized_profit,
                trades_today = self.trades_today,
                "attempt recorded"
            );
        } else {
            warn!(
                loss = %realized_profit,
                trades_today = self.trades_today,
                "failed attempt recorded"
            );
        }
    }

    /// Count a rejected opportunity.
    pub fn record_rejection(&mut self, reason: RejectReason) {
        *self.rejections.entry(reason).or_insert(0) += 1;
    }

    /// Counters for the status surface.
    pub fn stats(&self) -> RiskStats {
        RiskStats {
            level: self.level,
            trading_enabled: self.trading_enabled,
            kill_switch_active: self.disabled_until.is_some(),
            trades_today: self.trades_today,
            max_daily_trades: self.config.max_daily_trades,
            realized_pnl_today: self.realized_pnl_today,
            rejected_total: self.rejections.values().sum(),
            rejections: self
                .rejections
                .iter()
                .map(|(reason, count)| (reason.to_string(), *count))
                .collect(),
        }
    }

    /// Disable trading until the gate is re-enabled by the operator.
    pub fn disable(&mut self) {
        self.trading_enabled = false;
        self.level = RiskLevel::Critical;
    }

    fn trip_kill_switch(&mut self) {
        if self.disabled_until.is_none() {
            let until = self.day.next_day().unwrap_or(self.day);
            warn!(until = %until, "stop loss reached, kill switch tripped");
            self.disabled_until = Some(until);
        }
        self.level = RiskLevel::Critical;
    }

    fn daily_loss_ratio(&self, total: Decimal) -> Decimal {
        if total <= Decimal::ZERO || self.realized_pnl_today >= Decimal::ZERO {
            return Decimal::ZERO;
        }
        -self.realized_pnl_today / total
    }

    fn level_for_loss(&self, loss_ratio: Decimal) -> RiskLevel {
        if loss_ratio >= self.config.stop_loss_ratio {
            RiskLevel::Critical
        } else if loss_ratio > Decimal::new(3, 2) {
            RiskLevel::High
        } else if loss_ratio > Decimal::new(1, 2) {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    fn roll_day(&mut self, today: Date) {
        if today <= self.day {
            return;
        }
        info!(from = %self.day, to = %today, "daily counters reset");
        self.day = today;
        self.trades_today = 0;
        self.realized_pnl_today = Decimal::ZERO;
        if let Some(until) = self.disabled_until {
            if today >= until {
                self.disabled_until = None;
                self.level = RiskLevel::Low;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::path::Pair;
    use crate::orderbook::types::{OrderBook, PriceLevel};
    use rust_decimal_macros::dec;

    const PATH1: &str = r#"{"route":"USDT->BTC->USDC->USDT","steps":[
        {"pair":"BTC-USDT","action":"buy"},
        {"pair":"BTC-USDC","action":"sell"},
        {"pair":"USDC-USDT","action":"sell"}]}"#;

    fn fixed_now() -> OffsetDateTime {
        time::macros::datetime!(2024-06-15 12:00 UTC)
    }

    fn config(extra: &[(&str, &str)]) -> Arc<Config> {
        let mut pairs = vec![("TRIARB_PATH1".to_string(), PATH1.to_string())];
        for (k, v) in extra {
            pairs.push((format!("TRIARB_{}", k.to_uppercase()), v.to_string()));
        }
        Arc::new(Config::from_pairs(pairs).unwrap())
    }

    fn books() -> BookCache {
        let cache = BookCache::new();
        let now = fixed_now();
        let store = |pair: Pair, bid: Decimal, ask: Decimal| {
            cache.store(OrderBook::new(
                pair,
                vec![PriceLevel::new(bid, dec!(100))],
                vec![PriceLevel::new(ask, dec!(100))],
                now,
            ));
        };
        store(Pair::new("BTC", "USDT"), dec!(59990), dec!(60010));
        store(Pair::new("USDC", "USDT"), dec!(0.9995), dec!(1.0005));
        store(Pair::new("ETH", "USDT"), dec!(2999), dec!(3001));
        cache
    }

    fn portfolio(usdt: Decimal) -> Portfolio {
        let mut balances = std::collections::HashMap::new();
        balances.insert("USDT".to_string(), usdt);
        Portfolio {
            balances,
            fetched_at: fixed_now(),
        }
    }

    fn opportunity(config: &Config, now: OffsetDateTime) -> Opportunity {
        Opportunity {
            path: config.paths[0].clone(),
            profit_rate: dec!(0.005),
            probe_stake: dec!(100),
            expected_profit: dec!(0.5),
            max_stake: dec!(60000),
            evaluated_at: now,
        }
    }

    #[test]
    fn sizing_respects_all_caps() {
        let config = config(&[]);
        let gate = RiskGate::new_at(config.clone(), true, fixed_now());
        let books = books();
        let opp = opportunity(&config, fixed_now());

        // 10_000 USDT total; single-trade cap = 10%.
        let stake = gate.size(&opp, &portfolio(dec!(10000)), &books);
        assert_eq!(stake, dec!(1000));

        // Depth caps before the ratio does.
        let mut shallow = opp.clone();
        shallow.max_stake = dec!(400);
        let stake = gate.size(&shallow, &portfolio(dec!(10000)), &books);
        assert_eq!(stake, dec!(400));

        // Free start-asset balance caps last: a big ETH position lifts the
        // total, but only 500 USDT is actually spendable.
        let mut rich = portfolio(dec!(500));
        rich.balances.insert("ETH".to_string(), dec!(10));
        let stake = gate.size(&opp, &rich, &books);
        assert_eq!(stake, dec!(500));
    }

    #[test]
    fn sizing_floors_at_minimum_or_rejects() {
        let config = config(&[]);
        let gate = RiskGate::new_at(config.clone(), true, fixed_now());
        let books = books();
        let opp = opportunity(&config, fixed_now());

        // Raise to the floor when the ratio-derived stake is too small:
        // 10% of 800 is 80, under the 100 minimum, but 800 free covers it.
        let stake = gate.size(&opp, &portfolio(dec!(800)), &books);
        assert_eq!(stake, dec!(100));

        // Floor unreachable: free balance under the minimum.
        let stake = gate.size(&opp, &portfolio(dec!(50)), &books);
        assert_eq!(stake, Decimal::ZERO);
    }

    #[test]
    fn validate_passes_and_sizes_a_clean_opportunity() {
        let config = config(&[]);
        let mut gate = RiskGate::new_at(config.clone(), true, fixed_now());
        let books = books();
        let now = fixed_now();
        let opp = opportunity(&config, now);

        let decision = gate.validate(&opp, Some(&portfolio(dec!(10000))), None, &books, now);
        assert!(decision.passed, "reason: {:?}", decision.reason);
        assert_eq!(decision.suggested_stake, dec!(1000));
        assert_eq!(decision.level, RiskLevel::Low);
    }

    #[test]
    fn frequency_throttle_rejects_back_to_back_attempts() {
        let config = config(&[]);
        let mut gate = RiskGate::new_at(config.clone(), true, fixed_now());
        let books = books();
        let now = fixed_now();
        let opp = opportunity(&config, now);
        let p = portfolio(dec!(10000));

        let first = gate.validate(&opp, Some(&p), None, &books, now);
        assert!(first.passed);
        gate.record(true, dec!(5), dec!(10000), now);

        // 5 seconds later: still inside the 10 s minimum interval.
        let later = now + time::Duration::seconds(5);
        let mut opp2 = opp.clone();
        opp2.evaluated_at = later;
        let second = gate.validate(&opp2, Some(&p), None, &books, later);
        assert!(!second.passed);
        assert_eq!(second.reason, Some(RejectReason::Frequency));
        assert_eq!(gate.stats().trades_today, 1);

        // Past the interval it clears.
        let much_later = now + time::Duration::seconds(11);
        let mut opp3 = opp.clone();
        opp3.evaluated_at = much_later;
        let third = gate.validate(&opp3, Some(&p), None, &books, much_later);
        assert!(third.passed, "reason: {:?}", third.reason);
    }

    #[test]
    fn daily_trade_cap_rejects() {
        let config = config(&[("max_daily_trades", "2")]);
        let mut gate = RiskGate::new_at(config.clone(), true, fixed_now());
        let books = books();
        let now = fixed_now();
        let opp = opportunity(&config, now);
        let p = portfolio(dec!(10000));

        gate.record(true, dec!(1), dec!(10000), now);
        gate.record(true, dec!(1), dec!(10000), now + time::Duration::seconds(20));

        let later = now + time::Duration::seconds(40);
        let mut opp2 = opp.clone();
        opp2.evaluated_at = later;
        let decision = gate.validate(&opp2, Some(&p), None, &books, later);
        assert_eq!(decision.reason, Some(RejectReason::DailyTradeCap));
    }

    #[test]
    fn public_only_mode_is_a_hard_reject() {
        let config = config(&[]);
        let mut gate = RiskGate::new_at(config.clone(), true, fixed_now());
        let books = books();
        let now = fixed_now();
        let opp = opportunity(&config, now);

        let decision = gate.validate(&opp, None, None, &books, now);
        assert!(!decision.passed);
        assert_eq!(decision.reason, Some(RejectReason::PublicOnly));
        assert_eq!(decision.level, RiskLevel::Critical);
    }

    #[test]
    fn expired_opportunity_rejects() {
        let config = config(&[]);
        let mut gate = RiskGate::new_at(config.clone(), true, fixed_now());
        let books = books();
        let now = fixed_now();
        let opp = opportunity(&config, now - time::Duration::seconds(6));

        let decision = gate.validate(&opp, Some(&portfolio(dec!(10000))), None, &books, now);
        assert_eq!(decision.reason, Some(RejectReason::Expired));
    }

    #[test]
    fn requested_stake_over_depth_rejects_with_suggestion() {
        let config = config(&[]);
        let mut gate = RiskGate::new_at(config.clone(), true, fixed_now());
        let books = books();
        let now = fixed_now();
        let mut opp = opportunity(&config, now);
        opp.max_stake = dec!(300);

        let decision = gate.validate(
            &opp,
            // Large balance so the ratio checks stay quiet.
            Some(&portfolio(dec!(100000))),
            Some(dec!(500)),
            &books,
            now,
        );
        assert_eq!(decision.reason, Some(RejectReason::DepthLimit));
        assert_eq!(decision.suggested_stake, dec!(300));
    }

    #[test]
    fn requested_stake_over_single_trade_ratio_rejects() {
        let config = config(&[]);
        let mut gate = RiskGate::new_at(config.clone(), true, fixed_now());
        let books = books();
        let now = fixed_now();
        let opp = opportunity(&config, now);

        let decision = gate.validate(
            &opp,
            Some(&portfolio(dec!(10000))),
            Some(dec!(2000)),
            &books,
            now,
        );
        assert_eq!(decision.reason, Some(RejectReason::StakeLimit));
        assert!(decision.suggested_stake <= dec!(1000));
    }

    #[test]
    fn insufficient_free_balance_rejects() {
        let config = config(&[]);
        let mut gate = RiskGate::new_at(config.clone(), true, fixed_now());
        let books = books();
        let now = fixed_now();
        let opp = opportunity(&config, now);

        // An ETH position (outside the cycle) lifts the total so the ratio
        // checks pass, but free USDT cannot cover the stake.
        let mut p = portfolio(dec!(150));
        p.balances.insert("ETH".to_string(), dec!(10));

        let decision = gate.validate(&opp, Some(&p), Some(dec!(200)), &books, now);
        assert_eq!(decision.reason, Some(RejectReason::InsufficientBalance));
        assert_eq!(decision.suggested_stake, dec!(150));
    }

    #[test]
    fn kill_switch_trips_at_stop_loss_and_resets_at_day_boundary() {
        let config = config(&[]);
        let mut gate = RiskGate::new_at(config.clone(), true, fixed_now());
        let books = books();
        let now = fixed_now();
        let opp = opportunity(&config, now);
        let p = portfolio(dec!(10000));

        // Lose 10.1% of a 10_000 book in one attempt.
        gate.record(false, dec!(-1010), dec!(10000), now);
        assert!(gate.stats().kill_switch_active);
        assert_eq!(gate.stats().level, RiskLevel::Critical);

        let later = now + time::Duration::seconds(60);
        let mut opp2 = opp.clone();
        opp2.evaluated_at = later;
        let decision = gate.validate(&opp2, Some(&p), None, &books, later);
        assert!(!decision.passed);
        assert_eq!(decision.reason, Some(RejectReason::StopLoss));
        assert_eq!(decision.level, RiskLevel::Critical);

        // Next local day: counters reset, switch clears, trading resumes.
        let tomorrow = now + time::Duration::days(1);
        let mut opp3 = opp.clone();
        opp3.evaluated_at = tomorrow;
        let decision = gate.validate(&opp3, Some(&p), None, &books, tomorrow);
        assert!(decision.passed, "reason: {:?}", decision.reason);
        assert_eq!(gate.stats().trades_today, 0);
        assert!(!gate.stats().kill_switch_active);
    }

    #[test]
    fn daily_counters_reset_exactly_once_per_boundary() {
        let config = config(&[]);
        let mut gate = RiskGate::new_at(config.clone(), true, fixed_now());
        let now = fixed_now();

        gate.record(true, dec!(10), dec!(10000), now);
        gate.record(true, dec!(-4), dec!(10000), now + time::Duration::seconds(15));
        assert_eq!(gate.stats().trades_today, 2);
        assert_eq!(gate.stats().realized_pnl_today, dec!(6));

        let tomorrow = now + time::Duration::days(1);
        gate.record(true, dec!(3), dec!(10000), tomorrow);
        assert_eq!(gate.stats().trades_today, 1);
        assert_eq!(gate.stats().realized_pnl_today, dec!(3));
    }

    #[test]
    fn rejection_counters_track_reasons() {
        let config = config(&[]);
        let mut gate = RiskGate::new_at(config, true, fixed_now());

        gate.record_rejection(RejectReason::Frequency);
        gate.record_rejection(RejectReason::Frequency);
        gate.record_rejection(RejectReason::DepthLimit);

        let stats = gate.stats();
        assert_eq!(stats.rejected_total, 3);
        assert_eq!(stats.rejections.get("frequency"), Some(&2));
        assert_eq!(stats.rejections.get("depth_limit"), Some(&1));
    }

    #[test]
    fn monitor_mode_rejects_everything() {
        let config = config(&[]);
        let mut gate = RiskGate::new_at(config.clone(), false, fixed_now());
        let books = books();
        let now = fixed_now();
        let opp = opportunity(&config, now);

        let decision = gate.validate(&opp, Some(&portfolio(dec!(10000))), None, &books, now);
        assert_eq!(decision.reason, Some(RejectReason::TradingDisabled));
    }
}
