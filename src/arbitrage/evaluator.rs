//! Arbitrage evaluation: realizable round-trip profit from current depth.
//!
//! `evaluate` is a pure function of its inputs (paths, cached books, clock).
//! It never touches the network and never falls back to REST: a leg whose
//! book is stale, missing, or crossed silently disqualifies its path for
//! this tick.

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::arbitrage::path::Path;
use crate::config::Config;
use crate::orderbook::cache::{BookCache, Fetched};
use crate::orderbook::depth::{leg_output, max_input_for};
use crate::orderbook::types::OrderBook;

/// A path whose round trip clears the profit threshold at current depth.
#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    /// The configured cycle.
    pub path: Path,
    /// Net profit rate at the probe stake, after fees.
    pub profit_rate: Decimal,
    /// Stake the profit rate was computed at (the configured minimum).
    pub probe_stake: Decimal,
    /// Estimated profit at the probe stake, in start-asset units.
    pub expected_profit: Decimal,
    /// Largest stake no leg's book side can be exhausted by.
    pub max_stake: Decimal,
    /// When the books were read.
    pub evaluated_at: OffsetDateTime,
}

impl Opportunity {
    /// Asset the cycle starts and ends in.
    pub fn start_asset(&self) -> &str {
        self.path.start_asset()
    }

    /// Whether the opportunity has outlived `max_age` at `now`.
    pub fn is_expired(&self, max_age: std::time::Duration, now: OffsetDateTime) -> bool {
        now - self.evaluated_at > time::Duration::seconds_f64(max_age.as_secs_f64())
    }
}

/// Evaluate every configured path against the cache. Returns opportunities
/// ordered by profit rate descending.
pub fn evaluate(config: &Config, books: &BookCache, now: OffsetDateTime) -> Vec<Opportunity> {
    let mut opportunities: Vec<Opportunity> = config
        .paths
        .iter()
        .filter_map(|path| evaluate_path(config, books, path, now))
        .collect();

    opportunities.sort_by(|a, b| b.profit_rate.cmp(&a.profit_rate));
    opportunities
}

fn evaluate_path(
    config: &Config,
    books: &BookCache,
    path: &Path,
    now: OffsetDateTime,
) -> Option<Opportunity> {
    // Every leg needs a fresh, uncrossed book.
    let mut leg_books: Vec<OrderBook> = Vec::with_capacity(path.steps.len());
    for step in &path.steps {
        match books.fetch_at(&step.pair, config.freshness_budget, now) {
            Fetched::Book(book) => leg_books.push(book),
            Fetched::Stale | Fetched::Missing => {
                debug!(path = %path, pair = %step.pair, "leg book unusable, skipping path");
                return None;
            }
        }
    }

    // The legs must describe one coherent moment: oldest within the
    // freshness budget of the newest. Guards against clock skew between
    // feed timestamps.
    let budget = time::Duration::seconds_f64(config.freshness_budget.as_secs_f64());
    let newest = leg_books.iter().map(|b| b.updated_at).max()?;
    let oldest = leg_books.iter().map(|b| b.updated_at).min()?;
    if newest - oldest > budget {
        debug!(path = %path, "leg timestamps incoherent, skipping path");
        return None;
    }

    if !sanity_check(config, path, &leg_books) {
        return None;
    }

    // Walk the cycle at the probe stake.
    let probe = config.min_trade_amount;
    let mut amount = probe;
    for (step, book) in path.steps.iter().zip(&leg_books) {
        let fee = config.fee_for(&step.pair.id());
        amount = leg_output(book, step.action, amount, fee)?;
    }

    let profit_rate = (amount - probe) / probe;
    if profit_rate < config.min_profit_threshold {
        return None;
    }
    if profit_rate > config.max_profit_rate_threshold {
        warn!(
            path = %path,
            rate = %profit_rate,
            "implausible profit rate, treating as data artifact"
        );
        return None;
    }

    // Back-propagate depth limits: the output cap of leg k is the maximum
    // input of leg k+1.
    let mut cap: Option<Decimal> = None;
    for (step, book) in path.steps.iter().zip(&leg_books).rev() {
        let fee = config.fee_for(&step.pair.id());
        cap = Some(max_input_for(book, step.action, fee, cap));
    }
    let max_stake = cap?;
    if max_stake < config.min_trade_amount {
        debug!(path = %path, max_stake = %max_stake, "insufficient depth, skipping path");
        return None;
    }

    Some(Opportunity {
        path: path.clone(),
        profit_rate,
        probe_stake: probe,
        expected_profit: amount - probe,
        max_stake,
        evaluated_at: now,
    })
}

/// Spread and stablecoin plausibility filters. A failing leg disqualifies
/// the whole path.
fn sanity_check(config: &Config, path: &Path, leg_books: &[OrderBook]) -> bool {
    for (step, book) in path.steps.iter().zip(leg_books) {
        if let (Some(max_spread), Some(spread)) = (config.max_price_spread, book.relative_spread())
        {
            if spread > max_spread {
                debug!(path = %path, pair = %step.pair, spread = %spread, "spread too wide");
                return false;
            }
        }

        if step.pair.is_stable_pair() {
            if let (Some((lo, hi)), Some(mid)) = (config.stablecoin_price_range, book.mid_price())
            {
                if mid < lo || mid > hi {
                    debug!(path = %path, pair = %step.pair, mid = %mid, "stablecoin mid out of band");
                    return false;
                }
            }
            if let (Some(max_spread), Some(spread)) = (config.max_stablecoin_spread, book.spread())
            {
                if spread > max_spread {
                    debug!(path = %path, pair = %step.pair, spread = %spread, "stablecoin spread too wide");
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::path::Pair;
    use crate::orderbook::types::PriceLevel;
    use rust_decimal_macros::dec;

    const PATH_FWD: &str = r#"{"route":"USDT->BTC->USDC->USDT","steps":[
        {"pair":"BTC-USDT","action":"buy"},
        {"pair":"BTC-USDC","action":"sell"},
        {"pair":"USDC-USDT","action":"sell"}]}"#;
    const PATH_REV: &str = r#"{"route":"USDT->USDC->BTC->USDT","steps":[
        {"pair":"USDC-USDT","action":"buy"},
        {"pair":"BTC-USDC","action":"buy"},
        {"pair":"BTC-USDT","action":"sell"}]}"#;

    fn test_config(extra: &[(&str, &str)]) -> Config {
        let mut pairs = vec![
            ("TRIARB_PATH1".to_string(), PATH_FWD.to_string()),
            ("TRIARB_PATH2".to_string(), PATH_REV.to_string()),
        ];
        for (k, v) in extra {
            pairs.push((format!("TRIARB_{}", k.to_uppercase()), v.to_string()));
        }
        Config::from_pairs(pairs).unwrap()
    }

    fn store(
        books: &BookCache,
        pair: Pair,
        bids: &[(Decimal, Decimal)],
        asks: &[(Decimal, Decimal)],
        at: OffsetDateTime,
    ) {
        books.store(OrderBook::new(
            pair,
            bids.iter().map(|&(p, s)| PriceLevel::new(p, s)).collect(),
            asks.iter().map(|&(p, s)| PriceLevel::new(p, s)).collect(),
            at,
        ));
    }

    /// Profitable cycle: buy BTC at 60000 USDT, sell at 60500 USDC,
    /// convert USDC to USDT at par.
    fn profitable_books(books: &BookCache, now: OffsetDateTime) {
        store(
            books,
            Pair::new("BTC", "USDT"),
            &[(dec!(59990), dec!(1))],
            &[(dec!(60000), dec!(1))],
            now,
        );
        store(
            books,
            Pair::new("BTC", "USDC"),
            &[(dec!(60500), dec!(1))],
            &[(dec!(60510), dec!(1))],
            now,
        );
        store(
            books,
            Pair::new("USDC", "USDT"),
            &[(dec!(1.000), dec!(1000000))],
            &[(dec!(1.001), dec!(1000000))],
            now,
        );
    }

    #[test]
    fn profitable_path_is_emitted_with_expected_rate() {
        let config = test_config(&[]);
        let books = BookCache::new();
        let now = OffsetDateTime::now_utc();
        profitable_books(&books, now);

        let opportunities = evaluate(&config, &books, now);
        assert_eq!(opportunities.len(), 1);

        let opp = &opportunities[0];
        assert_eq!(opp.path.route(), "USDT->BTC->USDC->USDT");
        // (60500/60000) * 0.999^3 - 1 ≈ 0.53%
        assert!(opp.profit_rate > dec!(0.005), "rate {}", opp.profit_rate);
        assert!(opp.profit_rate < dec!(0.006), "rate {}", opp.profit_rate);
        assert_eq!(opp.evaluated_at, now);
    }

    #[test]
    fn max_stake_is_bounded_by_depth_back_propagation() {
        let config = test_config(&[]);
        let books = BookCache::new();
        let now = OffsetDateTime::now_utc();
        profitable_books(&books, now);

        let opp = &evaluate(&config, &books, now)[0];
        // Leg 1 can absorb 60000 USDT (1 BTC at 60000); downstream legs
        // carry 1 BTC / ~60k USDC without exhausting.
        assert_eq!(opp.max_stake, dec!(60000));
    }

    #[test]
    fn walking_at_max_stake_never_exhausts_a_level() {
        let config = test_config(&[]);
        let books = BookCache::new();
        let now = OffsetDateTime::now_utc();
        profitable_books(&books, now);

        let opp = &evaluate(&config, &books, now)[0];
        let mut amount = opp.max_stake;
        for step in &opp.path.steps {
            let book = books
                .fetch_at(&step.pair, config.freshness_budget, now)
                .book()
                .unwrap();
            let fee = config.fee_for(&step.pair.id());
            amount = leg_output(&book, step.action, amount, fee)
                .expect("max_stake must be executable against the books");
        }
        assert!(amount > Decimal::ZERO);
    }

    #[test]
    fn tight_books_emit_nothing() {
        // BTC-USDT 60000/60010, BTC-USDC 60000/60010, USDC-USDT
        // 0.999/1.001: both directions lose to fees.
        let config = test_config(&[]);
        let books = BookCache::new();
        let now = OffsetDateTime::now_utc();
        store(
            &books,
            Pair::new("BTC", "USDT"),
            &[(dec!(60000), dec!(1))],
            &[(dec!(60010), dec!(1))],
            now,
        );
        store(
            &books,
            Pair::new("BTC", "USDC"),
            &[(dec!(60000), dec!(1))],
            &[(dec!(60010), dec!(1))],
            now,
        );
        store(
            &books,
            Pair::new("USDC", "USDT"),
            &[(dec!(0.999), dec!(1000000))],
            &[(dec!(1.001), dec!(1000000))],
            now,
        );

        assert!(evaluate(&config, &books, now).is_empty());
    }

    #[test]
    fn stale_leg_skips_path_even_when_profitable() {
        let config = test_config(&[]);
        let books = BookCache::new();
        let now = OffsetDateTime::now_utc();
        profitable_books(&books, now);
        // Re-store the BTC-USDT book 800 ms in the past.
        store(
            &books,
            Pair::new("BTC", "USDT"),
            &[(dec!(59990), dec!(1))],
            &[(dec!(60000), dec!(1))],
            now - time::Duration::milliseconds(800),
        );

        assert!(evaluate(&config, &books, now).is_empty());
    }

    #[test]
    fn missing_leg_skips_path() {
        let config = test_config(&[]);
        let now = OffsetDateTime::now_utc();
        // Profitable books, but no USDC-USDT at all.
        let books = BookCache::new();
        store(
            &books,
            Pair::new("BTC", "USDT"),
            &[(dec!(59990), dec!(1))],
            &[(dec!(60000), dec!(1))],
            now,
        );
        store(
            &books,
            Pair::new("BTC", "USDC"),
            &[(dec!(60500), dec!(1))],
            &[(dec!(60510), dec!(1))],
            now,
        );

        assert!(evaluate(&config, &books, now).is_empty());
    }

    #[test]
    fn incoherent_leg_timestamps_skip_path() {
        let config = test_config(&[]);
        let books = BookCache::new();
        let now = OffsetDateTime::now_utc();
        profitable_books(&books, now);
        // One book stamped 400 ms in the future (skewed feed clock): each
        // leg passes the age gate but the set spans > 500 ms.
        store(
            &books,
            Pair::new("BTC", "USDC"),
            &[(dec!(60500), dec!(1))],
            &[(dec!(60510), dec!(1))],
            now + time::Duration::milliseconds(400),
        );
        store(
            &books,
            Pair::new("USDC", "USDT"),
            &[(dec!(1.000), dec!(1000000))],
            &[(dec!(1.001), dec!(1000000))],
            now - time::Duration::milliseconds(400),
        );

        assert!(evaluate(&config, &books, now).is_empty());
    }

    #[test]
    fn implausible_profit_rate_is_filtered() {
        let config = test_config(&[]);
        let books = BookCache::new();
        let now = OffsetDateTime::now_utc();
        profitable_books(&books, now);
        // A 63000 USDC bid implies ~4.7% round trip, over the 1% sanity cap.
        store(
            &books,
            Pair::new("BTC", "USDC"),
            &[(dec!(63000), dec!(1))],
            &[(dec!(63010), dec!(1))],
            now,
        );

        assert!(evaluate(&config, &books, now).is_empty());
    }

    #[test]
    fn stablecoin_band_filter_applies() {
        let config = test_config(&[
            ("stablecoin_price_range_min", "0.98"),
            ("stablecoin_price_range_max", "1.02"),
        ]);
        let books = BookCache::new();
        let now = OffsetDateTime::now_utc();
        profitable_books(&books, now);
        // Depeg: USDC-USDT mid at 0.95.
        store(
            &books,
            Pair::new("USDC", "USDT"),
            &[(dec!(0.949), dec!(1000000))],
            &[(dec!(0.951), dec!(1000000))],
            now,
        );

        assert!(evaluate(&config, &books, now).is_empty());
    }

    #[test]
    fn evaluation_is_pure() {
        let config = test_config(&[]);
        let books = BookCache::new();
        let now = OffsetDateTime::now_utc();
        profitable_books(&books, now);

        let first = evaluate(&config, &books, now);
        let second = evaluate(&config, &books, now);
        assert_eq!(first, second);
    }

    #[test]
    fn opportunities_are_sorted_by_profit_desc() {
        // Two forward cycles with different margins: the BTC route clears
        // ~0.53%, the ETH route a thinner ~0.36%.
        let eth_path = r#"{"route":"USDT->ETH->USDC->USDT","steps":[
            {"pair":"ETH-USDT","action":"buy"},
            {"pair":"ETH-USDC","action":"sell"},
            {"pair":"USDC-USDT","action":"sell"}]}"#;
        let config = Config::from_pairs(vec![
            ("TRIARB_PATH1".to_string(), PATH_FWD.to_string()),
            ("TRIARB_PATH3".to_string(), eth_path.to_string()),
        ])
        .unwrap();

        let books = BookCache::new();
        let now = OffsetDateTime::now_utc();
        profitable_books(&books, now);
        store(
            &books,
            Pair::new("ETH", "USDT"),
            &[(dec!(2999), dec!(20))],
            &[(dec!(3000), dec!(20))],
            now,
        );
        store(
            &books,
            Pair::new("ETH", "USDC"),
            &[(dec!(3020), dec!(20))],
            &[(dec!(3021), dec!(20))],
            now,
        );

        let opportunities = evaluate(&config, &books, now);
        assert_eq!(opportunities.len(), 2);
        assert_eq!(opportunities[0].path.route(), "USDT->BTC->USDC->USDT");
        assert!(opportunities[0].profit_rate > opportunities[1].profit_rate);
    }

    #[test]
    fn zero_fee_override_raises_profit() {
        let base = test_config(&[]);
        let zero_fee = test_config(&[("fee_rate_usdc_usdt", "0")]);
        let books = BookCache::new();
        let now = OffsetDateTime::now_utc();
        profitable_books(&books, now);

        let base_rate = evaluate(&base, &books, now)[0].profit_rate;
        let boosted_rate = evaluate(&zero_fee, &books, now)[0].profit_rate;
        assert!(boosted_rate > base_rate);
    }

    #[test]
    fn opportunity_expiry() {
        let config = test_config(&[]);
        let books = BookCache::new();
        let now = OffsetDateTime::now_utc();
        profitable_books(&books, now);
        let opp = evaluate(&config, &books, now).remove(0);

        let max_age = std::time::Duration::from_secs(5);
        assert!(!opp.is_expired(max_age, now));
        assert!(!opp.is_expired(max_age, now + time::Duration::seconds(4)));
        assert!(opp.is_expired(max_age, now + time::Duration::seconds(6)));
    }
}
