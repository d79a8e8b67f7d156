//! End-to-end scenarios: controller ticks against the mock exchange.
//!
//! Each test wires the full pipeline (cache → evaluator → risk gate →
//! executor → history) and steps it one tick at a time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::OffsetDateTime;

use triarb::arbitrage::path::Pair;
use triarb::config::Config;
use triarb::controller::{Controller, Mode};
use triarb::exchange::{FillMode, MockExchange};
use triarb::orderbook::types::{OrderBook, PriceLevel};
use triarb::orderbook::BookCache;
use triarb::portfolio::PortfolioCache;

const PATH_FWD: &str = r#"{"route":"USDT->BTC->USDC->USDT","steps":[
    {"pair":"BTC-USDT","action":"buy"},
    {"pair":"BTC-USDC","action":"sell"},
    {"pair":"USDC-USDT","action":"sell"}]}"#;
const PATH_REV: &str = r#"{"route":"USDT->USDC->BTC->USDT","steps":[
    {"pair":"USDC-USDT","action":"buy"},
    {"pair":"BTC-USDC","action":"buy"},
    {"pair":"BTC-USDT","action":"sell"}]}"#;

struct Harness {
    controller: Controller<MockExchange>,
    client: MockExchange,
    books: Arc<BookCache>,
    history: PathBuf,
}

fn temp_history(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "triarb-scenario-{tag}-{}.jsonl",
        std::process::id()
    ))
}

/// Wire a controller over the mock exchange with 60_000 USDT of capital.
fn harness(tag: &str, mode: Mode, with_credentials: bool, extra: &[(&str, &str)]) -> Harness {
    let history = temp_history(tag);
    let _ = std::fs::remove_file(&history);

    let mut pairs = vec![
        ("TRIARB_PATH1".to_string(), PATH_FWD.to_string()),
        ("TRIARB_PATH2".to_string(), PATH_REV.to_string()),
        (
            "TRIARB_HISTORY_FILE".to_string(),
            history.to_string_lossy().to_string(),
        ),
    ];
    if with_credentials {
        pairs.push(("TRIARB_API_KEY".to_string(), "test-key".to_string()));
        pairs.push(("TRIARB_SECRET_KEY".to_string(), "test-secret".to_string()));
        pairs.push(("TRIARB_PASSPHRASE".to_string(), "test-phrase".to_string()));
    }
    for (k, v) in extra {
        pairs.push((format!("TRIARB_{}", k.to_uppercase()), v.to_string()));
    }
    let config = Arc::new(Config::from_pairs(pairs).unwrap());

    let client = MockExchange::new();
    client.set_balance("USDT", dec!(60000));

    let books = Arc::new(BookCache::new());
    let portfolio = Arc::new(PortfolioCache::new());
    let mut balances = HashMap::new();
    balances.insert("USDT".to_string(), dec!(60000));
    portfolio.install(balances, OffsetDateTime::now_utc());

    let controller = Controller::new(
        config,
        Arc::new(client.clone()),
        books.clone(),
        portfolio,
        mode,
    );

    Harness {
        controller,
        client,
        books,
        history,
    }
}

fn store_book(
    books: &BookCache,
    client: &MockExchange,
    pair: Pair,
    bids: &[(Decimal, Decimal)],
    asks: &[(Decimal, Decimal)],
    at: OffsetDateTime,
) {
    books.store(OrderBook::new(
        pair.clone(),
        bids.iter().map(|&(p, s)| PriceLevel::new(p, s)).collect(),
        asks.iter().map(|&(p, s)| PriceLevel::new(p, s)).collect(),
        at,
    ));
    client.set_book(pair, bids.to_vec(), asks.to_vec());
}

/// Books where no round trip beats the fees.
fn tight_books(h: &Harness, at: OffsetDateTime) {
    store_book(
        &h.books,
        &h.client,
        Pair::new("BTC", "USDT"),
        &[(dec!(60000), dec!(1))],
        &[(dec!(60010), dec!(1))],
        at,
    );
    store_book(
        &h.books,
        &h.client,
        Pair::new("BTC", "USDC"),
        &[(dec!(60000), dec!(1))],
        &[(dec!(60010), dec!(1))],
        at,
    );
    store_book(
        &h.books,
        &h.client,
        Pair::new("USDC", "USDT"),
        &[(dec!(0.999), dec!(1000000))],
        &[(dec!(1.001), dec!(1000000))],
        at,
    );
}

/// Books where USDT→BTC→USDC→USDT clears roughly half a percent.
fn profitable_books(h: &Harness, at: OffsetDateTime) {
    store_book(
        &h.books,
        &h.client,
        Pair::new("BTC", "USDT"),
        &[(dec!(59990), dec!(1))],
        &[(dec!(60000), dec!(1))],
        at,
    );
    store_book(
        &h.books,
        &h.client,
        Pair::new("BTC", "USDC"),
        &[(dec!(60500), dec!(1))],
        &[(dec!(60510), dec!(1))],
        at,
    );
    store_book(
        &h.books,
        &h.client,
        Pair::new("USDC", "USDT"),
        &[(dec!(1.000), dec!(1000000))],
        &[(dec!(1.001), dec!(1000000))],
        at,
    );
}

fn history_records(path: &PathBuf) -> Vec<serde_json::Value> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Scenario: tight books produce no opportunities and no orders.
#[tokio::test(start_paused = true)]
async fn no_op_tick_on_tight_books() {
    let h = harness("noop", Mode::Auto, true, &[]);
    tight_books(&h, OffsetDateTime::now_utc());

    h.controller.tick_once().await.unwrap();

    let stats = h.controller.stats();
    assert_eq!(stats.scans, 1);
    assert_eq!(stats.opportunities, 0);
    assert_eq!(stats.executions, 0);
    assert!(h.client.placed_orders().is_empty());
    let _ = std::fs::remove_file(&h.history);
}

/// Scenario: a profitable USDT→BTC→USDC→USDT cycle executes end to end.
#[tokio::test(start_paused = true)]
async fn profitable_cycle_executes() {
    let h = harness("profit", Mode::Auto, true, &[]);
    profitable_books(&h, OffsetDateTime::now_utc());

    h.controller.tick_once().await.unwrap();

    let stats = h.controller.stats();
    assert_eq!(stats.opportunities, 1);
    assert_eq!(stats.executions, 1);
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.failures, 0);
    assert!(stats.net_profit > Decimal::ZERO, "profit {}", stats.net_profit);

    // Three legs, placed in path order.
    let placed = h.client.placed_orders();
    assert_eq!(placed.len(), 3);
    assert_eq!(placed[0].pair.id(), "BTC-USDT");
    assert_eq!(placed[1].pair.id(), "BTC-USDC");
    assert_eq!(placed[2].pair.id(), "USDC-USDT");

    // The execution was recorded to the trade history.
    let records = history_records(&h.history);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["route"], "USDT->BTC->USDC->USDT");
    assert_eq!(records[0]["success"], true);

    let _ = std::fs::remove_file(&h.history);
}

/// Scenario: a second opportunity inside the minimum interval is rejected
/// with reason `frequency`, and only the first attempt counts.
#[tokio::test(start_paused = true)]
async fn frequency_throttle_rejects_second_attempt() {
    let h = harness("frequency", Mode::Auto, true, &[]);
    profitable_books(&h, OffsetDateTime::now_utc());

    h.controller.tick_once().await.unwrap();
    // Books are still fresh and profitable; the throttle must refuse.
    h.controller.tick_once().await.unwrap();

    let stats = h.controller.stats();
    assert_eq!(stats.executions, 1);
    assert!(stats.rejections >= 1);

    let risk = h.controller.shared().risk_stats().unwrap();
    assert_eq!(risk.trades_today, 1);
    assert_eq!(risk.rejections.get("frequency"), Some(&1));

    assert_eq!(h.client.placed_orders().len(), 3);
    let _ = std::fs::remove_file(&h.history);
}

/// Scenario: leg 2 fills 40% within the timeout; the chain aborts, the
/// hung order is cancelled, and the result carries all three leg states.
#[tokio::test(start_paused = true)]
async fn partial_fill_aborts_chain() {
    let h = harness("partial", Mode::Auto, true, &[]);
    profitable_books(&h, OffsetDateTime::now_utc());
    h.client
        .set_fill_mode_for(&Pair::new("BTC", "USDC"), FillMode::Partial(dec!(0.4)));

    h.controller.tick_once().await.unwrap();

    let stats = h.controller.stats();
    assert_eq!(stats.executions, 1);
    assert_eq!(stats.successes, 0);
    assert_eq!(stats.failures, 1);
    assert_eq!(h.client.cancelled_orders().len(), 1);

    let records = history_records(&h.history);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["success"], false);
    assert_eq!(record["legs"][0]["status"], "filled");
    assert_eq!(record["legs"][1]["status"], "timed_out");
    assert_eq!(record["legs"][2]["status"], "not_attempted");
    // The partial fill is reflected in realized P&L rather than ignored.
    let realized: Decimal = record["realized_profit"].as_str().unwrap().parse().unwrap();
    assert_eq!(stats.net_profit, realized);

    let _ = std::fs::remove_file(&h.history);
}

/// Scenario: a book older than the freshness budget suppresses the path
/// even though the stale prices look profitable.
#[tokio::test(start_paused = true)]
async fn stale_book_skips_path() {
    let h = harness("stale", Mode::Auto, true, &[]);
    let now = OffsetDateTime::now_utc();
    profitable_books(&h, now);
    // BTC-USDT last updated 800 ms ago; budget is 500 ms.
    store_book(
        &h.books,
        &h.client,
        Pair::new("BTC", "USDT"),
        &[(dec!(59990), dec!(1))],
        &[(dec!(60000), dec!(1))],
        now - time::Duration::milliseconds(800),
    );

    h.controller.tick_once().await.unwrap();

    let stats = h.controller.stats();
    assert_eq!(stats.opportunities, 0);
    assert_eq!(stats.executions, 0);
    assert!(h.client.placed_orders().is_empty());
    let _ = std::fs::remove_file(&h.history);
}

/// Scenario: a realized loss over the stop-loss ratio trips the kill
/// switch; every later validation rejects with `stop_loss` at critical
/// level until the day boundary.
#[tokio::test(start_paused = true)]
async fn stop_loss_trips_kill_switch() {
    // Any loss trips the switch with a near-zero stop-loss ratio.
    let h = harness(
        "killswitch",
        Mode::Auto,
        true,
        &[("stop_loss_ratio", "0.00001"), ("max_daily_loss_ratio", "0.000005")],
    );
    profitable_books(&h, OffsetDateTime::now_utc());
    // Leg 1 fills 40% and hangs: the abort strands value and realizes a
    // small loss to fees and spread.
    h.client
        .set_fill_mode_for(&Pair::new("BTC", "USDT"), FillMode::Partial(dec!(0.4)));

    h.controller.tick_once().await.unwrap();

    let risk = h.controller.shared().risk_stats().unwrap();
    assert!(risk.realized_pnl_today < Decimal::ZERO);
    assert!(risk.kill_switch_active);
    assert_eq!(risk.level.to_string(), "critical");

    // Books restored to a perfectly tradable state: still rejected.
    h.client.set_fill_mode(FillMode::Immediate);
    h.client
        .set_fill_mode_for(&Pair::new("BTC", "USDT"), FillMode::Immediate);
    h.controller.tick_once().await.unwrap();

    let stats = h.controller.stats();
    assert_eq!(stats.executions, 1, "no second execution after the trip");
    let risk = h.controller.shared().risk_stats().unwrap();
    assert_eq!(risk.rejections.get("stop_loss"), Some(&1));

    let _ = std::fs::remove_file(&h.history);
}

/// Public-only mode (no credentials): opportunities are found but the risk
/// gate hard-rejects every trade.
#[tokio::test(start_paused = true)]
async fn public_only_mode_never_trades() {
    let h = harness("public", Mode::Auto, false, &[]);
    profitable_books(&h, OffsetDateTime::now_utc());

    h.controller.tick_once().await.unwrap();

    let stats = h.controller.stats();
    assert_eq!(stats.opportunities, 1);
    assert_eq!(stats.executions, 0);
    assert!(stats.rejections >= 1);
    assert!(h.client.placed_orders().is_empty());
    let _ = std::fs::remove_file(&h.history);
}

/// Monitor mode with credentials behaves the same: evaluation runs,
/// execution is disabled.
#[tokio::test(start_paused = true)]
async fn monitor_mode_never_trades() {
    let h = harness("monitor", Mode::Monitor, true, &[]);
    profitable_books(&h, OffsetDateTime::now_utc());

    h.controller.tick_once().await.unwrap();

    let stats = h.controller.stats();
    assert_eq!(stats.opportunities, 1);
    assert_eq!(stats.executions, 0);
    assert!(h.client.placed_orders().is_empty());

    let risk = h.controller.shared().risk_stats().unwrap();
    assert_eq!(risk.rejections.get("trading_disabled"), Some(&1));
    let _ = std::fs::remove_file(&h.history);
}

/// Shutdown is idempotent: stopping twice lands in the same terminal state.
#[tokio::test(start_paused = true)]
async fn shutdown_is_idempotent() {
    let mut h = harness("shutdown", Mode::Auto, true, &[]);
    tight_books(&h, OffsetDateTime::now_utc());

    h.controller.start().unwrap();
    tokio::task::yield_now().await;

    let first = h.controller.stop().await;
    let second = h.controller.stop().await;
    assert_eq!(first, second);
    assert_eq!(first.to_string(), "stopped");
    let _ = std::fs::remove_file(&h.history);
}
