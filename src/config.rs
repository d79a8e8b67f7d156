//! Application configuration loaded from environment variables.
//!
//! The configuration is an immutable value constructed once at startup and
//! passed by reference to every subsystem. Keys live under the `TRIARB_`
//! prefix; any prefixed key the schema does not recognize aborts startup.
//!
//! Three key families are dynamic and scanned out before the fixed schema is
//! deserialized:
//! - `TRIARB_PATH<N>`: JSON `{route, steps}` arbitrage path definitions
//! - `TRIARB_FEE_RATE_<BASE>_<QUOTE>`: per-pair fee overrides
//! - `TRIARB_INITIAL_<ASSET>`: declared starting holdings

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::arbitrage::path::{Path, PathSpec};
use crate::error::ConfigError;

/// Environment prefix for every configuration key.
pub const ENV_PREFIX: &str = "TRIARB_";

/// Fixed-schema portion of the configuration, deserialized by `envy`.
/// `deny_unknown_fields` is what makes unrecognized keys fail fast.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Settings {
    // === Trading ===
    #[serde(default = "default_fee_rate")]
    fee_rate: Decimal,
    #[serde(default)]
    slippage_tolerance: Option<Decimal>,
    /// Deprecated alias for `slippage_tolerance`.
    #[serde(default)]
    price_adjustment: Option<Decimal>,
    #[serde(default = "default_min_profit_threshold")]
    min_profit_threshold: Decimal,
    #[serde(default = "default_order_timeout_secs")]
    order_timeout_secs: f64,
    #[serde(default = "default_min_trade_amount")]
    min_trade_amount: Decimal,
    #[serde(default = "default_monitor_interval_secs")]
    monitor_interval_secs: f64,

    // === Profit sanity bounds ===
    #[serde(default = "default_max_profit_rate_threshold")]
    max_profit_rate_threshold: Decimal,
    #[serde(default)]
    max_price_spread: Option<Decimal>,
    #[serde(default)]
    max_stablecoin_spread: Option<Decimal>,
    #[serde(default)]
    stablecoin_price_range_min: Option<Decimal>,
    #[serde(default)]
    stablecoin_price_range_max: Option<Decimal>,

    // === Risk ===
    #[serde(default = "default_max_position_ratio")]
    max_position_ratio: Decimal,
    #[serde(default = "default_max_single_trade_ratio")]
    max_single_trade_ratio: Decimal,
    #[serde(default = "default_min_arbitrage_interval_secs")]
    min_arbitrage_interval_secs: f64,
    #[serde(default = "default_max_daily_trades")]
    max_daily_trades: u32,
    #[serde(default = "default_max_daily_loss_ratio")]
    max_daily_loss_ratio: Decimal,
    #[serde(default = "default_stop_loss_ratio")]
    stop_loss_ratio: Decimal,
    #[serde(default = "default_network_retry_count")]
    network_retry_count: u32,
    #[serde(default = "default_network_retry_delay_secs")]
    network_retry_delay_secs: f64,

    // === Market data ===
    #[serde(default = "default_freshness_budget_ms")]
    freshness_budget_ms: u64,
    #[serde(default = "default_opportunity_max_age_secs")]
    opportunity_max_age_secs: f64,
    #[serde(default = "default_balance_refresh_secs")]
    balance_refresh_secs: u64,
    #[serde(default = "default_book_depth")]
    book_depth: u32,

    // === Execution ===
    #[serde(default = "default_order_poll_interval_ms")]
    order_poll_interval_ms: u64,
    #[serde(default = "default_dust_ratio")]
    dust_ratio: Decimal,
    #[serde(default = "default_balance_headroom")]
    balance_headroom: Decimal,
    #[serde(default = "default_size_step")]
    size_step: Decimal,
    #[serde(default = "default_price_step")]
    price_step: Decimal,

    // === Endpoints ===
    #[serde(default = "default_rest_url")]
    rest_url: String,
    #[serde(default = "default_ws_url")]
    ws_url: String,
    #[serde(default = "default_http_timeout_ms")]
    http_timeout_ms: u64,
    #[serde(default = "default_ws_reconnect_max_delay_secs")]
    ws_reconnect_max_delay_secs: u64,

    // === System ===
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
    #[serde(default = "default_history_file")]
    history_file: String,
    #[serde(default = "default_status_port")]
    status_port: u16,

    // === API credentials ===
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    secret_key: Option<String>,
    #[serde(default)]
    passphrase: Option<String>,
    #[serde(default = "default_flag")]
    flag: String,
}

fn default_fee_rate() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_min_profit_threshold() -> Decimal {
    Decimal::new(3, 3) // 0.003
}

fn default_order_timeout_secs() -> f64 {
    3.0
}

fn default_min_trade_amount() -> Decimal {
    Decimal::new(100, 0)
}

fn default_monitor_interval_secs() -> f64 {
    1.0
}

fn default_max_profit_rate_threshold() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_max_position_ratio() -> Decimal {
    Decimal::new(2, 1) // 0.2
}

fn default_max_single_trade_ratio() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_min_arbitrage_interval_secs() -> f64 {
    10.0
}

fn default_max_daily_trades() -> u32 {
    100
}

fn default_max_daily_loss_ratio() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_stop_loss_ratio() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_network_retry_count() -> u32 {
    3
}

fn default_network_retry_delay_secs() -> f64 {
    1.0
}

fn default_freshness_budget_ms() -> u64 {
    500
}

fn default_opportunity_max_age_secs() -> f64 {
    5.0
}

fn default_balance_refresh_secs() -> u64 {
    60
}

fn default_book_depth() -> u32 {
    20
}

fn default_order_poll_interval_ms() -> u64 {
    150
}

fn default_dust_ratio() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_balance_headroom() -> Decimal {
    Decimal::new(105, 2) // 1.05
}

fn default_size_step() -> Decimal {
    Decimal::new(1, 8) // 0.00000001
}

fn default_price_step() -> Decimal {
    Decimal::new(1, 8)
}

fn default_rest_url() -> String {
    "https://www.okx.com".to_string()
}

fn default_ws_url() -> String {
    "wss://ws.okx.com:8443/ws/v5/public".to_string()
}

fn default_http_timeout_ms() -> u64 {
    5000
}

fn default_ws_reconnect_max_delay_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_history_file() -> String {
    "logs/trade_history.jsonl".to_string()
}

fn default_status_port() -> u16 {
    8080
}

fn default_flag() -> String {
    "1".to_string() // sandbox unless told otherwise
}

/// API credentials for the exchange. Absent in public-only mode.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    /// API key id.
    pub api_key: String,
    /// API secret used for request signing.
    pub secret_key: String,
    /// Account passphrase.
    pub passphrase: String,
    /// `"1"` selects the exchange sandbox, `"0"` live trading.
    pub sandbox: bool,
}

/// Immutable application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default taker fee applied when a pair has no override.
    pub fee_rate: Decimal,
    /// Per-pair fee overrides keyed by canonical pair id.
    pub fee_overrides: HashMap<String, Decimal>,
    /// Limit-price cushion applied when placing marketable orders.
    pub slippage_tolerance: Decimal,
    /// Minimum net profit rate for an opportunity to be emitted.
    pub min_profit_threshold: Decimal,
    /// Per-leg order timeout.
    pub order_timeout: Duration,
    /// Minimum stake, in start-asset terms.
    pub min_trade_amount: Decimal,
    /// Controller tick interval.
    pub monitor_interval: Duration,

    /// Profit rates above this are treated as data artifacts.
    pub max_profit_rate_threshold: Decimal,
    /// Maximum tolerated relative spread on any leg.
    pub max_price_spread: Option<Decimal>,
    /// Maximum tolerated spread on stablecoin pairs.
    pub max_stablecoin_spread: Option<Decimal>,
    /// Plausible stablecoin mid-price band.
    pub stablecoin_price_range: Option<(Decimal, Decimal)>,

    /// Largest fraction of total balance any asset position may reach.
    pub max_position_ratio: Decimal,
    /// Largest fraction of total balance a single trade may use.
    pub max_single_trade_ratio: Decimal,
    /// Minimum spacing between arbitrage attempts.
    pub min_arbitrage_interval: Duration,
    /// Daily attempt cap.
    pub max_daily_trades: u32,
    /// Daily loss ratio above which validation rejects.
    pub max_daily_loss_ratio: Decimal,
    /// Daily loss ratio that trips the kill switch until next day.
    pub stop_loss_ratio: Decimal,
    /// Bounded retries for transient network failures.
    pub network_retry_count: u32,
    /// Delay between those retries.
    pub network_retry_delay: Duration,

    /// Maximum book age accepted on the evaluation path.
    pub freshness_budget: Duration,
    /// Opportunity expiry.
    pub opportunity_max_age: Duration,
    /// Periodic portfolio refresh cadence.
    pub balance_refresh: Duration,
    /// Depth levels requested from REST snapshots.
    pub book_depth: u32,

    /// Order status poll cadence within a leg.
    pub order_poll_interval: Duration,
    /// Unfilled remainder below this fraction of the request is dust.
    pub dust_ratio: Decimal,
    /// Required start-asset balance as a multiple of the stake.
    pub balance_headroom: Decimal,
    /// Quantity rounding step.
    pub size_step: Decimal,
    /// Price rounding step.
    pub price_step: Decimal,

    /// REST base URL.
    pub rest_url: String,
    /// WebSocket public endpoint.
    pub ws_url: String,
    /// Per-request REST deadline.
    pub http_timeout: Duration,
    /// Reconnect backoff ceiling.
    pub ws_reconnect_max_delay: Duration,

    /// Log level when RUST_LOG is unset.
    pub log_level: String,
    /// Optional log file path.
    pub log_file: Option<String>,
    /// Append-only trade record path.
    pub history_file: String,
    /// HTTP status server port.
    pub status_port: u16,

    /// Declared starting holdings, by asset.
    pub initial_holdings: HashMap<String, Decimal>,
    /// Configured arbitrage cycles, in config order.
    pub paths: Vec<Path>,
    /// Exchange credentials; `None` puts the engine in public-only mode.
    pub credentials: Option<ApiCredentials>,
}

impl Config {
    /// Load configuration from the process environment, reading `.env` first.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let pairs: Vec<(String, String)> = std::env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        Self::from_pairs(pairs)
    }

    /// Build a configuration from explicit key/value pairs (keys keep the
    /// `TRIARB_` prefix). This is the seam the tests drive.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self, ConfigError> {
        let mut fixed = Vec::new();
        let mut path_specs: Vec<(String, String)> = Vec::new();
        let mut fee_overrides = HashMap::new();
        let mut initial_holdings = HashMap::new();

        for (key, value) in pairs {
            let name = key
                .strip_prefix(ENV_PREFIX)
                .unwrap_or(&key)
                .to_ascii_lowercase();

            if let Some(n) = name.strip_prefix("path") {
                if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) {
                    path_specs.push((name.clone(), value));
                    continue;
                }
            }
            if let Some(rest) = name.strip_prefix("fee_rate_") {
                let pair_id = dynamic_pair_id(&name, rest)?;
                let rate = parse_decimal(&name, &value)?;
                if rate < Decimal::ZERO || rate > Decimal::ONE {
                    return Err(invalid(&name, "fee rate must be within 0..=1"));
                }
                fee_overrides.insert(pair_id, rate);
                continue;
            }
            if let Some(asset) = name.strip_prefix("initial_") {
                if asset.is_empty() {
                    return Err(ConfigError::UnknownKey(key));
                }
                let amount = parse_decimal(&name, &value)?;
                if amount < Decimal::ZERO {
                    return Err(invalid(&name, "initial holding must be >= 0"));
                }
                initial_holdings.insert(asset.to_uppercase(), amount);
                continue;
            }

            fixed.push((key, value));
        }

        let settings: Settings = envy::prefixed(ENV_PREFIX).from_iter(fixed)?;

        // Keep dynamic path keys in numeric order: path1, path2, ... path10.
        path_specs.sort_by(|a, b| (a.0.len(), &a.0).cmp(&(b.0.len(), &b.0)));
        let mut paths = Vec::with_capacity(path_specs.len());
        for (name, json) in &path_specs {
            let spec: PathSpec =
                serde_json::from_str(json).map_err(|e| ConfigError::InvalidPath {
                    name: name.clone(),
                    reason: format!("not valid path JSON: {e}"),
                })?;
            paths.push(Path::from_spec(name, &spec)?);
        }

        Self::assemble(settings, fee_overrides, initial_holdings, paths)
    }

    fn assemble(
        s: Settings,
        fee_overrides: HashMap<String, Decimal>,
        initial_holdings: HashMap<String, Decimal>,
        paths: Vec<Path>,
    ) -> Result<Self, ConfigError> {
        let slippage_tolerance = match (s.slippage_tolerance, s.price_adjustment) {
            (Some(v), _) => v,
            (None, Some(v)) => {
                warn!("price_adjustment is deprecated, use slippage_tolerance");
                v
            }
            (None, None) => Decimal::new(2, 3), // 0.002
        };

        let credentials = match (&s.api_key, &s.secret_key, &s.passphrase) {
            (Some(api_key), Some(secret_key), Some(passphrase)) => {
                let sandbox = match s.flag.as_str() {
                    "0" => false,
                    "1" => true,
                    other => {
                        return Err(invalid("flag", &format!("expected \"0\" or \"1\", got {other:?}")))
                    }
                };
                Some(ApiCredentials {
                    api_key: api_key.clone(),
                    secret_key: secret_key.clone(),
                    passphrase: passphrase.clone(),
                    sandbox,
                })
            }
            (None, None, None) => None,
            _ => {
                warn!("incomplete API credentials, running in public-only mode");
                None
            }
        };

        // Seconds fields feed Duration::from_secs_f64, which rejects
        // negative and non-finite values by panicking; screen them here.
        for (key, value) in [
            ("order_timeout_secs", s.order_timeout_secs),
            ("monitor_interval_secs", s.monitor_interval_secs),
            ("min_arbitrage_interval_secs", s.min_arbitrage_interval_secs),
            ("network_retry_delay_secs", s.network_retry_delay_secs),
            ("opportunity_max_age_secs", s.opportunity_max_age_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(key, "must be a non-negative number"));
            }
        }

        let stablecoin_price_range = match (s.stablecoin_price_range_min, s.stablecoin_price_range_max)
        {
            (Some(lo), Some(hi)) if lo <= hi => Some((lo, hi)),
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "stablecoin_price_range_min",
                    "must not exceed stablecoin_price_range_max",
                ))
            }
            (None, None) => None,
            _ => {
                return Err(invalid(
                    "stablecoin_price_range_min",
                    "both range bounds must be set together",
                ))
            }
        };

        let config = Config {
            fee_rate: s.fee_rate,
            fee_overrides,
            slippage_tolerance,
            min_profit_threshold: s.min_profit_threshold,
            order_timeout: Duration::from_secs_f64(s.order_timeout_secs),
            min_trade_amount: s.min_trade_amount,
            monitor_interval: Duration::from_secs_f64(s.monitor_interval_secs),
            max_profit_rate_threshold: s.max_profit_rate_threshold,
            max_price_spread: s.max_price_spread,
            max_stablecoin_spread: s.max_stablecoin_spread,
            stablecoin_price_range,
            max_position_ratio: s.max_position_ratio,
            max_single_trade_ratio: s.max_single_trade_ratio,
            min_arbitrage_interval: Duration::from_secs_f64(s.min_arbitrage_interval_secs),
            max_daily_trades: s.max_daily_trades,
            max_daily_loss_ratio: s.max_daily_loss_ratio,
            stop_loss_ratio: s.stop_loss_ratio,
            network_retry_count: s.network_retry_count,
            network_retry_delay: Duration::from_secs_f64(s.network_retry_delay_secs),
            freshness_budget: Duration::from_millis(s.freshness_budget_ms),
            opportunity_max_age: Duration::from_secs_f64(s.opportunity_max_age_secs),
            balance_refresh: Duration::from_secs(s.balance_refresh_secs),
            book_depth: s.book_depth,
            order_poll_interval: Duration::from_millis(s.order_poll_interval_ms),
            dust_ratio: s.dust_ratio,
            balance_headroom: s.balance_headroom,
            size_step: s.size_step,
            price_step: s.price_step,
            rest_url: s.rest_url,
            ws_url: s.ws_url,
            http_timeout: Duration::from_millis(s.http_timeout_ms),
            ws_reconnect_max_delay: Duration::from_secs(s.ws_reconnect_max_delay_secs),
            log_level: s.log_level,
            log_file: s.log_file,
            history_file: s.history_file,
            status_port: s.status_port,
            initial_holdings,
            paths,
            credentials,
        };

        config.validate()?;
        Ok(config)
    }

    /// Range-check every bounded setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(ok: bool, key: &str, reason: &str) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(invalid(key, reason))
            }
        }

        let zero = Decimal::ZERO;
        let one = Decimal::ONE;

        check(
            self.fee_rate >= zero && self.fee_rate <= one,
            "fee_rate",
            "must be within 0..=1",
        )?;
        check(
            self.slippage_tolerance >= zero && self.slippage_tolerance <= Decimal::new(2, 2),
            "slippage_tolerance",
            "must be within 0..=0.02",
        )?;
        check(
            self.min_profit_threshold >= zero && self.min_profit_threshold <= Decimal::new(5, 2),
            "min_profit_threshold",
            "must be within 0..=0.05",
        )?;
        check(
            self.order_timeout > Duration::ZERO && self.order_timeout <= Duration::from_secs(60),
            "order_timeout_secs",
            "must be within (0, 60]",
        )?;
        check(
            self.min_trade_amount > zero,
            "min_trade_amount",
            "must be > 0",
        )?;
        check(
            self.monitor_interval > Duration::ZERO,
            "monitor_interval_secs",
            "must be > 0",
        )?;
        check(
            self.max_position_ratio > zero && self.max_position_ratio <= one,
            "max_position_ratio",
            "must be within (0, 1]",
        )?;
        check(
            self.max_single_trade_ratio > zero && self.max_single_trade_ratio <= one,
            "max_single_trade_ratio",
            "must be within (0, 1]",
        )?;
        check(
            self.max_single_trade_ratio <= self.max_position_ratio,
            "max_single_trade_ratio",
            "must not exceed max_position_ratio",
        )?;
        check(
            self.min_arbitrage_interval <= Duration::from_secs(3600),
            "min_arbitrage_interval_secs",
            "must be within 0..=3600",
        )?;
        check(
            (1..=10_000).contains(&self.max_daily_trades),
            "max_daily_trades",
            "must be within 1..=10000",
        )?;
        check(
            self.max_daily_loss_ratio > zero && self.max_daily_loss_ratio <= one,
            "max_daily_loss_ratio",
            "must be within (0, 1]",
        )?;
        check(
            self.stop_loss_ratio > zero && self.stop_loss_ratio <= one,
            "stop_loss_ratio",
            "must be within (0, 1]",
        )?;
        check(
            self.network_retry_count <= 10,
            "network_retry_count",
            "must be within 0..=10",
        )?;
        check(
            self.dust_ratio >= zero && self.dust_ratio < one,
            "dust_ratio",
            "must be within [0, 1)",
        )?;
        check(
            self.balance_headroom >= one,
            "balance_headroom",
            "must be >= 1",
        )?;

        Ok(())
    }

    /// Fee rate for a pair, falling back to the default.
    pub fn fee_for(&self, pair_id: &str) -> Decimal {
        self.fee_overrides
            .get(pair_id)
            .copied()
            .unwrap_or(self.fee_rate)
    }

    /// Whether the engine runs without credentials (trading forbidden).
    pub fn is_public_only(&self) -> bool {
        self.credentials.is_none()
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    value
        .parse::<Decimal>()
        .map_err(|_| invalid(key, &format!("not a decimal: {value:?}")))
}

/// Turn `fee_rate_btc_usdt` into `BTC-USDT`.
fn dynamic_pair_id(full_key: &str, rest: &str) -> Result<String, ConfigError> {
    let parts: Vec<&str> = rest.split('_').filter(|p| !p.is_empty()).collect();
    if parts.len() != 2 {
        return Err(invalid(
            full_key,
            "expected fee_rate_<base>_<quote>",
        ));
    }
    Ok(format!(
        "{}-{}",
        parts[0].to_uppercase(),
        parts[1].to_uppercase()
    ))
}
