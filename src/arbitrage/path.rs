//! Trading pairs and arbitrage path definitions.
//!
//! Paths are config-time values: an ordered cycle of `(pair, action)` steps
//! whose asset chain begins and ends in the same asset. Nothing here is
//! discovered at runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ConfigError;

/// Assets treated as stablecoins by the sanity filters.
pub const STABLE_ASSETS: &[&str] = &["USDT", "USDC", "DAI"];

/// Whether an asset symbol is a known stablecoin.
pub fn is_stable(asset: &str) -> bool {
    STABLE_ASSETS.contains(&asset)
}

/// Base-asset priority used to pick the canonical orientation of a pair.
/// Lower ranks become the base side; ties fall back to lexicographic order.
fn base_rank(asset: &str) -> u8 {
    match asset {
        "BTC" => 1,
        "ETH" => 2,
        "BNB" => 3,
        "USDT" => 8,
        "USDC" => 9,
        _ => 5,
    }
}

/// Order side of a single leg.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Buy the base asset, spending the quote asset.
    #[strum(serialize = "buy", serialize = "BUY")]
    Buy,
    /// Sell the base asset, receiving the quote asset.
    #[strum(serialize = "sell", serialize = "SELL")]
    Sell,
}

/// A spot instrument, canonically `BASE-QUOTE`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pair {
    /// Base asset symbol.
    pub base: String,
    /// Quote asset symbol.
    pub quote: String,
}

impl Pair {
    /// Build a pair from explicit base and quote.
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// Canonical pair for two assets, plus the action that converts
    /// `from` into `to` on that pair.
    pub fn canonical(from: &str, to: &str) -> (Pair, Action) {
        let (a, b) = (from.to_uppercase(), to.to_uppercase());
        let a_first = match base_rank(&a).cmp(&base_rank(&b)) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => a < b,
        };
        if a_first {
            // `from` is the base: selling base yields quote.
            (Pair::new(a, b), Action::Sell)
        } else {
            // `to` is the base: buying base spends quote.
            (Pair::new(b, a), Action::Buy)
        }
    }

    /// Canonical instrument id, e.g. `BTC-USDT`.
    pub fn id(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }

    /// Asset spent when performing `action` on this pair.
    pub fn input_asset(&self, action: Action) -> &str {
        match action {
            Action::Buy => &self.quote,
            Action::Sell => &self.base,
        }
    }

    /// Asset received when performing `action` on this pair.
    pub fn output_asset(&self, action: Action) -> &str {
        match action {
            Action::Buy => &self.base,
            Action::Sell => &self.quote,
        }
    }

    /// Whether both sides are stablecoins.
    pub fn is_stable_pair(&self) -> bool {
        is_stable(&self.base) && is_stable(&self.quote)
    }
}

impl FromStr for Pair {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
                let pair = Pair::new(base, quote);
                if pair.base == pair.quote {
                    return Err(ConfigError::InvalidValue {
                        key: s.to_string(),
                        reason: "base and quote must differ".to_string(),
                    });
                }
                Ok(pair)
            }
            _ => Err(ConfigError::InvalidValue {
                key: s.to_string(),
                reason: "expected BASE-QUOTE".to_string(),
            }),
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

/// One leg of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    /// Instrument traded.
    pub pair: Pair,
    /// Side taken on that instrument.
    pub action: Action,
}

impl PathStep {
    /// Asset this step consumes.
    pub fn input_asset(&self) -> &str {
        self.pair.input_asset(self.action)
    }

    /// Asset this step produces.
    pub fn output_asset(&self) -> &str {
        self.pair.output_asset(self.action)
    }
}

/// JSON shape of a path value in configuration:
/// `{"route": "USDT->BTC->USDC->USDT", "steps": [{"pair": "BTC-USDT", "action": "buy"}, ...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PathSpec {
    /// Human-readable asset chain. Optional; derived from steps if absent.
    #[serde(default)]
    pub route: Option<String>,
    /// Explicit trading steps, in execution order.
    pub steps: Vec<RawStep>,
}

/// One step as written in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStep {
    /// Instrument id, e.g. `BTC-USDT`.
    pub pair: String,
    /// `buy` or `sell`.
    pub action: String,
}

/// A validated arbitrage cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    /// Config key this path came from (`path1`, `path2`, ...).
    pub name: String,
    /// Asset chain, first == last.
    pub assets: Vec<String>,
    /// Trading steps, one per hop in `assets`.
    pub steps: Vec<PathStep>,
}

impl Path {
    /// Parse and validate a configured path.
    pub fn from_spec(name: &str, spec: &PathSpec) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPath {
            name: name.to_string(),
            reason,
        };

        if spec.steps.len() < 3 {
            return Err(invalid(format!(
                "a cycle needs at least 3 steps, got {}",
                spec.steps.len()
            )));
        }

        let mut steps = Vec::with_capacity(spec.steps.len());
        for raw in &spec.steps {
            let pair: Pair = raw.pair.parse().map_err(|e: ConfigError| invalid(e.to_string()))?;
            let action = Action::from_str(&raw.action)
                .map_err(|_| invalid(format!("unknown action {:?}", raw.action)))?;
            steps.push(PathStep { pair, action });
        }

        // Walk the steps to derive the asset chain, checking each hop connects.
        let mut assets = vec![steps[0].input_asset().to_string()];
        for (i, step) in steps.iter().enumerate() {
            let have = assets.last().cloned().unwrap_or_default();
            if step.input_asset() != have {
                return Err(invalid(format!(
                    "step {} consumes {} but the chain holds {}",
                    i + 1,
                    step.input_asset(),
                    have
                )));
            }
            assets.push(step.output_asset().to_string());
        }

        if assets.first() != assets.last() {
            return Err(invalid(format!(
                "cycle does not close: starts at {}, ends at {}",
                assets.first().map(String::as_str).unwrap_or("?"),
                assets.last().map(String::as_str).unwrap_or("?"),
            )));
        }

        // If a route string is present it must agree with the derived chain.
        if let Some(route) = &spec.route {
            let declared: Vec<String> = route
                .split("->")
                .map(|a| a.trim().to_uppercase())
                .collect();
            if declared != assets {
                return Err(invalid(format!(
                    "route {:?} disagrees with steps ({})",
                    route,
                    assets.join("->"),
                )));
            }
        }

        Ok(Path {
            name: name.to_string(),
            assets,
            steps,
        })
    }

    /// Asset the cycle starts and ends in.
    pub fn start_asset(&self) -> &str {
        &self.assets[0]
    }

    /// Number of legs.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Route string, e.g. `USDT->BTC->USDC->USDT`.
    pub fn route(&self) -> String {
        self.assets.join("->")
    }

    /// All distinct pairs this path trades.
    pub fn pairs(&self) -> Vec<&Pair> {
        let mut seen: Vec<&Pair> = Vec::new();
        for step in &self.steps {
            if !seen.contains(&&step.pair) {
                seen.push(&step.pair);
            }
        }
        seen
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.route())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(route: Option<&str>, steps: &[(&str, &str)]) -> PathSpec {
        PathSpec {
            route: route.map(String::from),
            steps: steps
                .iter()
                .map(|(pair, action)| RawStep {
                    pair: pair.to_string(),
                    action: action.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn canonical_pair_prefers_major_base() {
        let (pair, action) = Pair::canonical("USDT", "BTC");
        assert_eq!(pair.id(), "BTC-USDT");
        assert_eq!(action, Action::Buy);

        let (pair, action) = Pair::canonical("BTC", "USDT");
        assert_eq!(pair.id(), "BTC-USDT");
        assert_eq!(action, Action::Sell);
    }

    #[test]
    fn canonical_pair_orders_stables() {
        // USDT outranks USDC as base.
        let (pair, action) = Pair::canonical("USDT", "USDC");
        assert_eq!(pair.id(), "USDT-USDC");
        assert_eq!(action, Action::Sell);

        let (pair, action) = Pair::canonical("USDC", "USDT");
        assert_eq!(pair.id(), "USDT-USDC");
        assert_eq!(action, Action::Buy);
    }

    #[test]
    fn canonical_pair_lexicographic_tiebreak() {
        let (pair, _) = Pair::canonical("SOL", "ATOM");
        assert_eq!(pair.id(), "ATOM-SOL");
    }

    #[test]
    fn pair_parse_rejects_garbage() {
        assert!("BTCUSDT".parse::<Pair>().is_err());
        assert!("BTC-".parse::<Pair>().is_err());
        assert!("BTC-BTC".parse::<Pair>().is_err());
        assert!("BTC-USDT-X".parse::<Pair>().is_err());
    }

    #[test]
    fn path_derives_and_closes_cycle() {
        let path = Path::from_spec(
            "path1",
            &spec(
                Some("USDT->BTC->USDC->USDT"),
                &[
                    ("BTC-USDT", "buy"),
                    ("BTC-USDC", "sell"),
                    ("USDC-USDT", "sell"),
                ],
            ),
        )
        .unwrap();

        assert_eq!(path.start_asset(), "USDT");
        assert_eq!(path.step_count(), 3);
        assert_eq!(path.route(), "USDT->BTC->USDC->USDT");
        assert_eq!(path.pairs().len(), 3);
    }

    #[test]
    fn path_rejects_open_cycle() {
        let err = Path::from_spec(
            "path1",
            &spec(
                None,
                &[
                    ("BTC-USDT", "buy"),
                    ("BTC-USDC", "sell"),
                    ("ETH-USDC", "buy"),
                ],
            ),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPath { .. }));
    }

    #[test]
    fn path_rejects_disconnected_step() {
        let err = Path::from_spec(
            "path1",
            &spec(
                None,
                &[
                    ("BTC-USDT", "buy"),
                    ("ETH-USDC", "sell"),
                    ("USDC-USDT", "sell"),
                ],
            ),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPath { .. }));
    }

    #[test]
    fn path_rejects_route_mismatch() {
        let err = Path::from_spec(
            "path1",
            &spec(
                Some("USDT->ETH->USDC->USDT"),
                &[
                    ("BTC-USDT", "buy"),
                    ("BTC-USDC", "sell"),
                    ("USDC-USDT", "sell"),
                ],
            ),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPath { .. }));
    }

    #[test]
    fn path_rejects_short_cycle() {
        let err = Path::from_spec(
            "path1",
            &spec(None, &[("BTC-USDT", "buy"), ("BTC-USDT", "sell")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPath { .. }));
    }

    #[test]
    fn step_asset_flow() {
        let step = PathStep {
            pair: Pair::new("BTC", "USDT"),
            action: Action::Buy,
        };
        assert_eq!(step.input_asset(), "USDT");
        assert_eq!(step.output_asset(), "BTC");

        let step = PathStep {
            pair: Pair::new("BTC", "USDT"),
            action: Action::Sell,
        };
        assert_eq!(step.input_asset(), "BTC");
        assert_eq!(step.output_asset(), "USDT");
    }

    #[test]
    fn stable_pair_detection() {
        assert!(Pair::new("USDT", "USDC").is_stable_pair());
        assert!(!Pair::new("BTC", "USDT").is_stable_pair());
    }
}
