//! Portfolio cache: best-effort view of free balances.
//!
//! One periodic sync task is the writer; the executor additionally applies
//! local debits/credits between refreshes to keep REST load down. In
//! public-only mode the cache never holds a snapshot and the risk gate
//! refuses to trade.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ExchangeError;
use crate::exchange::{with_retry, ExchangeApi};
use crate::orderbook::cache::BookCache;

/// Quote asset every valuation is expressed in.
pub const VALUATION_ASSET: &str = "USDT";

/// Point-in-time balances.
#[derive(Debug, Clone)]
pub struct Portfolio {
    /// Free balance per asset.
    pub balances: HashMap<String, Decimal>,
    /// When this snapshot was taken.
    pub fetched_at: OffsetDateTime,
}

impl Portfolio {
    /// Free balance of one asset; zero when absent.
    pub fn free(&self, asset: &str) -> Decimal {
        self.balances
            .get(&asset.to_uppercase())
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Total value in [`VALUATION_ASSET`], converting through cache
    /// mid-prices. Assets without a price contribute zero.
    pub fn total_value(&self, books: &BookCache) -> Decimal {
        self.balances
            .iter()
            .filter(|(_, amount)| **amount > Decimal::ZERO)
            .map(|(asset, amount)| {
                books
                    .conversion_rate(asset, VALUATION_ASSET)
                    .map(|rate| *amount * rate)
                    .unwrap_or(Decimal::ZERO)
            })
            .sum()
    }
}

/// Shared balance cache. Readers clone the snapshot; the sync task and the
/// executor's delta adjustments are the only writers.
#[derive(Debug, Default)]
pub struct PortfolioCache {
    inner: RwLock<Option<Portfolio>>,
}

impl PortfolioCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot, if one exists. `None` in public-only mode.
    pub fn snapshot(&self) -> Option<Portfolio> {
        self.inner.read().ok().and_then(|guard| guard.clone())
    }

    /// Age of the snapshot relative to now.
    pub fn age(&self) -> Option<Duration> {
        let snapshot = self.snapshot()?;
        let age = OffsetDateTime::now_utc() - snapshot.fetched_at;
        Some(age.try_into().unwrap_or(Duration::ZERO))
    }

    /// Whether the snapshot is older than `bound` (or absent entirely).
    pub fn is_stale(&self, bound: Duration) -> bool {
        self.age().map(|age| age > bound).unwrap_or(true)
    }

    /// Install a snapshot directly. Used by the sync task and by tests.
    pub fn install(&self, balances: HashMap<String, Decimal>, fetched_at: OffsetDateTime) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some(Portfolio {
                balances: balances
                    .into_iter()
                    .map(|(k, v)| (k.to_uppercase(), v))
                    .collect(),
                fetched_at,
            });
        }
    }

    /// Apply a local delta from the executor (debit on place, credit on
    /// fill). Balances never go below zero; a REST refresh reconciles later.
    pub fn adjust(&self, asset: &str, delta: Decimal) {
        if let Ok(mut guard) = self.inner.write() {
            if let Some(portfolio) = guard.as_mut() {
                let balance = portfolio
                    .balances
                    .entry(asset.to_uppercase())
                    .or_insert(Decimal::ZERO);
                let updated = (*balance + delta).max(Decimal::ZERO);
                debug!(asset = %asset, delta = %delta, balance = %updated, "adjusted balance");
                *balance = updated;
            }
        }
    }

    /// Refresh from the exchange. Public-only clients leave the cache empty.
    pub async fn refresh<E: ExchangeApi + ?Sized>(
        &self,
        client: &E,
        retries: u32,
        retry_delay: Duration,
    ) -> Result<(), ExchangeError> {
        match with_retry(retries, retry_delay, || client.get_balance()).await {
            Ok(balances) => {
                self.install(balances, OffsetDateTime::now_utc());
                Ok(())
            }
            Err(ExchangeError::MissingCredentials) => {
                debug!("public-only mode, portfolio unavailable");
                Err(ExchangeError::MissingCredentials)
            }
            Err(e) => {
                warn!(error = %e, "balance refresh failed, keeping stale snapshot");
                Err(e)
            }
        }
    }

    /// Periodic sync loop. Runs until shutdown; failures keep the previous
    /// snapshot and wait for the next cycle.
    pub async fn run_sync<E: ExchangeApi + ?Sized>(
        &self,
        client: &E,
        interval: Duration,
        retries: u32,
        retry_delay: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "balance sync started");
        loop {
            let _ = self.refresh(client, retries, retry_delay).await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("balance sync stopped");
    }
}
