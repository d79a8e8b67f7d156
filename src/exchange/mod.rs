//! Exchange gateway contract.
//!
//! The engine talks to the exchange exclusively through [`ExchangeApi`]; the
//! REST implementation and the in-memory mock both satisfy it. Signing and
//! transport details stay behind this seam.

pub mod mock;
pub mod rest;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::warn;

use crate::arbitrage::path::{Action, Pair};
use crate::error::ExchangeError;
use crate::orderbook::types::OrderBook;
use crate::trading::order::OrderState;

pub use mock::{FillMode, MockExchange};
pub use rest::RestClient;

/// Top-of-book quote.
#[derive(Debug, Clone)]
pub struct Ticker {
    /// Instrument quoted.
    pub pair: Pair,
    /// Best bid price.
    pub best_bid: Decimal,
    /// Best ask price.
    pub best_ask: Decimal,
    /// Exchange timestamp.
    pub ts: OffsetDateTime,
}

/// Order type accepted by the placement endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    /// Resting or marketable limit order.
    Limit,
    /// Market order. The executor never uses this; kept for the contract.
    Market,
}

impl OrderType {
    /// Wire name of the order type.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }
}

/// Parameters for a single order placement.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Instrument to trade.
    pub pair: Pair,
    /// Buy or sell.
    pub side: Action,
    /// Limit or market.
    pub order_type: OrderType,
    /// Size in base-asset units.
    pub size: Decimal,
    /// Limit price.
    pub price: Decimal,
    /// Locally-assigned monotonic client order id, used to reconcile when
    /// the exchange response is lost.
    pub client_id: String,
}

impl OrderRequest {
    /// Validate placement parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.size <= Decimal::ZERO {
            return Err("size must be positive".to_string());
        }
        if self.order_type == OrderType::Limit && self.price <= Decimal::ZERO {
            return Err("limit price must be positive".to_string());
        }
        Ok(())
    }
}

/// The REST surface the engine relies on. Every call carries the client's
/// configured deadline; implementations must not block past it.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Free balances per asset.
    async fn get_balance(&self) -> Result<HashMap<String, Decimal>, ExchangeError>;

    /// Depth snapshot for one instrument.
    async fn get_order_book(&self, pair: &Pair, depth: u32) -> Result<OrderBook, ExchangeError>;

    /// Top-of-book quote for one instrument.
    async fn get_ticker(&self, pair: &Pair) -> Result<Ticker, ExchangeError>;

    /// Place an order; returns the exchange order id.
    async fn place_order(&self, request: &OrderRequest) -> Result<String, ExchangeError>;

    /// Cancel an order.
    async fn cancel_order(&self, pair: &Pair, order_id: &str) -> Result<(), ExchangeError>;

    /// Current state of an order.
    async fn get_order_status(&self, pair: &Pair, order_id: &str)
        -> Result<OrderState, ExchangeError>;
}

/// Run `op` up to `1 + retries` times, backing off `delay` between attempts.
/// Only transport-class failures are retried.
pub async fn with_retry<T, F, Fut>(
    retries: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ExchangeError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                warn!(error = %e, attempt, "retrying exchange call");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
