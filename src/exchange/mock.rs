//! In-memory exchange used by unit and scenario tests.
//!
//! Fill behavior is scripted per instrument: orders fill immediately, fill a
//! fixed fraction and then hang, or never fill. No network anywhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::arbitrage::path::Pair;
use crate::error::ExchangeError;
use crate::exchange::{ExchangeApi, OrderRequest, Ticker};
use crate::orderbook::types::{OrderBook, PriceLevel};
use crate::trading::order::{OrderState, OrderStatus};

/// Scripted fill behavior for placed orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Fill the full size at the limit price as soon as the order lands.
    Immediate,
    /// Fill `ratio` of the size, then stay partially filled forever.
    Partial(Decimal),
    /// Rest on the book untouched.
    Never,
}

#[derive(Debug, Clone)]
struct MockOrder {
    request: OrderRequest,
    status: OrderStatus,
    filled: Decimal,
    avg_price: Option<Decimal>,
}

/// Scriptable in-memory [`ExchangeApi`] implementation.
#[derive(Clone, Default)]
pub struct MockExchange {
    books: Arc<Mutex<HashMap<String, OrderBook>>>,
    balances: Arc<Mutex<HashMap<String, Decimal>>>,
    orders: Arc<Mutex<HashMap<String, MockOrder>>>,
    placed: Arc<Mutex<Vec<OrderRequest>>>,
    cancelled: Arc<Mutex<Vec<String>>>,
    default_mode: Arc<Mutex<Option<FillMode>>>,
    pair_modes: Arc<Mutex<HashMap<String, FillMode>>>,
    fail_balance: Arc<AtomicBool>,
    public_only: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl MockExchange {
    /// Fresh mock: every order fills immediately, balances empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a balance.
    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        self.balances
            .lock()
            .unwrap()
            .insert(asset.to_uppercase(), amount);
    }

    /// Install a depth book for an instrument.
    pub fn set_book(
        &self,
        pair: Pair,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
    ) {
        let book = OrderBook::new(
            pair.clone(),
            bids.into_iter().map(|(p, s)| PriceLevel::new(p, s)).collect(),
            asks.into_iter().map(|(p, s)| PriceLevel::new(p, s)).collect(),
            OffsetDateTime::now_utc(),
        );
        self.books.lock().unwrap().insert(pair.id(), book);
    }

    /// Default fill behavior for pairs without an override.
    pub fn set_fill_mode(&self, mode: FillMode) {
        *self.default_mode.lock().unwrap() = Some(mode);
    }

    /// Fill behavior for one instrument.
    pub fn set_fill_mode_for(&self, pair: &Pair, mode: FillMode) {
        self.pair_modes.lock().unwrap().insert(pair.id(), mode);
    }

    /// Make balance queries fail with a retryable transport error.
    pub fn fail_balance(&self, fail: bool) {
        self.fail_balance.store(fail, Ordering::SeqCst);
    }

    /// Simulate a client without credentials.
    pub fn set_public_only(&self, public_only: bool) {
        self.public_only.store(public_only, Ordering::SeqCst);
    }

    /// Every request passed to `place_order`, in order.
    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.placed.lock().unwrap().clone()
    }

    /// Every order id passed to `cancel_order`, in order.
    pub fn cancelled_orders(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    fn mode_for(&self, pair: &Pair) -> FillMode {
        if let Some(mode) = self.pair_modes.lock().unwrap().get(&pair.id()) {
            return *mode;
        }
        self.default_mode
            .lock()
            .unwrap()
            .unwrap_or(FillMode::Immediate)
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn get_balance(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        if self.public_only.load(Ordering::SeqCst) {
            return Err(ExchangeError::MissingCredentials);
        }
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(ExchangeError::Status {
                endpoint: "/mock/balance".to_string(),
                status: 503,
                body: "scripted failure".to_string(),
            });
        }
        Ok(self.balances.lock().unwrap().clone())
    }

    async fn get_order_book(&self, pair: &Pair, _depth: u32) -> Result<OrderBook, ExchangeError> {
        self.books
            .lock()
            .unwrap()
            .get(&pair.id())
            .cloned()
            .ok_or_else(|| ExchangeError::Api {
                code: "51001".to_string(),
                message: format!("instrument {} does not exist", pair),
            })
    }

    async fn get_ticker(&self, pair: &Pair) -> Result<Ticker, ExchangeError> {
        let books = self.books.lock().unwrap();
        let book = books.get(&pair.id()).ok_or_else(|| ExchangeError::Api {
            code: "51001".to_string(),
            message: format!("instrument {} does not exist", pair),
        })?;
        let (Some(best_bid), Some(best_ask)) = (book.best_bid(), book.best_ask()) else {
            return Err(ExchangeError::Parse(format!("one-sided book for {pair}")));
        };
        Ok(Ticker {
            pair: pair.clone(),
            best_bid,
            best_ask,
            ts: book.updated_at,
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String, ExchangeError> {
        self.placed.lock().unwrap().push(request.clone());

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let order_id = format!("mock-{n}");

        let (status, filled) = match self.mode_for(&request.pair) {
            FillMode::Immediate => (OrderStatus::Filled, request.size),
            FillMode::Partial(ratio) => (OrderStatus::PartiallyFilled, request.size * ratio),
            FillMode::Never => (OrderStatus::Live, Decimal::ZERO),
        };
        // Marketable limits fill at the touch when it is better than the
        // limit price.
        let fill_price = {
            let books = self.books.lock().unwrap();
            match books.get(&request.pair.id()) {
                Some(book) => match request.side {
                    crate::arbitrage::path::Action::Buy => book
                        .best_ask()
                        .map(|ask| ask.min(request.price))
                        .unwrap_or(request.price),
                    crate::arbitrage::path::Action::Sell => book
                        .best_bid()
                        .map(|bid| bid.max(request.price))
                        .unwrap_or(request.price),
                },
                None => request.price,
            }
        };
        let avg_price = (filled > Decimal::ZERO).then_some(fill_price);

        self.orders.lock().unwrap().insert(
            order_id.clone(),
            MockOrder {
                request: request.clone(),
                status,
                filled,
                avg_price,
            },
        );
        Ok(order_id)
    }

    async fn cancel_order(&self, _pair: &Pair, order_id: &str) -> Result<(), ExchangeError> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(order_id) {
            Some(order) => {
                if !order.status.is_terminal() {
                    order.status = OrderStatus::Cancelled;
                }
                Ok(())
            }
            None => Err(ExchangeError::Api {
                code: "51603".to_string(),
                message: format!("order {order_id} does not exist"),
            }),
        }
    }

    async fn get_order_status(
        &self,
        _pair: &Pair,
        order_id: &str,
    ) -> Result<OrderState, ExchangeError> {
        let orders = self.orders.lock().unwrap();
        let order = orders.get(order_id).ok_or_else(|| ExchangeError::Api {
            code: "51603".to_string(),
            message: format!("order {order_id} does not exist"),
        })?;
        Ok(OrderState {
            order_id: order_id.to_string(),
            status: Some(order.status),
            filled_size: order.filled,
            avg_price: order.avg_price,
        })
    }
}

impl std::fmt::Debug for MockExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockExchange")
            .field("orders", &self.orders.lock().unwrap().len())
            .finish()
    }
}
