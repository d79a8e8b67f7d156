//! Order book types and data structures.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::arbitrage::path::Pair;

/// Single price level in an order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceLevel {
    /// Price at this level.
    pub price: Decimal,
    /// Total size available at this price, in base-asset units.
    pub size: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// L2 depth for one instrument.
#[derive(Debug, Clone)]
pub struct OrderBook {
    /// Instrument this book belongs to.
    pub pair: Pair,
    /// Bid levels sorted by price descending.
    pub bids: Vec<PriceLevel>,
    /// Ask levels sorted by price ascending.
    pub asks: Vec<PriceLevel>,
    /// Origin timestamp of the newest update folded into this book.
    pub updated_at: OffsetDateTime,
}

impl OrderBook {
    /// Build a book from already-sorted levels.
    pub fn new(
        pair: Pair,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        updated_at: OffsetDateTime,
    ) -> Self {
        Self {
            pair,
            bids,
            asks,
            updated_at,
        }
    }

    /// Best bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Best ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Spread between best ask and best bid.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Midpoint of best bid and ask.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Spread as a fraction of the mid price.
    pub fn relative_spread(&self) -> Option<Decimal> {
        match (self.spread(), self.mid_price()) {
            (Some(spread), Some(mid)) if !mid.is_zero() => Some(spread / mid),
            _ => None,
        }
    }

    /// Whether the best bid has crossed the best ask. A crossed book is
    /// invalid until the next snapshot.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// Age of this book relative to `now`.
    pub fn age(&self, now: OffsetDateTime) -> time::Duration {
        now - self.updated_at
    }

    /// Verify the level ordering invariants: bids non-increasing, asks
    /// non-decreasing, all sizes positive.
    pub fn is_well_formed(&self) -> bool {
        let bids_ok = self.bids.windows(2).all(|w| w[0].price >= w[1].price);
        let asks_ok = self.asks.windows(2).all(|w| w[0].price <= w[1].price);
        let sizes_ok = self
            .bids
            .iter()
            .chain(self.asks.iter())
            .all(|l| l.size > Decimal::ZERO);
        bids_ok && asks_ok && sizes_ok
    }
}
