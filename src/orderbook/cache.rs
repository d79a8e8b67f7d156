//! Shared depth cache: single writer (the feed task), many readers.
//!
//! Readers never see a half-applied update: the feed builds a complete
//! [`OrderBook`] value and swaps it in under the map shard lock.

use std::time::Duration;

use dashmap::DashMap;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::arbitrage::path::Pair;
use crate::orderbook::types::OrderBook;

/// Outcome of a freshness-gated fetch.
#[derive(Debug, Clone)]
pub enum Fetched {
    /// A consistent book within the freshness budget.
    Book(OrderBook),
    /// The pair is known but its newest copy is too old, crossed, or
    /// invalidated pending a snapshot.
    Stale,
    /// The pair has never been seen.
    Missing,
}

impl Fetched {
    /// Unwrap the book, if fresh.
    pub fn book(self) -> Option<OrderBook> {
        match self {
            Fetched::Book(book) => Some(book),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Entry {
    book: OrderBook,
    /// Set on crossed books, checksum failures and disconnects; cleared by
    /// the next snapshot.
    invalidated: bool,
}

/// Per-instrument depth cache.
#[derive(Debug, Default)]
pub struct BookCache {
    entries: DashMap<String, Entry>,
}

impl BookCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Store a consistent book, clearing any invalidation.
    pub fn store(&self, book: OrderBook) {
        self.entries.insert(
            book.pair.id(),
            Entry {
                book,
                invalidated: false,
            },
        );
    }

    /// Mark one pair invalid until its next snapshot.
    pub fn invalidate(&self, pair_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(pair_id) {
            entry.invalidated = true;
        }
    }

    /// Mark every cached book invalid. Used on feed disconnect.
    pub fn invalidate_all(&self) {
        for mut entry in self.entries.iter_mut() {
            entry.invalidated = true;
        }
    }

    /// Freshness-gated fetch against an explicit clock. The evaluation path
    /// goes through this; a stale result is never refreshed inline.
    pub fn fetch_at(&self, pair: &Pair, budget: Duration, now: OffsetDateTime) -> Fetched {
        match self.entries.get(&pair.id()) {
            None => Fetched::Missing,
            Some(entry) => {
                if entry.invalidated || entry.book.is_crossed() {
                    return Fetched::Stale;
                }
                let age = entry.book.age(now);
                if age < time::Duration::ZERO || age <= budget {
                    Fetched::Book(entry.book.clone())
                } else {
                    Fetched::Stale
                }
            }
        }
    }

    /// Freshness-gated fetch against the wall clock.
    pub fn fetch(&self, pair: &Pair, budget: Duration) -> Fetched {
        self.fetch_at(pair, budget, OffsetDateTime::now_utc())
    }

    /// Newest copy regardless of age or invalidation. Display paths only.
    pub fn fetch_or_stale(&self, pair: &Pair) -> Option<OrderBook> {
        self.entries.get(&pair.id()).map(|e| e.book.clone())
    }

    /// Mid price of a pair from the newest cached copy.
    pub fn mid_price(&self, pair: &Pair) -> Option<Decimal> {
        self.entries.get(&pair.id()).and_then(|e| e.book.mid_price())
    }

    /// Best-effort conversion rate from `asset` into `quote`, using the
    /// direct pair in either orientation. `None` when no book exists;
    /// callers on the risk path treat that as a zero contribution.
    pub fn conversion_rate(&self, asset: &str, quote: &str) -> Option<Decimal> {
        if asset.eq_ignore_ascii_case(quote) {
            return Some(Decimal::ONE);
        }
        if let Some(mid) = self.mid_price(&Pair::new(asset, quote)) {
            return Some(mid);
        }
        let inverse = self.mid_price(&Pair::new(quote, asset))?;
        if inverse.is_zero() {
            None
        } else {
            Some(Decimal::ONE / inverse)
        }
    }

    /// Number of cached instruments.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds nothing yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
