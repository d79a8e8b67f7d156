//! Order book subsystem: depth state, freshness-gated cache, and the
//! WebSocket feed that fuses snapshots with deltas.

pub mod cache;
pub mod checksum;
pub mod depth;
pub mod feed;
pub mod types;

pub use cache::{BookCache, Fetched};
pub use depth::{input_capacity, leg_output, max_input_for};
pub use feed::{BookFeed, ReconnectConfig};
pub use types::{OrderBook, PriceLevel};
