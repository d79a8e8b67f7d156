//! Triangular arbitrage engine for a single spot exchange.
//!
//! The engine watches order books over a small configured set of pairs,
//! evaluates statically-configured cyclic paths (start asset, intermediate
//! assets, back to the start asset) for realizable round-trip profit, and,
//! gated by a stateful risk policy, executes accepted cycles as a sequenced
//! chain of marketable limit orders.
//!
//! # Modules
//!
//! - [`config`]: immutable configuration loaded from environment
//! - [`error`]: unified error types
//! - [`exchange`]: gateway contract, REST client, and test mock
//! - [`orderbook`]: depth types, freshness-gated cache, WebSocket feed
//! - [`arbitrage`]: path model, pure evaluator, leg-chain executor
//! - [`risk`]: accept/reject/size policy with daily counters
//! - [`portfolio`]: balance cache and sync
//! - [`controller`]: scan/act loop and lifecycle
//! - [`history`]: append-only trade record
//! - [`api`]: HTTP health/status surface
//! - [`metrics`]: counters and latency histograms

pub mod api;
pub mod arbitrage;
pub mod config;
pub mod controller;
pub mod error;
pub mod exchange;
pub mod history;
pub mod metrics;
pub mod orderbook;
pub mod portfolio;
pub mod risk;
pub mod trading;

pub use config::Config;
pub use error::{BotError, Result};
