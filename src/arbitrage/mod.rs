//! Arbitrage core: path model, pure evaluation, and leg-chain execution.

pub mod evaluator;
pub mod executor;
pub mod path;

pub use evaluator::{evaluate, Opportunity};
pub use executor::{ArbitrageExecutor, ExecutionResult, LegResult, LegStatus};
pub use path::{Action, Pair, Path, PathStep};
