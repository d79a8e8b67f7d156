//! Order lifecycle: status model, placement, and terminal-state polling.

pub mod execution;
pub mod order;

pub use execution::{cancel_quietly, place_order, wait_for_terminal};
pub use order::{OrderState, OrderStatus};
