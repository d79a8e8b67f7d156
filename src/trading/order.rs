//! Order status model shared by the gateway and the executor.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Order lifecycle states reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    /// Resting on the book, nothing filled yet.
    Live,
    /// Some quantity filled, order still working.
    #[strum(serialize = "partially_filled", serialize = "partial")]
    PartiallyFilled,
    /// Fully filled.
    Filled,
    /// Cancelled (by us or the exchange).
    #[strum(serialize = "canceled", serialize = "cancelled")]
    Cancelled,
    /// Rejected or failed on the exchange side.
    Failed,
}

impl OrderStatus {
    /// Whether the state can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// Whether the order completed fully.
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Filled)
    }
}

/// Point-in-time view of one order.
#[derive(Debug, Clone)]
pub struct OrderState {
    /// Exchange order id.
    pub order_id: String,
    /// Last reported status, if the exchange returned one we recognize.
    pub status: Option<OrderStatus>,
    /// Accumulated filled size, base-asset units.
    pub filled_size: Decimal,
    /// Average fill price; meaningful only when `filled_size > 0`.
    pub avg_price: Option<Decimal>,
}

impl OrderState {
    /// Empty state for an order we know nothing about yet.
    pub fn unknown(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            status: None,
            filled_size: Decimal::ZERO,
            avg_price: None,
        }
    }

    /// Whether polling can stop.
    pub fn is_terminal(&self) -> bool {
        self.status.map(|s| s.is_terminal()).unwrap_or(false)
    }
}
