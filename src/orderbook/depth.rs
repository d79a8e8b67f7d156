//! Depth-walk calculations over one side of a book.
//!
//! A `buy` on `BASE-QUOTE` walks the asks spending quote; a `sell` walks the
//! bids spending base. Fees are applied to the output of each walk.

use rust_decimal::Decimal;

use crate::arbitrage::path::Action;
use crate::orderbook::types::{OrderBook, PriceLevel};

/// Output produced by spending `input` of the leg's input asset against
/// `book`, after fees. `None` when the book side is exhausted before the
/// input is fully spent.
pub fn leg_output(book: &OrderBook, action: Action, input: Decimal, fee: Decimal) -> Option<Decimal> {
    if input <= Decimal::ZERO {
        return None;
    }
    match action {
        Action::Buy => spend_quote_on_asks(&book.asks, input, fee),
        Action::Sell => spend_base_on_bids(&book.bids, input, fee),
    }
}

/// Walk the asks spending `quote_in`; returns base received after fee.
fn spend_quote_on_asks(asks: &[PriceLevel], quote_in: Decimal, fee: Decimal) -> Option<Decimal> {
    let mut remaining = quote_in;
    let mut base_out = Decimal::ZERO;

    for level in asks {
        if remaining.is_zero() {
            break;
        }
        if level.price <= Decimal::ZERO {
            return None;
        }
        let level_quote = level.price * level.size;
        let take_quote = remaining.min(level_quote);
        base_out += take_quote / level.price;
        remaining -= take_quote;
    }

    if remaining.is_zero() {
        Some(base_out * (Decimal::ONE - fee))
    } else {
        None
    }
}

/// Walk the bids spending `base_in`; returns quote received after fee.
fn spend_base_on_bids(bids: &[PriceLevel], base_in: Decimal, fee: Decimal) -> Option<Decimal> {
    let mut remaining = base_in;
    let mut quote_out = Decimal::ZERO;

    for level in bids {
        if remaining.is_zero() {
            break;
        }
        let take_base = remaining.min(level.size);
        quote_out += take_base * level.price;
        remaining -= take_base;
    }

    if remaining.is_zero() {
        Some(quote_out * (Decimal::ONE - fee))
    } else {
        None
    }
}

/// Total input the book side can absorb, in input-asset units.
pub fn input_capacity(book: &OrderBook, action: Action) -> Decimal {
    match action {
        Action::Buy => book.asks.iter().map(|l| l.price * l.size).sum(),
        Action::Sell => book.bids.iter().map(|l| l.size).sum(),
    }
}

/// Largest input whose post-fee output stays within `output_cap`, bounded by
/// the side's own capacity. Used to back-propagate depth limits through a
/// path: the cap for leg `k` is the maximum input of leg `k+1`.
pub fn max_input_for(
    book: &OrderBook,
    action: Action,
    fee: Decimal,
    output_cap: Option<Decimal>,
) -> Decimal {
    let capacity = input_capacity(book, action);
    let Some(cap) = output_cap else {
        return capacity;
    };
    if cap <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let keep = Decimal::ONE - fee;
    if keep <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    // Output wanted before the fee is taken.
    let mut wanted = cap / keep;
    let mut input = Decimal::ZERO;

    match action {
        Action::Buy => {
            for level in &book.asks {
                if wanted.is_zero() {
                    break;
                }
                if level.price <= Decimal::ZERO {
                    break;
                }
                let take_base = wanted.min(level.size);
                input += take_base * level.price;
                wanted -= take_base;
            }
        }
        Action::Sell => {
            for level in &book.bids {
                if wanted.is_zero() {
                    break;
                }
                if level.price <= Decimal::ZERO {
                    break;
                }
                let level_quote = level.price * level.size;
                let take_quote = wanted.min(level_quote);
                input += take_quote / level.price;
                wanted -= take_quote;
            }
        }
    }

    input.min(capacity)
}
