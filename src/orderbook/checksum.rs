//! Order-book feed checksum verification.
//!
//! The feed checksums the top 25 levels of each side: `price:size` fields
//! joined with `:`, alternating bid/ask while both sides have levels left,
//! then the remainder of the longer side. CRC32 of that string, reinterpreted
//! as a signed 32-bit integer, must match the value carried by the message.

use crate::orderbook::types::PriceLevel;

const CHECKSUM_DEPTH: usize = 25;

/// Compute the checksum over the top levels of a book.
pub fn book_checksum(bids: &[PriceLevel], asks: &[PriceLevel]) -> i32 {
    let bids = &bids[..bids.len().min(CHECKSUM_DEPTH)];
    let asks = &asks[..asks.len().min(CHECKSUM_DEPTH)];

    let mut fields: Vec<String> = Vec::with_capacity((bids.len() + asks.len()) * 2);
    let common = bids.len().min(asks.len());

    for i in 0..common {
        fields.push(bids[i].price.to_string());
        fields.push(bids[i].size.to_string());
        fields.push(asks[i].price.to_string());
        fields.push(asks[i].size.to_string());
    }
    for level in &bids[common..] {
        fields.push(level.price.to_string());
        fields.push(level.size.to_string());
    }
    for level in &asks[common..] {
        fields.push(level.price.to_string());
        fields.push(level.size.to_string());
    }

    let joined = fields.join(":");
    crc32fast::hash(joined.as_bytes()) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: rust_decimal::Decimal, size: rust_decimal::Decimal) -> PriceLevel {
        PriceLevel::new(price, size)
    }

    #[test]
    fn checksum_matches_known_layout() {
        // Two levels each side: the checksummed string interleaves
        // bid:ask pairs.
        let bids = vec![level(dec!(8476.98), dec!(415)), level(dec!(8475.55), dec!(100))];
        let asks = vec![level(dec!(8477), dec!(7)), level(dec!(8477.34), dec!(85))];

        let expected = crc32fast::hash(
            "8476.98:415:8477:7:8475.55:100:8477.34:85".as_bytes(),
        ) as i32;
        assert_eq!(book_checksum(&bids, &asks), expected);
    }

    #[test]
    fn checksum_handles_uneven_sides() {
        let bids = vec![level(dec!(100), dec!(1)), level(dec!(99), dec!(2))];
        let asks = vec![level(dec!(101), dec!(3))];

        let expected = crc32fast::hash("100:1:101:3:99:2".as_bytes()) as i32;
        assert_eq!(book_checksum(&bids, &asks), expected);
    }

    #[test]
    fn checksum_is_order_sensitive() {
        let bids = vec![level(dec!(100), dec!(1))];
        let asks = vec![level(dec!(101), dec!(1))];
        let a = book_checksum(&bids, &asks);
        let b = book_checksum(&asks, &bids);
        assert_ne!(a, b);
    }

    #[test]
    fn checksum_truncates_to_top_25() {
        let mut bids = Vec::new();
        for i in 0..30 {
            bids.push(level(dec!(1000) - rust_decimal::Decimal::from(i), dec!(1)));
        }
        let asks = vec![level(dec!(2000), dec!(1))];

        let truncated = book_checksum(&bids[..25], &asks);
        assert_eq!(book_checksum(&bids, &asks), truncated);
    }
}
