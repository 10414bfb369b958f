//! Kraken book checksum.
//!
//! Every diff frame carries `c`, a CRC32/IEEE over a canonical encoding of
//! the top ten asks then top ten bids: for each level, the price then the
//! quantity as wire-precision fixed-point strings with the decimal point
//! removed and leading zeros stripped. A mismatch means the maintained
//! window diverged from the venue's and the book must be re-snapshotted.
//!
//! Levels must keep the scale they were parsed with off the wire; `Decimal`
//! preserves it, so formatting here reproduces the venue's digit strings.

use crate::error::GatewayError;
use crate::types::BookLevel;

const CHECKSUM_DEPTH: usize = 10;

fn digits(value: &rust_decimal::Decimal) -> String {
    let rendered = value.to_string();
    let no_point = rendered.replacen('.', "", 1);
    no_point.trim_start_matches('0').to_string()
}

/// The canonical digit string the CRC is computed over.
pub(crate) fn checksum_input(bids: &[BookLevel], asks: &[BookLevel]) -> String {
    let mut input = String::new();
    for level in asks.iter().take(CHECKSUM_DEPTH) {
        input.push_str(&digits(&level.price));
        input.push_str(&digits(&level.quantity));
    }
    for level in bids.iter().take(CHECKSUM_DEPTH) {
        input.push_str(&digits(&level.price));
        input.push_str(&digits(&level.quantity));
    }
    input
}

pub fn book_checksum(bids: &[BookLevel], asks: &[BookLevel]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(checksum_input(bids, asks).as_bytes());
    hasher.finalize()
}

/// Compares the computed CRC against the frame's `c` field.
pub fn verify(bids: &[BookLevel], asks: &[BookLevel], expected: &str) -> Result<(), GatewayError> {
    let computed = book_checksum(bids, asks);
    if computed.to_string() != expected {
        return Err(GatewayError::ChecksumMismatch {
            computed,
            expected: expected.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn level(price: &str, qty: &str) -> BookLevel {
        BookLevel::new(price.parse().unwrap(), qty.parse().unwrap())
    }

    #[test]
    fn digit_encoding_strips_point_and_leading_zeros() {
        assert_eq!(digits(&"0.05005".parse::<Decimal>().unwrap()), "5005");
        assert_eq!(digits(&"0.00500000".parse::<Decimal>().unwrap()), "500000");
        assert_eq!(digits(&"34123.1".parse::<Decimal>().unwrap()), "341231");
        assert_eq!(digits(&"0.01000000".parse::<Decimal>().unwrap()), "1000000");
    }

    #[test]
    fn input_concatenates_asks_then_bids() {
        let asks = vec![level("0.05005", "0.00500000"), level("0.05010", "0.01000000")];
        let bids = vec![level("0.05000", "0.00200000"), level("0.04995", "0.00100000")];
        assert_eq!(
            checksum_input(&bids, &asks),
            "5005500000501010000005000200000\
             4995100000"
        );
    }

    #[test]
    fn crc_matches_standard_ieee_check_value() {
        // CRC32/IEEE("123456789") is the standard check constant.
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(b"123456789");
        assert_eq!(hasher.finalize(), 0xCBF4_3926);
    }

    #[test]
    fn verify_accepts_matching_and_rejects_single_bit_changes() {
        let asks = vec![level("0.05005", "0.00500000"), level("0.05010", "0.01000000")];
        let bids = vec![level("0.05000", "0.00200000"), level("0.04995", "0.00100000")];
        let crc = book_checksum(&bids, &asks);
        assert!(verify(&bids, &asks, &crc.to_string()).is_ok());

        // change one digit of one quantity
        let mut altered = asks.clone();
        altered[0].quantity = "0.00500001".parse().unwrap();
        let altered_crc = book_checksum(&bids, &altered);
        assert_ne!(crc, altered_crc);
        assert!(matches!(
            verify(&bids, &altered, &crc.to_string()),
            Err(GatewayError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn only_top_ten_levels_participate() {
        let mut asks: Vec<BookLevel> =
            (0..12).map(|i| level(&format!("1.{:02}", i + 1), "1.0")).collect();
        let bids: Vec<BookLevel> = Vec::new();
        let crc = book_checksum(&bids, &asks);
        // mutate level 11 (index 10): outside the checksum window
        asks[10].quantity = "9.0".parse().unwrap();
        assert_eq!(book_checksum(&bids, &asks), crc);
        // mutate level 10 (index 9): inside the window
        asks[9].quantity = "9.0".parse().unwrap();
        assert_ne!(book_checksum(&bids, &asks), crc);
    }
}
