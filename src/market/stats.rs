//! Market statistics for the prediction model's feature vector.
//!
//! Floats throughout: these are inputs to a statistical model, not ledger
//! quantities.

use rust_decimal::prelude::ToPrimitive;

use crate::types::{BookLevel, OrderBook, Spread};

/// Sample standard deviation of midpoint prices. `None` below two samples.
pub fn price_volatility(spreads: &[Spread]) -> Option<f64> {
    if spreads.len() < 2 {
        return None;
    }
    let midpoints: Vec<f64> =
        spreads.iter().filter_map(|s| s.midpoint().to_f64()).collect();
    if midpoints.len() < 2 {
        return None;
    }
    let mean = midpoints.iter().sum::<f64>() / midpoints.len() as f64;
    let variance = midpoints.iter().map(|m| (m - mean).powi(2)).sum::<f64>()
        / (midpoints.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Round-trip slippage for filling `quantity` at both sides of the book,
/// relative to the midpoint cost. `None` on an empty side.
pub fn slippage(book: &OrderBook, quantity: f64) -> Option<f64> {
    let best_bid = book.best_bid()?.price.to_f64()?;
    let best_ask = book.best_ask()?.price.to_f64()?;
    let midpoint = (best_bid + best_ask) / 2.0;
    let ideal_cost = quantity * midpoint;
    if ideal_cost == 0.0 {
        return None;
    }

    let buy_cost = fill_cost(&book.asks, quantity);
    let sell_cost = fill_cost(&book.bids, quantity);

    Some((buy_cost - sell_cost) / (2.0 * ideal_cost))
}

fn fill_cost(side: &[BookLevel], mut remaining: f64) -> f64 {
    let mut cost = 0.0;
    for level in side {
        let price = level.price.to_f64().unwrap_or(0.0);
        let available = level.quantity.to_f64().unwrap_or(0.0);
        if remaining < available {
            cost += remaining * price;
            break;
        }
        cost += available * price;
        remaining -= available;
    }
    cost
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn spread(bid: &str, ask: &str) -> Spread {
        Spread { bid: d(bid), ask: d(ask), timestamp: Utc::now() }
    }

    #[test]
    fn volatility_of_constant_midpoints_is_zero() {
        let spreads = vec![spread("9", "11"), spread("9.5", "10.5"), spread("10", "10")];
        assert!(price_volatility(&spreads).unwrap() < 1e-12);
    }

    #[test]
    fn volatility_needs_two_samples() {
        assert!(price_volatility(&[]).is_none());
        assert!(price_volatility(&[spread("9", "11")]).is_none());
    }

    #[test]
    fn slippage_grows_with_order_size() {
        let book = OrderBook::new(
            vec![
                BookLevel::new(d("99"), d("1")),
                BookLevel::new(d("95"), d("10")),
            ],
            vec![
                BookLevel::new(d("101"), d("1")),
                BookLevel::new(d("105"), d("10")),
            ],
            1,
        );
        let small = slippage(&book, 0.5).unwrap();
        let large = slippage(&book, 5.0).unwrap();
        assert!(large > small);
    }
}
