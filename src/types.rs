//! Canonical data model shared by every venue.
//!
//! Prices and quantities are fixed-point `Decimal`s; floats appear only in
//! statistics fed to the prediction model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{GatewayError, Result};

/// Top-of-book quote at a point in time. `bid <= ask` on every venue feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spread {
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Spread {
    pub fn midpoint(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// A currency or token symbol as the venue reports it (e.g. "BTC").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset(pub String);

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque canonical instrument identifier. Venue symbol strings are derived
/// through an [`AssetPairTranslator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetPair(pub u32);

/// Canonical pair -> venue symbol mapping. Each venue carries one; Kraken's
/// WebSocket dialect additionally uses an ISO-4217 ("XBT/USD") translator.
#[derive(Debug, Clone, Default)]
pub struct AssetPairTranslator {
    map: HashMap<AssetPair, String>,
}

impl AssetPairTranslator {
    pub fn new(map: HashMap<AssetPair, String>) -> Self {
        Self { map }
    }

    pub fn insert(&mut self, pair: AssetPair, symbol: String) {
        self.map.insert(pair, symbol);
    }

    pub fn get(&self, pair: AssetPair) -> Option<&str> {
        self.map.get(&pair).map(String::as_str)
    }

    /// Like [`get`](Self::get) but unsupported pairs are a configuration
    /// error: the caller asked this venue for an instrument it never listed.
    pub fn symbol(&self, pair: AssetPair) -> Result<&str> {
        self.get(pair)
            .ok_or_else(|| GatewayError::Config(format!("asset pair {:?} not configured", pair)))
    }

    pub fn pairs(&self) -> Vec<AssetPair> {
        self.map.keys().copied().collect()
    }

    /// Venue symbol -> canonical pair, for demultiplexing inbound streams.
    pub fn reversed(&self) -> HashMap<String, AssetPair> {
        self.map.iter().map(|(k, v)| (v.clone(), *k)).collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl FromIterator<(AssetPair, String)> for AssetPairTranslator {
    fn from_iter<T: IntoIterator<Item = (AssetPair, String)>>(iter: T) -> Self {
        Self { map: iter.into_iter().collect() }
    }
}

/// A limit order as callers describe it. Two orders with identical fields
/// are the same key in result maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Order {
    pub side: OrderSide,
    pub pair: AssetPair,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Venue-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusKind {
    Pending,
    Unfilled,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
}

impl StatusKind {
    /// Terminal statuses evict the order from the registry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusKind::Filled | StatusKind::Canceled | StatusKind::Expired)
    }
}

/// Venue-reported state of a submitted order. Carries a copy of the
/// original order; the registry remains the owner of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub kind: StatusKind,
    pub filled_price: Option<Decimal>,
    pub filled_quantity: Option<Decimal>,
    pub order: Order,
}

/// One price level of an order book side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    /// Sequence that last touched this level; zero on venues without
    /// per-entry sequencing.
    pub update_id: u64,
}

impl BookLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity, update_id: 0 }
    }

    pub fn sequenced(price: Decimal, quantity: Decimal, update_id: u64) -> Self {
        Self { price, quantity, update_id }
    }
}

/// Depth-limited order book. Bids sorted by price descending, asks
/// ascending, prices unique within a side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub last_update_id: u64,
}

impl OrderBook {
    pub fn new(bids: Vec<BookLevel>, asks: Vec<BookLevel>, last_update_id: u64) -> Self {
        Self { bids, asks, last_update_id }
    }

    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    /// True when `best_bid >= best_ask`, which a published snapshot must
    /// never exhibit.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }
}

/// Feature vector consumed by the external prediction model. All fields are
/// statistics, never ledger quantities, so they stay `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub price_delta: f32,
    pub liquidity1: f32,
    pub liquidity2: f32,
    pub latency1: f32,
    pub latency2: f32,
    pub volatility1: f32,
    pub volatility2: f32,
    pub label: Option<i32>,
}
