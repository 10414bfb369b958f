//! The venue-uniform exchange facade.
//!
//! Every venue implements [`Exchange`]; callers never see a venue's wire
//! dialect. Market-data queries read the recorders' shared state; order
//! operations go straight to signed REST. Requests over multiple pairs or
//! orders fan out concurrently and join before returning.

pub mod backoff;
pub mod binance;
pub mod kraken;
pub mod kucoin;
pub mod polled;
pub mod ws;

use async_trait::async_trait;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{secret_key_from_env, Credentials, Settings};
use crate::error::{GatewayError, Result};
use crate::market::sample_spreads;
use crate::types::{Asset, AssetPair, Order, OrderBook, OrderId, OrderStatus, Spread};

/// Per-item outcome of a fanned-out batch call.
///
/// One failing sibling must never discard the rest: a submitted order or a
/// registry eviction is already committed by the time a later item errors,
/// so successes land in `results` and each failure keeps its item key and
/// error. Callers that need all-or-nothing check
/// [`is_complete`](BatchOutcome::is_complete).
#[derive(Debug)]
pub struct BatchOutcome<K, V> {
    pub results: HashMap<K, V>,
    pub failures: Vec<(K, GatewayError)>,
}

impl<K: Eq + Hash, V> BatchOutcome<K, V> {
    pub fn new() -> Self {
        Self { results: HashMap::new(), failures: Vec::new() }
    }

    pub fn push(&mut self, key: K, result: Result<V>) {
        match result {
            Ok(value) => {
                self.results.insert(key, value);
            }
            Err(err) => self.failures.push((key, err)),
        }
    }

    /// True when every item in the batch succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

impl<K: Eq + Hash, V> Default for BatchOutcome<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, Result<V>)> for BatchOutcome<K, V> {
    fn from_iter<T: IntoIterator<Item = (K, Result<V>)>>(iter: T) -> Self {
        let mut outcome = Self::new();
        for (key, result) in iter {
            outcome.push(key, result);
        }
        outcome
    }
}

/// Uniform venue contract. One implementation per exchange; the arbitrage
/// loop iterates pairs of these.
///
/// Batch operations report per-item outcomes: the outer `Result` is only
/// for failures that predate any per-item work (a dead recorder, a failed
/// batched transport call), never for one item's error.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &'static str;

    /// Taker fee fraction from configuration.
    fn fee(&self) -> Decimal;

    /// Regularly spaced spread samples per pair, covering `window` backward
    /// from now. Pairs without recorded history come back empty (and are
    /// registered for next time).
    async fn get_historical_spreads(
        &self,
        pairs: &[AssetPair],
        window: Duration,
        samples: usize,
    ) -> Result<BatchOutcome<AssetPair, Vec<Spread>>>;

    /// Most recent spread; falls back to a REST ticker call when the
    /// recorder has nothing yet.
    async fn get_current_spread(&self, pair: AssetPair) -> Result<Spread>;

    async fn get_order_books(
        &self,
        pairs: &[AssetPair],
    ) -> Result<BatchOutcome<AssetPair, OrderBook>>;

    /// Conservative RTT estimate (RFC 2988 style), refreshed by one ping.
    async fn get_latency(&self) -> Result<Duration>;

    async fn execute_orders(
        &self,
        orders: &[Order],
    ) -> Result<BatchOutcome<Order, OrderId>>;

    async fn get_order_statuses(
        &self,
        ids: &[OrderId],
    ) -> Result<BatchOutcome<OrderId, OrderStatus>>;

    /// Best-effort cancellation. Unknown ids fail per-item with
    /// `MissingOrder`.
    async fn cancel_orders(&self, ids: &[OrderId]) -> Result<BatchOutcome<OrderId, ()>>;

    /// Free + locked balance per asset.
    async fn get_balances(&self) -> Result<HashMap<Asset, Decimal>>;
}

/// Capability of a live spread feed (WebSocket-driven or REST-polled).
#[async_trait]
pub trait SpreadRecorder: Send + Sync {
    /// `None` means the pair is not recorded at all; an empty vector means
    /// recorded but no data yet.
    fn historical_spreads(&self, pair: AssetPair) -> Option<Vec<Spread>>;

    fn current_spread(&self, pair: AssetPair) -> Option<Spread>;

    async fn register_asset_pair(&self, pair: AssetPair) -> Result<()>;
}

/// Capability of a live depth feed.
#[async_trait]
pub trait OrderBookRecorder: Send + Sync {
    fn order_book(&self, pair: AssetPair) -> Option<OrderBook>;

    async fn register_asset_pair(&self, pair: AssetPair) -> Result<()>;
}

/// Shared facade path for [`Exchange::get_historical_spreads`]: fan out per
/// pair, sample what the recorder has, register what it doesn't. A pair
/// whose registration fails shows up in `failures`; its siblings' samples
/// are kept.
pub(crate) async fn gather_historical_spreads<R>(
    recorder: &R,
    pairs: &[AssetPair],
    window: Duration,
    samples: usize,
) -> BatchOutcome<AssetPair, Vec<Spread>>
where
    R: SpreadRecorder + ?Sized,
{
    if samples == 0 || window.is_zero() {
        return pairs.iter().map(|&pair| (pair, Ok(Vec::new()))).collect();
    }

    let lookups = pairs.iter().map(|&pair| async move {
        let result = match recorder.historical_spreads(pair) {
            Some(history) if !history.is_empty() => {
                Ok(sample_spreads(&history, window, samples))
            }
            Some(_) => Ok(Vec::new()),
            None => recorder.register_asset_pair(pair).await.map(|()| Vec::new()),
        };
        (pair, result)
    });

    join_all(lookups).await.into_iter().collect()
}

/// Shared facade path for [`Exchange::get_order_books`]. Same partial
/// semantics: every joined reply survives a sibling's failure.
pub(crate) async fn gather_order_books<R>(
    recorder: &R,
    pairs: &[AssetPair],
) -> BatchOutcome<AssetPair, OrderBook>
where
    R: OrderBookRecorder + ?Sized,
{
    let lookups = pairs.iter().map(|&pair| async move {
        let result = match recorder.order_book(pair) {
            Some(book) => Ok(book),
            None => recorder
                .register_asset_pair(pair)
                .await
                .map(|()| recorder.order_book(pair).unwrap_or_default()),
        };
        (pair, result)
    });

    join_all(lookups).await.into_iter().collect()
}

/// The activated venue set, dispatched as a tagged variant so callers can
/// hold a homogeneous collection without boxing.
pub enum Venue {
    BinanceUs(binance::BinanceUs),
    Kraken(kraken::Kraken),
    KuCoin(kucoin::KuCoin),
}

macro_rules! delegate {
    ($self:ident, $venue:ident => $body:expr) => {
        match $self {
            Venue::BinanceUs($venue) => $body,
            Venue::Kraken($venue) => $body,
            Venue::KuCoin($venue) => $body,
        }
    };
}

#[async_trait]
impl Exchange for Venue {
    fn name(&self) -> &'static str {
        delegate!(self, venue => venue.name())
    }

    fn fee(&self) -> Decimal {
        delegate!(self, venue => venue.fee())
    }

    async fn get_historical_spreads(
        &self,
        pairs: &[AssetPair],
        window: Duration,
        samples: usize,
    ) -> Result<BatchOutcome<AssetPair, Vec<Spread>>> {
        delegate!(self, venue => venue.get_historical_spreads(pairs, window, samples).await)
    }

    async fn get_current_spread(&self, pair: AssetPair) -> Result<Spread> {
        delegate!(self, venue => venue.get_current_spread(pair).await)
    }

    async fn get_order_books(
        &self,
        pairs: &[AssetPair],
    ) -> Result<BatchOutcome<AssetPair, OrderBook>> {
        delegate!(self, venue => venue.get_order_books(pairs).await)
    }

    async fn get_latency(&self) -> Result<Duration> {
        delegate!(self, venue => venue.get_latency().await)
    }

    async fn execute_orders(
        &self,
        orders: &[Order],
    ) -> Result<BatchOutcome<Order, OrderId>> {
        delegate!(self, venue => venue.execute_orders(orders).await)
    }

    async fn get_order_statuses(
        &self,
        ids: &[OrderId],
    ) -> Result<BatchOutcome<OrderId, OrderStatus>> {
        delegate!(self, venue => venue.get_order_statuses(ids).await)
    }

    async fn cancel_orders(&self, ids: &[OrderId]) -> Result<BatchOutcome<OrderId, ()>> {
        delegate!(self, venue => venue.cancel_orders(ids).await)
    }

    async fn get_balances(&self) -> Result<HashMap<Asset, Decimal>> {
        delegate!(self, venue => venue.get_balances().await)
    }
}

/// Constructs every venue named in `exchanges.csv`, pulling its secret from
/// the environment. Unknown venue names and missing secrets are startup
/// configuration errors.
pub async fn build_venues(
    settings: &Settings,
    shutdown: &CancellationToken,
) -> Result<Vec<Venue>> {
    let mut venues = Vec::with_capacity(settings.venues.len());
    for entry in &settings.venues {
        let secret_key = secret_key_from_env(&entry.name)?;
        let venue = match entry.name.as_str() {
            binance::VENUE_NAME => {
                let credentials =
                    Credentials::new(entry.api_key.clone(), secret_key, None);
                Venue::BinanceUs(
                    binance::BinanceUs::connect(
                        credentials,
                        settings.translator(binance::VENUE_NAME)?,
                        entry.fee,
                        shutdown.child_token(),
                    )
                    .await?,
                )
            }
            kraken::VENUE_NAME => {
                let credentials =
                    Credentials::new(entry.api_key.clone(), secret_key, None);
                Venue::Kraken(
                    kraken::Kraken::connect(
                        credentials,
                        settings.translator(kraken::VENUE_NAME)?,
                        settings.iso4217_translator()?,
                        entry.fee,
                        shutdown.child_token(),
                    )
                    .await?,
                )
            }
            kucoin::VENUE_NAME => {
                let passphrase = std::env::var("KUCOIN_API_PASSPHRASE").map_err(|_| {
                    GatewayError::Config("KUCOIN_API_PASSPHRASE not set".to_string())
                })?;
                let credentials =
                    Credentials::new(entry.api_key.clone(), secret_key, Some(passphrase));
                Venue::KuCoin(
                    kucoin::KuCoin::connect(
                        credentials,
                        settings.translator(kucoin::VENUE_NAME)?,
                        entry.fee,
                        shutdown.child_token(),
                    )
                    .await?,
                )
            }
            other => {
                return Err(GatewayError::Config(format!("unknown exchange {:?}", other)))
            }
        };
        venues.push(venue);
    }
    Ok(venues)
}
