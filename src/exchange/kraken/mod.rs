//! Kraken venue.
//!
//! Spread and book feeds share one WebSocket recorder (the venue pushes
//! initial books and checksums every diff). Order status and cancel are
//! batched: the venue accepts comma-joined txid lists, so one signed call
//! covers any number of ids.

pub mod checksum;
pub mod client;
pub mod recorder;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::Credentials;
use crate::error::{GatewayError, Result};
use crate::exchange::backoff::{with_retries, DEFAULT_REST_RETRIES};
use crate::exchange::{
    gather_historical_spreads, gather_order_books, BatchOutcome, Exchange, SpreadRecorder,
};
use crate::latency::EwmaEstimator;
use crate::market::OrderRegistry;
use crate::types::{
    Asset, AssetPair, AssetPairTranslator, Order, OrderBook, OrderId, OrderSide, OrderStatus,
    Spread, StatusKind,
};

use client::{KrakenRestClient, QueriedOrder};
use recorder::KrakenRecorder;

pub const VENUE_NAME: &str = "Kraken";

pub const DEFAULT_DEPTH: usize = 1000;
pub const DEFAULT_SPREAD_CAPACITY: usize = 200;

fn side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

fn translate_status(queried: &QueriedOrder, order: Order) -> Result<OrderStatus> {
    let (kind, filled_price, filled_quantity) = match queried.status.as_str() {
        "pending" => (StatusKind::Pending, None, None),
        "open" => (StatusKind::Unfilled, None, None),
        "closed" => (StatusKind::Filled, queried.price, queried.vol_exec),
        "canceled" => (StatusKind::Canceled, None, None),
        "expired" => (StatusKind::Expired, None, None),
        other => {
            return Err(GatewayError::Protocol(format!("unknown order status {:?}", other)))
        }
    };
    Ok(OrderStatus { kind, filled_price, filled_quantity, order })
}

pub struct Kraken {
    translator: AssetPairTranslator,
    fee: Decimal,
    rest: KrakenRestClient,
    recorder: KrakenRecorder,
    latency: EwmaEstimator,
    registry: OrderRegistry,
}

impl Kraken {
    pub async fn connect(
        credentials: Credentials,
        translator: AssetPairTranslator,
        iso4217_translator: AssetPairTranslator,
        fee: Decimal,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let rest = KrakenRestClient::new(credentials)?;
        let pairs = translator.pairs();
        let recorder = KrakenRecorder::connect(
            rest.clone(),
            translator.clone(),
            iso4217_translator,
            &pairs,
            DEFAULT_DEPTH,
            DEFAULT_SPREAD_CAPACITY,
            shutdown,
        )
        .await?;

        Ok(Self {
            translator,
            fee,
            rest,
            recorder,
            latency: EwmaEstimator::default(),
            registry: OrderRegistry::new(),
        })
    }
}

#[async_trait]
impl Exchange for Kraken {
    fn name(&self) -> &'static str {
        VENUE_NAME
    }

    fn fee(&self) -> Decimal {
        self.fee
    }

    async fn get_historical_spreads(
        &self,
        pairs: &[AssetPair],
        window: Duration,
        samples: usize,
    ) -> Result<BatchOutcome<AssetPair, Vec<Spread>>> {
        Ok(gather_historical_spreads(&self.recorder, pairs, window, samples).await)
    }

    async fn get_current_spread(&self, pair: AssetPair) -> Result<Spread> {
        if let Some(spread) = self.recorder.current_spread(pair) {
            return Ok(spread);
        }
        let symbol = self.translator.symbol(pair)?;
        let ticker =
            with_retries("ticker", DEFAULT_REST_RETRIES, || self.rest.get_ticker(symbol))
                .await?;
        let bid = ticker
            .b
            .first()
            .ok_or_else(|| GatewayError::Protocol("ticker missing bid".to_string()))?
            .parse()
            .map_err(|e| GatewayError::Protocol(format!("bad bid: {}", e)))?;
        let ask = ticker
            .a
            .first()
            .ok_or_else(|| GatewayError::Protocol("ticker missing ask".to_string()))?
            .parse()
            .map_err(|e| GatewayError::Protocol(format!("bad ask: {}", e)))?;
        Ok(Spread { bid, ask, timestamp: Utc::now() })
    }

    async fn get_order_books(
        &self,
        pairs: &[AssetPair],
    ) -> Result<BatchOutcome<AssetPair, OrderBook>> {
        if let Some(fault) = self.recorder.fault() {
            return Err(GatewayError::Protocol(fault));
        }
        Ok(gather_order_books(&self.recorder, pairs).await)
    }

    async fn get_latency(&self) -> Result<Duration> {
        let started = Instant::now();
        self.rest.ping().await?;
        self.latency.sample(started.elapsed().as_secs_f64() * 1000.0);
        Ok(self.latency.read())
    }

    async fn execute_orders(
        &self,
        orders: &[Order],
    ) -> Result<BatchOutcome<Order, OrderId>> {
        // A submission is a committed venue-side effect the moment it lands,
        // so one sibling's failure must not discard an already-placed id.
        let submissions = orders.iter().map(|order| async {
            let result = async {
                let symbol = self.translator.symbol(order.pair)?;
                let ack = self
                    .rest
                    .add_order(symbol, side_str(order.side), order.price, order.quantity)
                    .await?;
                let txid = ack.txid.into_iter().next().ok_or_else(|| {
                    GatewayError::Protocol("order ack without txid".to_string())
                })?;
                let id = OrderId(txid);
                self.registry.insert(id.clone(), order.clone());
                Ok(id)
            }
            .await;
            (order.clone(), result)
        });
        Ok(join_all(submissions).await.into_iter().collect())
    }

    async fn get_order_statuses(
        &self,
        ids: &[OrderId],
    ) -> Result<BatchOutcome<OrderId, OrderStatus>> {
        let mut outcome = BatchOutcome::new();
        if ids.is_empty() {
            return Ok(outcome);
        }

        // Unknown ids fail individually; the rest go out in one batched
        // query.
        let mut originals = Vec::with_capacity(ids.len());
        for id in ids {
            match self.registry.get(id) {
                Some(order) => originals.push((id.clone(), order)),
                None => outcome.push(id.clone(), Err(GatewayError::MissingOrder(id.0.clone()))),
            }
        }
        if originals.is_empty() {
            return Ok(outcome);
        }

        // A transport failure here precedes any translation or eviction, so
        // it may still fail the whole call.
        let txids: Vec<String> = originals.iter().map(|(id, _)| id.0.clone()).collect();
        let queried = with_retries("order statuses", DEFAULT_REST_RETRIES, || {
            self.rest.query_orders(&txids)
        })
        .await?;

        for (id, order) in originals {
            let result = queried
                .get(&id.0)
                .ok_or_else(|| {
                    GatewayError::Protocol(format!("venue returned no status for {}", id))
                })
                .and_then(|raw| translate_status(raw, order));
            if let Ok(status) = &result {
                if status.kind.is_terminal() {
                    self.registry.remove(&id);
                }
            }
            outcome.push(id, result);
        }
        Ok(outcome)
    }

    async fn cancel_orders(&self, ids: &[OrderId]) -> Result<BatchOutcome<OrderId, ()>> {
        let mut outcome = BatchOutcome::new();
        if ids.is_empty() {
            return Ok(outcome);
        }

        let mut known = Vec::with_capacity(ids.len());
        for id in ids {
            if self.registry.contains(id) {
                known.push(id.clone());
            } else {
                outcome.push(id.clone(), Err(GatewayError::MissingOrder(id.0.clone())));
            }
        }
        if known.is_empty() {
            return Ok(outcome);
        }

        // One batched request; nothing is evicted until the venue accepts it.
        let txids: Vec<String> = known.iter().map(|id| id.0.clone()).collect();
        with_retries("cancel orders", DEFAULT_REST_RETRIES, || {
            self.rest.cancel_orders(&txids)
        })
        .await?;

        for id in known {
            self.registry.remove(&id);
            outcome.push(id, Ok(()));
        }
        Ok(outcome)
    }

    async fn get_balances(&self) -> Result<HashMap<Asset, Decimal>> {
        let balances =
            with_retries("balances", DEFAULT_REST_RETRIES, || self.rest.get_balances())
                .await?;
        Ok(balances.into_iter().map(|(asset, balance)| (Asset(asset), balance)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn order() -> Order {
        Order { side: OrderSide::Sell, pair: AssetPair(1), price: d("100"), quantity: d("2") }
    }

    fn queried(status: &str, price: Option<&str>, vol: Option<&str>) -> QueriedOrder {
        QueriedOrder {
            status: status.to_string(),
            price: price.map(|p| p.parse().unwrap()),
            vol_exec: vol.map(|v| v.parse().unwrap()),
        }
    }

    #[test]
    fn status_table_translates() {
        assert_eq!(
            translate_status(&queried("pending", None, None), order()).unwrap().kind,
            StatusKind::Pending
        );
        assert_eq!(
            translate_status(&queried("open", None, None), order()).unwrap().kind,
            StatusKind::Unfilled
        );
        let closed =
            translate_status(&queried("closed", Some("99.5"), Some("2")), order()).unwrap();
        assert_eq!(closed.kind, StatusKind::Filled);
        assert_eq!(closed.filled_price, Some(d("99.5")));
        assert_eq!(closed.filled_quantity, Some(d("2")));
        assert_eq!(
            translate_status(&queried("canceled", None, None), order()).unwrap().kind,
            StatusKind::Canceled
        );
        assert_eq!(
            translate_status(&queried("expired", None, None), order()).unwrap().kind,
            StatusKind::Expired
        );
    }

    #[test]
    fn unknown_status_is_a_protocol_error() {
        assert!(matches!(
            translate_status(&queried("limbo", None, None), order()),
            Err(GatewayError::Protocol(_))
        ));
    }

    #[test]
    fn side_strings_are_lowercase() {
        assert_eq!(side_str(OrderSide::Buy), "buy");
        assert_eq!(side_str(OrderSide::Sell), "sell");
    }
}
