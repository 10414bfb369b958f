//! BinanceUS venue.
//!
//! Order books ride the combined-stream WebSocket recorder; the spread feed
//! is REST-polled from the book ticker (this venue's stream has no separate
//! spread channel worth a socket). Order operations are HMAC-SHA256 signed
//! REST calls.

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
use crate::exchange::polled::{PolledSpreadRecorder, DEFAULT_CAPACITY, DEFAULT_PERIOD};
use crate::exchange::{
    gather_historical_spreads, gather_order_books, BatchOutcome, Exchange, SpreadRecorder,
};
use crate::latency::EwmaEstimator;
use crate::market::OrderRegistry;
use crate::types::{
    Asset, AssetPair, AssetPairTranslator, Order, OrderBook, OrderId, OrderSide, OrderStatus,
    Spread, StatusKind,
};

use client::{BinanceRestClient, OrderStatusResponse};
use recorder::BinanceDepthRecorder;

pub const VENUE_NAME: &str = "BinanceUS";

pub const DEFAULT_DEPTH: usize = 1000;

fn side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    }
}

/// Translates the venue's status strings to the canonical enum. `REJECTED`
/// and unknown strings are errors, not silent no-ops.
fn translate_status(response: &OrderStatusResponse, order: Order) -> Result<OrderStatus> {
    let (kind, filled_price, filled_quantity) = match response.status.as_str() {
        "NEW" => (StatusKind::Unfilled, None, None),
        "PARTIALLY_FILLED" => (
            StatusKind::PartiallyFilled,
            Some(response.price),
            Some(response.executed_qty),
        ),
        "FILLED" => (StatusKind::Filled, Some(response.price), Some(response.executed_qty)),
        "CANCELED" => (StatusKind::Canceled, None, None),
        "EXPIRED" => (StatusKind::Expired, None, None),
        "REJECTED" => {
            return Err(GatewayError::VenueBusiness(format!(
                "order {:?} rejected by venue",
                order
            )))
        }
        other => {
            return Err(GatewayError::Protocol(format!("unknown order status {:?}", other)))
        }
    };
    Ok(OrderStatus { kind, filled_price, filled_quantity, order })
}

pub struct BinanceUs {
    translator: AssetPairTranslator,
    fee: Decimal,
    rest: BinanceRestClient,
    spreads: PolledSpreadRecorder,
    depth: BinanceDepthRecorder,
    latency: EwmaEstimator,
    registry: OrderRegistry,
}

impl BinanceUs {
    pub async fn connect(
        credentials: Credentials,
        translator: AssetPairTranslator,
        fee: Decimal,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let rest = BinanceRestClient::new(credentials)?;
        let pairs = translator.pairs();

        let ticker_rest = rest.clone();
        let ticker_translator = translator.clone();
        let spreads = PolledSpreadRecorder::spawn(
            &pairs,
            DEFAULT_CAPACITY,
            DEFAULT_PERIOD,
            move |pair| {
                let rest = ticker_rest.clone();
                let translator = ticker_translator.clone();
                async move {
                    let symbol = translator.symbol(pair)?.to_string();
                    let ticker = rest.get_book_ticker(&symbol).await?;
                    Ok(Spread {
                        bid: ticker.bid_price,
                        ask: ticker.ask_price,
                        timestamp: Utc::now(),
                    })
                }
            },
            shutdown.child_token(),
        );

        let depth = BinanceDepthRecorder::connect(
            rest.clone(),
            translator.clone(),
            &pairs,
            DEFAULT_DEPTH,
            shutdown,
        )
        .await?;

        Ok(Self {
            translator,
            fee,
            rest,
            spreads,
            depth,
            latency: EwmaEstimator::default(),
            registry: OrderRegistry::new(),
        })
    }
}

#[async_trait]
impl Exchange for BinanceUs {
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
        Ok(gather_historical_spreads(&self.spreads, pairs, window, samples).await)
    }

    async fn get_current_spread(&self, pair: AssetPair) -> Result<Spread> {
        if let Some(spread) = self.spreads.current_spread(pair) {
            return Ok(spread);
        }
        self.spreads.register_asset_pair(pair).await?;
        let symbol = self.translator.symbol(pair)?;
        let ticker = with_retries("book ticker", DEFAULT_REST_RETRIES, || {
            self.rest.get_book_ticker(symbol)
        })
        .await?;
        Ok(Spread { bid: ticker.bid_price, ask: ticker.ask_price, timestamp: Utc::now() })
    }

    async fn get_order_books(
        &self,
        pairs: &[AssetPair],
    ) -> Result<BatchOutcome<AssetPair, OrderBook>> {
        if let Some(fault) = self.depth.fault() {
            return Err(GatewayError::Protocol(fault));
        }
        Ok(gather_order_books(&self.depth, pairs).await)
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
                // No retry here: resubmitting a POST that may have landed
                // would duplicate the order.
                let ack = self
                    .rest
                    .create_order(symbol, side_str(order.side), order.price, order.quantity)
                    .await?;
                let id = OrderId(ack.order_id.to_string());
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
        let queries = ids.iter().map(|id| async {
            let result = async {
                let order = self.registry.require(id)?;
                let symbol = self.translator.symbol(order.pair)?;
                let response = with_retries("order status", DEFAULT_REST_RETRIES, || {
                    self.rest.query_order(symbol, &id.0)
                })
                .await?;
                let status = translate_status(&response, order)?;
                if status.kind.is_terminal() {
                    self.registry.remove(id);
                }
                Ok(status)
            }
            .await;
            (id.clone(), result)
        });
        Ok(join_all(queries).await.into_iter().collect())
    }

    async fn cancel_orders(&self, ids: &[OrderId]) -> Result<BatchOutcome<OrderId, ()>> {
        let cancels = ids.iter().map(|id| async {
            let result = async {
                let order = self.registry.require(id)?;
                let symbol = self.translator.symbol(order.pair)?;
                with_retries("cancel order", DEFAULT_REST_RETRIES, || {
                    self.rest.cancel_order(symbol, &id.0)
                })
                .await?;
                self.registry.remove(id);
                Ok(())
            }
            .await;
            (id.clone(), result)
        });
        Ok(join_all(cancels).await.into_iter().collect())
    }

    async fn get_balances(&self) -> Result<HashMap<Asset, Decimal>> {
        let account =
            with_retries("balances", DEFAULT_REST_RETRIES, || self.rest.get_account()).await?;
        Ok(account
            .balances
            .into_iter()
            .map(|entry| (Asset(entry.asset), entry.free + entry.locked))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn order() -> Order {
        Order { side: OrderSide::Buy, pair: AssetPair(0), price: d("10"), quantity: d("1") }
    }

    fn response(status: &str, price: &str, executed: &str) -> OrderStatusResponse {
        serde_json::from_value(serde_json::json!({
            "status": status,
            "price": price,
            "executedQty": executed,
        }))
        .unwrap()
    }

    #[test]
    fn status_table_translates() {
        let new = translate_status(&response("NEW", "10", "0"), order()).unwrap();
        assert_eq!(new.kind, StatusKind::Unfilled);
        assert!(new.filled_quantity.is_none());

        let partial =
            translate_status(&response("PARTIALLY_FILLED", "10", "0.5"), order()).unwrap();
        assert_eq!(partial.kind, StatusKind::PartiallyFilled);
        assert_eq!(partial.filled_quantity, Some(d("0.5")));

        let filled = translate_status(&response("FILLED", "10", "1.0"), order()).unwrap();
        assert_eq!(filled.kind, StatusKind::Filled);
        assert!(filled.kind.is_terminal());

        assert_eq!(
            translate_status(&response("CANCELED", "10", "0"), order()).unwrap().kind,
            StatusKind::Canceled
        );
        assert_eq!(
            translate_status(&response("EXPIRED", "10", "0"), order()).unwrap().kind,
            StatusKind::Expired
        );
    }

    #[test]
    fn rejection_is_a_business_error() {
        assert!(matches!(
            translate_status(&response("REJECTED", "10", "0"), order()),
            Err(GatewayError::VenueBusiness(_))
        ));
    }

    #[test]
    fn unknown_status_is_a_protocol_error() {
        assert!(matches!(
            translate_status(&response("HALTED", "10", "0"), order()),
            Err(GatewayError::Protocol(_))
        ));
    }

    #[test]
    fn side_strings_match_wire_format() {
        assert_eq!(side_str(OrderSide::Buy), "BUY");
        assert_eq!(side_str(OrderSide::Sell), "SELL");
    }
}
