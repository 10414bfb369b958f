//! KuCoin venue.
//!
//! Market data rides the token-bootstrapped WebSocket recorder (ticker and
//! level2 topics, ping keep-alive). The venue reports order state as an
//! `{isActive, cancelExist}` composition rather than a status string, and
//! every submission carries a client-generated order id.

pub mod client;
pub mod recorder;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

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

use client::{KuCoinRestClient, OrderDetailResponse};
use recorder::KuCoinRecorder;

pub const VENUE_NAME: &str = "KuCoin";

pub const DEFAULT_DEPTH: usize = 1000;
pub const DEFAULT_SPREAD_CAPACITY: usize = 200;

fn side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

/// The venue has no status string; active orders are unfilled, inactive
/// ones either canceled or filled depending on `cancelExist`.
fn translate_status(detail: &OrderDetailResponse, order: Order) -> OrderStatus {
    if detail.is_active {
        return OrderStatus {
            kind: StatusKind::Unfilled,
            filled_price: None,
            filled_quantity: None,
            order,
        };
    }
    if detail.cancel_exist {
        return OrderStatus {
            kind: StatusKind::Canceled,
            filled_price: None,
            filled_quantity: None,
            order,
        };
    }
    OrderStatus {
        kind: StatusKind::Filled,
        filled_price: Some(detail.price),
        filled_quantity: Some(detail.size),
        order,
    }
}

pub struct KuCoin {
    translator: AssetPairTranslator,
    fee: Decimal,
    rest: KuCoinRestClient,
    recorder: KuCoinRecorder,
    latency: EwmaEstimator,
    registry: OrderRegistry,
}

impl KuCoin {
    pub async fn connect(
        credentials: Credentials,
        translator: AssetPairTranslator,
        fee: Decimal,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let rest = KuCoinRestClient::new(credentials)?;
        let pairs = translator.pairs();
        let recorder = KuCoinRecorder::connect(
            rest.clone(),
            translator.clone(),
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
impl Exchange for KuCoin {
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
        let level1 =
            with_retries("level1", DEFAULT_REST_RETRIES, || self.rest.get_level1(symbol))
                .await?;
        let timestamp =
            chrono::DateTime::from_timestamp_millis(level1.time).unwrap_or_else(Utc::now);
        Ok(Spread { bid: level1.best_bid, ask: level1.best_ask, timestamp })
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
                let client_oid = Uuid::new_v4().to_string();
                let ack = self
                    .rest
                    .create_order(
                        &client_oid,
                        symbol,
                        side_str(order.side),
                        order.price,
                        order.quantity,
                    )
                    .await?;
                let id = OrderId(ack.order_id);
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
                let detail = with_retries("order status", DEFAULT_REST_RETRIES, || {
                    self.rest.get_order(&id.0)
                })
                .await?;
                let status = translate_status(&detail, order);
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
                self.registry.require(id)?;
                with_retries("cancel order", DEFAULT_REST_RETRIES, || {
                    self.rest.cancel_order(&id.0)
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
        let accounts =
            with_retries("balances", DEFAULT_REST_RETRIES, || self.rest.get_accounts())
                .await?;
        // Multiple account types (main, trade) per currency sum together.
        let mut balances: HashMap<Asset, Decimal> = HashMap::new();
        for entry in accounts {
            *balances.entry(Asset(entry.currency)).or_default() += entry.balance;
        }
        Ok(balances)
    }
}
