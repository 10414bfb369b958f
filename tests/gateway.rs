//! End-to-end scenarios over the public crate surface: shared market state,
//! sampling, the order registry lifecycle, and configuration loading.

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use std::time::Duration;

use venue_gateway::config::Settings;
use venue_gateway::error::GatewayError;
use venue_gateway::exchange::BatchOutcome;
use venue_gateway::latency::EwmaEstimator;
use venue_gateway::market::{
    sample_spreads, BookDelta, DeltaOutcome, LevelUpdate, OrderBookStore, OrderRegistry,
    SequencePolicy, SpreadRingBuffer,
};
use venue_gateway::types::{
    AssetPair, BookLevel, Order, OrderBook, OrderId, OrderSide, Spread, StatusKind,
};

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn spread_at(bid: i64, at_secs: i64) -> Spread {
    Spread {
        bid: Decimal::from(bid),
        ask: Decimal::from(bid + 1),
        timestamp: Utc.timestamp_opt(at_secs, 0).unwrap(),
    }
}

#[test]
fn ring_buffer_keeps_the_last_capacity_entries() {
    let ring = SpreadRingBuffer::new(3);
    for (bid, at) in [(1, 0), (2, 1), (3, 2), (4, 3)] {
        ring.push(spread_at(bid, at));
    }
    let bids: Vec<Decimal> = ring.snapshot().iter().map(|s| s.bid).collect();
    let expected: Vec<Decimal> = [2, 3, 4].into_iter().map(Decimal::from).collect();
    assert_eq!(bids, expected);
}

#[test]
fn snapshot_then_gapped_delta_requires_resync() {
    let store = OrderBookStore::with_snapshot(
        OrderBook::new(
            vec![BookLevel::sequenced(d("99"), d("1"), 100)],
            vec![BookLevel::sequenced(d("101"), d("1"), 100)],
            100,
        ),
        10,
    );

    // 101..=104 never arrived
    let delta = BookDelta {
        bids: vec![LevelUpdate::new(d("99.5"), d("2"))],
        asks: vec![],
        first_seq: 105,
        last_seq: 110,
    };
    assert!(store.apply_delta(&delta, SequencePolicy::Range).is_err());
    assert_eq!(store.last_update_id(), 100);

    // the recorder's re-snapshot resumes the stream
    store.force_snapshot(OrderBook::new(
        vec![BookLevel::sequenced(d("99.5"), d("2"), 110)],
        vec![BookLevel::sequenced(d("101"), d("1"), 110)],
        110,
    ));
    let next = BookDelta {
        bids: vec![LevelUpdate::new(d("99.6"), d("1"))],
        asks: vec![],
        first_seq: 111,
        last_seq: 111,
    };
    assert!(matches!(
        store.apply_delta(&next, SequencePolicy::Range),
        Ok(DeltaOutcome::Applied)
    ));
    assert_eq!(store.last_update_id(), 111);
}

#[test]
fn sampling_clamps_to_available_history() {
    let history: Vec<Spread> = (0..5).map(|i| spread_at(i, i)).collect();
    let samples = sample_spreads(&history, Duration::from_secs(10), 5);
    assert_eq!(samples.len(), 5);
    let bids: Vec<Decimal> = samples.iter().map(|s| s.bid).collect();
    let expected: Vec<Decimal> = (0..5).map(Decimal::from).collect();
    assert_eq!(bids, expected);
    for window in samples.windows(2) {
        assert!(window[0].timestamp < window[1].timestamp);
    }
}

#[test]
fn order_lifecycle_evicts_on_terminal_status() {
    let registry = OrderRegistry::new();
    let order = Order {
        side: OrderSide::Buy,
        pair: AssetPair(0),
        price: d("10"),
        quantity: d("1"),
    };
    let id = OrderId("K".to_string());

    // submission
    registry.insert(id.clone(), order.clone());
    assert!(registry.contains(&id));

    // Unfilled -> PartiallyFilled: the order stays live
    for kind in [StatusKind::Unfilled, StatusKind::PartiallyFilled] {
        assert!(!kind.is_terminal());
        assert_eq!(registry.require(&id).unwrap(), order);
    }

    // Filled: terminal, evict
    assert!(StatusKind::Filled.is_terminal());
    registry.remove(&id);

    // a later cancel can no longer resolve the id
    match registry.require(&id) {
        Err(GatewayError::MissingOrder(missing)) => assert_eq!(missing, "K"),
        other => panic!("expected MissingOrder, got {:?}", other),
    }
}

#[test]
fn batch_with_one_failing_sibling_keeps_the_other() {
    // One id was already evicted by a terminal status; cancelling both must
    // still report the live id's success next to the missing one's error.
    let registry = OrderRegistry::new();
    let live = OrderId("live".to_string());
    let gone = OrderId("gone".to_string());
    registry.insert(
        live.clone(),
        Order { side: OrderSide::Sell, pair: AssetPair(1), price: d("5"), quantity: d("2") },
    );

    let outcome: BatchOutcome<OrderId, ()> = vec![gone.clone(), live.clone()]
        .into_iter()
        .map(|id| {
            let result = registry.require(&id).map(|_| {
                registry.remove(&id);
            });
            (id, result)
        })
        .collect();

    assert!(!outcome.is_complete());
    assert!(outcome.results.contains_key(&live));
    assert!(!registry.contains(&live));
    match &outcome.failures[..] {
        [(id, GatewayError::MissingOrder(missing))] => {
            assert_eq!(id, &gone);
            assert_eq!(missing, "gone");
        }
        other => panic!("expected one MissingOrder failure, got {:?}", other),
    }
}

#[test]
fn estimator_read_is_conservative() {
    let estimator = EwmaEstimator::default();
    for sample in [12.0, 15.0, 11.0, 30.0, 14.0] {
        estimator.sample(sample);
    }
    assert!(estimator.read() >= Duration::from_millis(14));
}

#[test]
fn settings_drive_per_venue_translators() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("exchanges.csv"),
        "exchange,api_key,fees\nBinanceUS,key,0.001\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("assetpairs.csv"),
        "canonical,ISO4217,BinanceUS,Kraken,KuCoin\n\
         BTCUSD,XBT/USD,BTCUSD,XXBTZUSD,BTC-USD\n\
         ADAUSDT,ADA/USDT,ADAUSDT,,ADA-USDT\n",
    )
    .unwrap();

    let settings = Settings::load(dir.path()).unwrap();
    assert_eq!(settings.venues[0].fee, d("0.001"));

    let binance = settings.translator("BinanceUS").unwrap();
    let kraken = settings.translator("Kraken").unwrap();
    let kucoin = settings.translator("KuCoin").unwrap();
    assert_eq!(binance.get(AssetPair(1)), Some("ADAUSDT"));
    assert_eq!(kraken.get(AssetPair(1)), None, "empty cell means unsupported");
    assert_eq!(kucoin.get(AssetPair(1)), Some("ADA-USDT"));
    assert_eq!(settings.iso4217_translator().unwrap().get(AssetPair(0)), Some("XBT/USD"));
}
