//! BinanceUS depth recorder.
//!
//! One combined-stream WebSocket connection carries every subscribed
//! symbol's diff stream. The read task demultiplexes frames by stream key
//! into per-symbol mailboxes; each mailbox drainer stitches the diff stream
//! onto a REST snapshot and applies it to that symbol's book store.
//! Sequence gaps and crossed results trigger a REST re-snapshot merged with
//! whatever the stream has delivered since (prefer the fresh snapshot).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, Result};
use crate::exchange::backoff::{reconnect_delay, with_retries, DEFAULT_REST_RETRIES};
use crate::exchange::binance::client::BinanceRestClient;
use crate::exchange::ws::{self, WsSink, WS_OP_TIMEOUT};
use crate::exchange::OrderBookRecorder;
use crate::market::{
    filter_and_merge, BookDelta, LevelUpdate, OrderBookStore, SequencePolicy,
};
use crate::types::{AssetPair, AssetPairTranslator, BookLevel, OrderBook};

pub const WS_ENDPOINT: &str = "wss://stream.binance.us:9443";
const COMBINED_STREAM_PATH: &str = "/stream?streams=";
const DEPTH_STREAM_SUFFIX: &str = "@depth";

/// REST depth limits the venue accepts; snapshots use the smallest one
/// covering the configured depth.
const DEPTH_LIMITS: [u32; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];

pub(crate) fn snapshot_limit(depth: usize) -> u32 {
    DEPTH_LIMITS
        .iter()
        .copied()
        .find(|&limit| limit as usize >= depth)
        .unwrap_or(DEPTH_LIMITS[DEPTH_LIMITS.len() - 1])
}

fn stream_key(symbol: &str) -> String {
    format!("{}{}", symbol.to_lowercase(), DEPTH_STREAM_SUFFIX)
}

/// Differential depth event, combined-stream payload.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthUpdate {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct CombinedFrame {
    stream: String,
    data: DepthUpdate,
}

#[derive(Debug, Deserialize)]
struct AckFrame {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorFrame {
    code: i64,
    msg: String,
}

#[derive(Debug)]
enum Frame {
    Data(CombinedFrame),
    Ack(u64),
    VenueError(ErrorFrame),
}

fn classify_frame(text: &str) -> Result<Frame> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("stream").is_some() {
        return Ok(Frame::Data(serde_json::from_value(value)?));
    }
    if value.get("code").is_some() {
        return Ok(Frame::VenueError(serde_json::from_value(value)?));
    }
    if value.get("id").is_some() {
        let ack: AckFrame = serde_json::from_value(value)?;
        return Ok(Frame::Ack(ack.id));
    }
    Err(GatewayError::Protocol(format!("unrecognized frame: {}", text)))
}

fn decode_delta(update: &DepthUpdate) -> Result<BookDelta> {
    let parse_side = |levels: &[[String; 2]]| -> Result<Vec<LevelUpdate>> {
        levels
            .iter()
            .map(|[price, qty]| {
                let price = price.parse().map_err(|e| {
                    GatewayError::Protocol(format!("bad price {:?}: {}", price, e))
                })?;
                let qty = qty.parse().map_err(|e| {
                    GatewayError::Protocol(format!("bad quantity {:?}: {}", qty, e))
                })?;
                Ok(LevelUpdate::sequenced(price, qty, update.final_update_id))
            })
            .collect()
    };
    Ok(BookDelta {
        bids: parse_side(&update.bids)?,
        asks: parse_side(&update.asks)?,
        first_seq: update.first_update_id,
        last_seq: update.final_update_id,
    })
}

struct Shared {
    rest: BinanceRestClient,
    translator: AssetPairTranslator,
    depth: usize,
    writer: Mutex<Option<WsSink>>,
    mailboxes: RwLock<HashMap<String, mpsc::UnboundedSender<DepthUpdate>>>,
    books: RwLock<HashMap<AssetPair, Arc<OrderBookStore>>>,
    acks: std::sync::Mutex<HashMap<u64, oneshot::Sender<()>>>,
    next_request_id: AtomicU64,
    fault: RwLock<Option<String>>,
    shutdown: tokio_util::sync::CancellationToken,
}

impl Shared {
    fn record_fault(&self, message: String) {
        error!(error = %message, "depth recorder entering failed state");
        *self.fault.write().expect("fault lock poisoned") = Some(message);
    }

    fn combined_url(&self) -> String {
        let mailboxes = self.mailboxes.read().expect("mailbox lock poisoned");
        let streams: Vec<&str> = mailboxes.keys().map(String::as_str).collect();
        format!("{}{}{}", WS_ENDPOINT, COMBINED_STREAM_PATH, streams.join("/"))
    }
}

pub struct BinanceDepthRecorder {
    shared: Arc<Shared>,
}

impl BinanceDepthRecorder {
    /// Connects the combined stream for `pairs`, installs REST snapshots,
    /// and starts the read and drainer tasks.
    pub async fn connect(
        rest: BinanceRestClient,
        translator: AssetPairTranslator,
        pairs: &[AssetPair],
        depth: usize,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            rest,
            translator,
            depth,
            writer: Mutex::new(None),
            mailboxes: RwLock::new(HashMap::new()),
            books: RwLock::new(HashMap::new()),
            acks: std::sync::Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            fault: RwLock::new(None),
            shutdown,
        });

        let mut receivers = Vec::with_capacity(pairs.len());
        for &pair in pairs {
            let symbol = shared.translator.symbol(pair)?.to_string();
            let (sender, receiver) = mpsc::unbounded_channel();
            shared
                .mailboxes
                .write()
                .expect("mailbox lock poisoned")
                .insert(stream_key(&symbol), sender);
            receivers.push((pair, symbol, receiver));
        }

        let stream = ws::connect(&shared.combined_url()).await?;
        let (sink, source) = stream.split();
        *shared.writer.lock().await = Some(sink);
        tokio::spawn(read_loop(Arc::clone(&shared), Some(source)));

        // Initial snapshots stitch onto whatever the stream has buffered:
        // the drainer discards updates at or before the snapshot sequence.
        for (pair, symbol, receiver) in receivers {
            let store = install_snapshot(&shared, &symbol).await?;
            shared
                .books
                .write()
                .expect("book lock poisoned")
                .insert(pair, Arc::clone(&store));
            tokio::spawn(drain_mailbox(Arc::clone(&shared), symbol, store, receiver));
        }

        Ok(Self { shared: Arc::clone(&shared) })
    }

    /// Unrecoverable protocol failure, if one has occurred.
    pub fn fault(&self) -> Option<String> {
        self.shared.fault.read().expect("fault lock poisoned").clone()
    }
}

#[async_trait]
impl OrderBookRecorder for BinanceDepthRecorder {
    fn order_book(&self, pair: AssetPair) -> Option<OrderBook> {
        let books = self.shared.books.read().expect("book lock poisoned");
        books.get(&pair).map(|store| store.read())
    }

    /// Subscribes the pair's diff stream over the live connection, waiting
    /// for the subscription ack before installing the snapshot and mailbox
    /// drainer. The connection write lock is held across the send-and-await
    /// window so the ack cannot race data frames.
    async fn register_asset_pair(&self, pair: AssetPair) -> Result<()> {
        let shared = &self.shared;
        if shared.books.read().expect("book lock poisoned").contains_key(&pair) {
            return Ok(());
        }
        let symbol = shared.translator.symbol(pair)?.to_string();
        let key = stream_key(&symbol);

        // Mailbox goes in first so data frames racing the ack are captured,
        // not fatal.
        let (sender, receiver) = mpsc::unbounded_channel();
        shared
            .mailboxes
            .write()
            .expect("mailbox lock poisoned")
            .insert(key.clone(), sender);

        {
            let mut writer = shared.writer.lock().await;
            let sink = writer
                .as_mut()
                .ok_or_else(|| GatewayError::Transport("stream disconnected".to_string()))?;

            let request_id = shared.next_request_id.fetch_add(1, Ordering::Relaxed);
            let (ack_sender, ack_receiver) = oneshot::channel();
            shared.acks.lock().expect("ack lock poisoned").insert(request_id, ack_sender);

            let payload = serde_json::json!({
                "method": "SUBSCRIBE",
                "params": [key],
                "id": request_id,
            });
            sink.send(Message::Text(payload.to_string().into())).await?;

            match tokio::time::timeout(WS_OP_TIMEOUT, ack_receiver).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    return Err(GatewayError::Protocol(
                        "subscription ack channel dropped".to_string(),
                    ))
                }
                Err(_) => {
                    shared.acks.lock().expect("ack lock poisoned").remove(&request_id);
                    return Err(GatewayError::TransportTimeout(format!(
                        "subscription ack for {}",
                        key
                    )));
                }
            }
        }

        let store = install_snapshot(shared, &symbol).await?;
        shared
            .books
            .write()
            .expect("book lock poisoned")
            .insert(pair, Arc::clone(&store));
        tokio::spawn(drain_mailbox(Arc::clone(shared), symbol, store, receiver));
        info!(pair = ?pair, "registered depth stream");
        Ok(())
    }
}

async fn fetch_snapshot(shared: &Shared, symbol: &str) -> Result<OrderBook> {
    let limit = snapshot_limit(shared.depth);
    let snapshot = with_retries("depth snapshot", DEFAULT_REST_RETRIES, || {
        shared.rest.get_depth(symbol, limit)
    })
    .await?;

    let levels = |raw: &[[rust_decimal::Decimal; 2]]| -> Vec<BookLevel> {
        raw.iter()
            .map(|[price, qty]| BookLevel::sequenced(*price, *qty, snapshot.last_update_id))
            .collect()
    };
    Ok(OrderBook::new(
        levels(&snapshot.bids),
        levels(&snapshot.asks),
        snapshot.last_update_id,
    ))
}

async fn install_snapshot(shared: &Shared, symbol: &str) -> Result<Arc<OrderBookStore>> {
    let book = fetch_snapshot(shared, symbol).await?;
    debug!(
        symbol,
        update_id = book.last_update_id,
        bid_levels = book.bids.len(),
        ask_levels = book.asks.len(),
        "installed depth snapshot"
    );
    Ok(Arc::new(OrderBookStore::with_snapshot(book, shared.depth)))
}

/// Re-snapshots after a gap or crossed result, keeping stream levels that
/// are newer than the snapshot.
async fn resync(shared: &Shared, symbol: &str, store: &OrderBookStore) -> Result<()> {
    let snapshot = fetch_snapshot(shared, symbol).await?;
    let merged = filter_and_merge(&store.read(), &snapshot, true);
    info!(symbol, update_id = merged.last_update_id, "depth store resynced");
    store.force_snapshot(merged);
    Ok(())
}

async fn drain_mailbox(
    shared: Arc<Shared>,
    symbol: String,
    store: Arc<OrderBookStore>,
    mut receiver: mpsc::UnboundedReceiver<DepthUpdate>,
) {
    loop {
        let update = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            update = receiver.recv() => match update {
                Some(update) => update,
                None => return,
            },
        };

        let delta = match decode_delta(&update) {
            Ok(delta) => delta,
            Err(err) => {
                warn!(symbol, error = %err, "undecodable depth update, resyncing");
                if let Err(err) = resync(&shared, &symbol, &store).await {
                    shared.record_fault(format!("resync failed for {}: {}", symbol, err));
                    return;
                }
                continue;
            }
        };

        if let Err(err) = store.apply_delta(&delta, SequencePolicy::Range) {
            warn!(
                symbol,
                first_seq = delta.first_seq,
                last_seq = delta.last_seq,
                book_seq = store.last_update_id(),
                error = %err,
                "depth stream desynced, taking fresh snapshot"
            );
            if let Err(err) = resync(&shared, &symbol, &store).await {
                shared.record_fault(format!("resync failed for {}: {}", symbol, err));
                return;
            }
        }
    }
}

async fn read_loop(shared: Arc<Shared>, initial: Option<ws::WsSource>) {
    let mut source = initial;
    let mut attempt: u32 = 0;

    loop {
        if shared.shutdown.is_cancelled() {
            return;
        }

        let current = match source.take() {
            Some(stream) => stream,
            None => {
                let url = shared.combined_url();
                match ws::connect(&url).await {
                    Ok(stream) => {
                        let (sink, stream_source) = stream.split();
                        *shared.writer.lock().await = Some(sink);
                        info!("depth stream reconnected");
                        attempt = 0;
                        stream_source
                    }
                    Err(err) => {
                        let delay = reconnect_delay(attempt);
                        warn!(
                            error = %err,
                            delay_secs = delay.as_secs(),
                            "depth stream connect failed, backing off"
                        );
                        attempt += 1;
                        tokio::select! {
                            _ = shared.shutdown.cancelled() => return,
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                }
            }
        };

        let fatal = run_connection(&shared, current).await;
        *shared.writer.lock().await = None;
        if fatal {
            return;
        }
    }
}

/// Reads one connection to exhaustion. Returns true on an unrecoverable
/// protocol failure (the recorder stays down and the facade sees the
/// fault); false means reconnect.
async fn run_connection(shared: &Arc<Shared>, mut source: ws::WsSource) -> bool {
    loop {
        let message = tokio::select! {
            _ = shared.shutdown.cancelled() => return true,
            message = source.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => match classify_frame(&text) {
                Ok(Frame::Data(frame)) => {
                    let mailboxes = shared.mailboxes.read().expect("mailbox lock poisoned");
                    match mailboxes.get(&frame.stream) {
                        Some(sender) => {
                            let _ = sender.send(frame.data);
                        }
                        None => {
                            shared.record_fault(format!(
                                "frame for unknown stream {}",
                                frame.stream
                            ));
                            return true;
                        }
                    }
                }
                Ok(Frame::Ack(id)) => {
                    let waiter = shared.acks.lock().expect("ack lock poisoned").remove(&id);
                    match waiter {
                        Some(sender) => {
                            let _ = sender.send(());
                        }
                        None => {
                            shared.record_fault(format!("ack for unknown request id {}", id));
                            return true;
                        }
                    }
                }
                Ok(Frame::VenueError(err)) => {
                    shared.record_fault(format!("venue error {}: {}", err.code, err.msg));
                    return true;
                }
                Err(err) => {
                    shared.record_fault(err.to_string());
                    return true;
                }
            },
            Some(Ok(Message::Ping(payload))) => {
                // try_lock: a register_asset_pair holding the writer across
                // its ack wait must not stall the read loop
                if let Ok(mut writer) = shared.writer.try_lock() {
                    if let Some(sink) = writer.as_mut() {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            warn!("pong send failed, reconnecting");
                            return false;
                        }
                    }
                }
            }
            Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                info!(?frame, "depth stream closed by venue");
                return false;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!(error = %err, "depth stream read error");
                return false;
            }
            None => {
                info!("depth stream ended");
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_limit_picks_smallest_covering() {
        assert_eq!(snapshot_limit(1), 5);
        assert_eq!(snapshot_limit(5), 5);
        assert_eq!(snapshot_limit(6), 10);
        assert_eq!(snapshot_limit(100), 100);
        assert_eq!(snapshot_limit(101), 500);
        assert_eq!(snapshot_limit(1000), 1000);
        assert_eq!(snapshot_limit(4000), 5000);
        assert_eq!(snapshot_limit(9999), 5000);
    }

    #[test]
    fn combined_frame_decodes() {
        let json = r#"{
            "stream": "btcusd@depth",
            "data": {
                "e": "depthUpdate",
                "E": 1699999999123,
                "s": "BTCUSD",
                "U": 1000,
                "u": 1005,
                "b": [["67650.00", "1.23400"]],
                "a": [["67651.00", "0.98700"], ["67651.50", "0"]]
            }
        }"#;
        match classify_frame(json).unwrap() {
            Frame::Data(frame) => {
                assert_eq!(frame.stream, "btcusd@depth");
                assert_eq!(frame.data.first_update_id, 1000);
                assert_eq!(frame.data.final_update_id, 1005);
                assert_eq!(frame.data.bids.len(), 1);
                assert_eq!(frame.data.asks.len(), 2);
            }
            other => panic!("expected data frame, got {:?}", other),
        }
    }

    #[test]
    fn ack_and_error_frames_classify() {
        assert!(matches!(
            classify_frame(r#"{"result": null, "id": 7}"#).unwrap(),
            Frame::Ack(7)
        ));
        assert!(matches!(
            classify_frame(r#"{"code": -1121, "msg": "Invalid symbol."}"#).unwrap(),
            Frame::VenueError(_)
        ));
        assert!(classify_frame("[1,2,3]").is_err());
    }

    #[test]
    fn delta_decoding_tags_levels_with_final_sequence() {
        let update = DepthUpdate {
            event_time: 0,
            symbol: "BTCUSD".into(),
            first_update_id: 10,
            final_update_id: 12,
            bids: vec![["100.5".into(), "1".into()]],
            asks: vec![["101.0".into(), "0".into()]],
        };
        let delta = decode_delta(&update).unwrap();
        assert_eq!(delta.first_seq, 10);
        assert_eq!(delta.last_seq, 12);
        assert_eq!(delta.bids[0].sequence, 12);
        assert!(delta.asks[0].quantity.is_zero());
    }

    #[test]
    fn malformed_decimals_are_protocol_errors() {
        let update = DepthUpdate {
            event_time: 0,
            symbol: "BTCUSD".into(),
            first_update_id: 1,
            final_update_id: 1,
            bids: vec![["not-a-price".into(), "1".into()]],
            asks: vec![],
        };
        assert!(matches!(decode_delta(&update), Err(GatewayError::Protocol(_))));
    }
}
