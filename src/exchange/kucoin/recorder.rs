//! KuCoin WebSocket recorder.
//!
//! The socket host is handed out by a REST bootstrap call together with a
//! connection token and the required ping cadence. One connection carries
//! the ticker and level2 topics for every configured pair; frames are
//! dispatched by topic string. Level2 books start from a signed REST
//! snapshot; diff entries carry their own sequence numbers and stale ones
//! are dropped individually. A missed pong is a protocol failure the
//! facade gets to see.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, Result};
use crate::exchange::backoff::{reconnect_delay, with_retries, DEFAULT_REST_RETRIES};
use crate::exchange::kucoin::client::KuCoinRestClient;
use crate::exchange::ws::{self, WsSink, WS_OP_TIMEOUT};
use crate::exchange::{OrderBookRecorder, SpreadRecorder};
use crate::market::{
    filter_and_merge, BookDelta, LevelUpdate, OrderBookStore, SequencePolicy, SpreadRingBuffer,
};
use crate::types::{AssetPair, AssetPairTranslator, BookLevel, OrderBook, Spread};

const TICKER_TOPIC_PREFIX: &str = "/market/ticker:";
const LEVEL2_TOPIC_PREFIX: &str = "/market/level2:";

type Mailbox = mpsc::UnboundedSender<Value>;

#[derive(Debug, Deserialize)]
struct InboundMeta {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    topic: Option<String>,
}

/// Ticker stream payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerData {
    best_bid: rust_decimal::Decimal,
    best_ask: rust_decimal::Decimal,
    time: i64,
}

/// Level2 diff payload; every entry is `[price, size, sequence]`.
#[derive(Debug, Deserialize)]
struct Level2Changes {
    #[serde(default)]
    bids: Vec<[String; 3]>,
    #[serde(default)]
    asks: Vec<[String; 3]>,
}

#[derive(Debug, Deserialize)]
struct Level2Data {
    changes: Level2Changes,
    #[serde(rename = "sequenceStart", default)]
    sequence_start: u64,
    #[serde(rename = "sequenceEnd", default)]
    sequence_end: u64,
}

struct SpreadFeed {
    buffer: Arc<SpreadRingBuffer>,
    topic: String,
}

struct BookFeed {
    store: Arc<OrderBookStore>,
}

struct Shared {
    rest: KuCoinRestClient,
    translator: AssetPairTranslator,
    depth: usize,
    capacity: usize,
    writer: Mutex<Option<WsSink>>,
    /// topic -> mailbox; survives reconnects since topics are stable.
    channels: RwLock<HashMap<String, Mailbox>>,
    /// request id -> waiter completed by the matching ack or pong.
    waiters: std::sync::Mutex<HashMap<String, oneshot::Sender<Result<()>>>>,
    next_id: AtomicU64,
    ping_interval: RwLock<Duration>,
    spread_feeds: RwLock<HashMap<AssetPair, SpreadFeed>>,
    book_feeds: RwLock<HashMap<AssetPair, BookFeed>>,
    fault: RwLock<Option<String>>,
    shutdown: CancellationToken,
}

impl Shared {
    fn record_fault(&self, message: String) {
        error!(error = %message, "kucoin recorder entering failed state");
        *self.fault.write().expect("fault lock poisoned") = Some(message);
    }

    fn clear_fault(&self) {
        *self.fault.write().expect("fault lock poisoned") = None;
    }

    fn request_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

pub struct KuCoinRecorder {
    shared: Arc<Shared>,
}

impl KuCoinRecorder {
    pub async fn connect(
        rest: KuCoinRestClient,
        translator: AssetPairTranslator,
        pairs: &[AssetPair],
        depth: usize,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let start_id = {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(1)
        };
        let shared = Arc::new(Shared {
            rest,
            translator,
            depth,
            capacity,
            writer: Mutex::new(None),
            channels: RwLock::new(HashMap::new()),
            waiters: std::sync::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(start_id),
            ping_interval: RwLock::new(Duration::from_secs(30)),
            spread_feeds: RwLock::new(HashMap::new()),
            book_feeds: RwLock::new(HashMap::new()),
            fault: RwLock::new(None),
            shutdown,
        });

        let source = establish(&shared).await?;
        tokio::spawn(read_loop(Arc::clone(&shared), source));

        ensure_ticker_feeds(&shared, pairs, true).await?;
        ensure_level2_feeds(&shared, pairs, true).await?;

        Ok(Self { shared })
    }

    pub fn fault(&self) -> Option<String> {
        self.shared.fault.read().expect("fault lock poisoned").clone()
    }
}

#[async_trait]
impl SpreadRecorder for KuCoinRecorder {
    fn historical_spreads(&self, pair: AssetPair) -> Option<Vec<Spread>> {
        let feeds = self.shared.spread_feeds.read().expect("spread feed lock poisoned");
        feeds.get(&pair).map(|feed| feed.buffer.snapshot())
    }

    fn current_spread(&self, pair: AssetPair) -> Option<Spread> {
        let feeds = self.shared.spread_feeds.read().expect("spread feed lock poisoned");
        feeds.get(&pair).and_then(|feed| feed.buffer.back())
    }

    async fn register_asset_pair(&self, pair: AssetPair) -> Result<()> {
        ensure_ticker_feeds(&self.shared, &[pair], true).await
    }
}

#[async_trait]
impl OrderBookRecorder for KuCoinRecorder {
    fn order_book(&self, pair: AssetPair) -> Option<OrderBook> {
        let feeds = self.shared.book_feeds.read().expect("book feed lock poisoned");
        feeds.get(&pair).map(|feed| feed.store.read())
    }

    async fn register_asset_pair(&self, pair: AssetPair) -> Result<()> {
        ensure_level2_feeds(&self.shared, &[pair], true).await
    }
}

/// Bootstrap + connect + welcome. Each (re)connect fetches a fresh token.
async fn establish(shared: &Arc<Shared>) -> Result<ws::WsSource> {
    let bullet = with_retries("bullet token", DEFAULT_REST_RETRIES, || {
        shared.rest.bullet_public()
    })
    .await?;
    let server = bullet
        .instance_servers
        .first()
        .ok_or_else(|| GatewayError::Protocol("bullet response without servers".to_string()))?;
    *shared.ping_interval.write().expect("ping interval lock poisoned") =
        Duration::from_millis(server.ping_interval);

    let url = format!("{}?token={}", server.endpoint, bullet.token);
    let stream = ws::connect(&url).await?;
    let (sink, mut source) = stream.split();

    let deadline = tokio::time::Instant::now() + WS_OP_TIMEOUT;
    loop {
        let message = tokio::time::timeout_at(deadline, source.next())
            .await
            .map_err(|_| GatewayError::TransportTimeout("kucoin welcome".to_string()))?;
        let message = message
            .ok_or_else(|| GatewayError::Transport("connection closed in handshake".into()))??;
        match message {
            Message::Text(text) => {
                let meta: InboundMeta = serde_json::from_str(&text)?;
                if meta.kind != "welcome" {
                    return Err(GatewayError::Protocol(format!(
                        "expected welcome, got {}",
                        text
                    )));
                }
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => {
                return Err(GatewayError::Protocol(format!(
                    "unexpected handshake frame: {:?}",
                    other
                )))
            }
        }
    }

    *shared.writer.lock().await = Some(sink);
    Ok(source)
}

/// Sends one control message and (optionally) waits for its ack/pong. The
/// connection write lock is held across the send-and-await window.
async fn send_and_await(
    shared: &Arc<Shared>,
    kind: &'static str,
    topic: Option<String>,
    await_reply: bool,
) -> Result<()> {
    let id = shared.request_id();
    let mut payload = serde_json::json!({ "id": id, "type": kind });
    if let Some(topic) = &topic {
        payload["topic"] = Value::String(topic.clone());
        payload["response"] = Value::Bool(true);
    }

    let mut writer = shared.writer.lock().await;
    let sink = writer
        .as_mut()
        .ok_or_else(|| GatewayError::Transport("stream disconnected".to_string()))?;

    let receiver = if await_reply {
        let (sender, receiver) = oneshot::channel();
        shared.waiters.lock().expect("waiter lock poisoned").insert(id.clone(), sender);
        Some(receiver)
    } else {
        None
    };

    sink.send(Message::Text(payload.to_string().into())).await?;

    if let Some(receiver) = receiver {
        match tokio::time::timeout(WS_OP_TIMEOUT, receiver).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => {
                return Err(GatewayError::Protocol("reply channel dropped".to_string()))
            }
            Err(_) => {
                shared.waiters.lock().expect("waiter lock poisoned").remove(&id);
                return Err(GatewayError::TransportTimeout(format!(
                    "no reply to {} {:?}",
                    kind, topic
                )));
            }
        }
    }
    Ok(())
}

async fn ensure_ticker_feeds(
    shared: &Arc<Shared>,
    pairs: &[AssetPair],
    await_acks: bool,
) -> Result<()> {
    let mut symbols = Vec::new();
    let mut drainers = Vec::new();
    {
        let mut feeds = shared.spread_feeds.write().expect("spread feed lock poisoned");
        for &pair in pairs {
            if await_acks && feeds.contains_key(&pair) {
                continue;
            }
            let symbol = shared.translator.symbol(pair)?.to_string();
            let topic = format!("{}{}", TICKER_TOPIC_PREFIX, symbol);
            symbols.push(symbol);
            if let Some(feed) = feeds.get(&pair) {
                debug_assert_eq!(feed.topic, topic);
                continue;
            }
            let (sender, receiver) = mpsc::unbounded_channel();
            let buffer = Arc::new(SpreadRingBuffer::new(shared.capacity));
            shared
                .channels
                .write()
                .expect("channel lock poisoned")
                .insert(topic.clone(), sender);
            feeds.insert(pair, SpreadFeed { buffer: Arc::clone(&buffer), topic });
            drainers.push((buffer, receiver));
        }
    }
    if symbols.is_empty() {
        return Ok(());
    }

    for (buffer, receiver) in drainers {
        tokio::spawn(drain_ticker(Arc::clone(shared), buffer, receiver));
    }

    let topic = format!("{}{}", TICKER_TOPIC_PREFIX, symbols.join(","));
    send_and_await(shared, "subscribe", Some(topic), await_acks).await
}

async fn ensure_level2_feeds(
    shared: &Arc<Shared>,
    pairs: &[AssetPair],
    await_acks: bool,
) -> Result<()> {
    let mut new_feeds = Vec::new();
    let mut symbols = Vec::new();
    {
        let feeds = shared.book_feeds.read().expect("book feed lock poisoned");
        for &pair in pairs {
            if await_acks && feeds.contains_key(&pair) {
                continue;
            }
            let symbol = shared.translator.symbol(pair)?.to_string();
            symbols.push(symbol.clone());
            if !feeds.contains_key(&pair) {
                new_feeds.push((pair, symbol));
            }
        }
    }
    if symbols.is_empty() {
        return Ok(());
    }

    // Mailboxes go in before the subscribe so no diff frame is lost; the
    // snapshot is installed afterwards and stale entries fall out on their
    // per-entry sequence numbers.
    let mut drainers = Vec::new();
    {
        let mut feeds = shared.book_feeds.write().expect("book feed lock poisoned");
        for (pair, symbol) in &new_feeds {
            if feeds.contains_key(pair) {
                continue;
            }
            let topic = format!("{}{}", LEVEL2_TOPIC_PREFIX, symbol);
            let (sender, receiver) = mpsc::unbounded_channel();
            let store = Arc::new(OrderBookStore::new(shared.depth));
            shared
                .channels
                .write()
                .expect("channel lock poisoned")
                .insert(topic, sender);
            feeds.insert(*pair, BookFeed { store: Arc::clone(&store) });
            drainers.push((*pair, store, receiver));
        }
    }

    let topic = format!("{}{}", LEVEL2_TOPIC_PREFIX, symbols.join(","));
    send_and_await(shared, "subscribe", Some(topic), await_acks).await?;

    for (pair, store, receiver) in drainers {
        if await_acks {
            let symbol = shared.translator.symbol(pair)?;
            install_level2_snapshot(shared, symbol, &store).await?;
        }
        tokio::spawn(drain_level2(Arc::clone(shared), pair, store, receiver));
    }
    Ok(())
}

async fn install_level2_snapshot(
    shared: &Shared,
    symbol: &str,
    store: &OrderBookStore,
) -> Result<()> {
    let raw = with_retries("level2 snapshot", DEFAULT_REST_RETRIES, || {
        shared.rest.get_level2_snapshot(symbol)
    })
    .await?;
    let sequence: u64 = raw
        .sequence
        .parse()
        .map_err(|e| GatewayError::Protocol(format!("bad sequence {:?}: {}", raw.sequence, e)))?;
    let levels = |raw: &[[rust_decimal::Decimal; 2]]| -> Vec<BookLevel> {
        raw.iter().map(|[price, qty]| BookLevel::sequenced(*price, *qty, sequence)).collect()
    };
    let book = OrderBook::new(levels(&raw.bids), levels(&raw.asks), sequence);
    debug!(symbol, sequence, "kucoin level2 snapshot installed");
    store.force_snapshot(book);
    Ok(())
}

async fn drain_ticker(
    shared: Arc<Shared>,
    buffer: Arc<SpreadRingBuffer>,
    mut receiver: mpsc::UnboundedReceiver<Value>,
) {
    loop {
        let data = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            data = receiver.recv() => match data {
                Some(data) => data,
                None => return,
            },
        };
        match serde_json::from_value::<TickerData>(data) {
            Ok(ticker) => {
                let timestamp = chrono::DateTime::from_timestamp_millis(ticker.time)
                    .unwrap_or_else(Utc::now);
                buffer.push(Spread {
                    bid: ticker.best_bid,
                    ask: ticker.best_ask,
                    timestamp,
                });
            }
            Err(err) => {
                shared.record_fault(format!("ticker payload: {}", err));
                return;
            }
        }
    }
}

fn decode_level2_delta(data: &Level2Data) -> Result<BookDelta> {
    let parse_side = |entries: &[[String; 3]]| -> Result<Vec<LevelUpdate>> {
        entries
            .iter()
            .map(|[price, size, sequence]| {
                let price = price.parse().map_err(|e| {
                    GatewayError::Protocol(format!("bad price {:?}: {}", price, e))
                })?;
                let size = size.parse().map_err(|e| {
                    GatewayError::Protocol(format!("bad size {:?}: {}", size, e))
                })?;
                let sequence = sequence.parse().map_err(|e| {
                    GatewayError::Protocol(format!("bad sequence {:?}: {}", sequence, e))
                })?;
                Ok(LevelUpdate::sequenced(price, size, sequence))
            })
            .collect()
    };
    Ok(BookDelta {
        bids: parse_side(&data.changes.bids)?,
        asks: parse_side(&data.changes.asks)?,
        first_seq: data.sequence_start,
        last_seq: data.sequence_end,
    })
}

async fn resync_level2(shared: &Shared, pair: AssetPair, store: &OrderBookStore) -> Result<()> {
    let symbol = shared.translator.symbol(pair)?;
    let raw = with_retries("level2 snapshot", DEFAULT_REST_RETRIES, || {
        shared.rest.get_level2_snapshot(symbol)
    })
    .await?;
    let sequence: u64 = raw
        .sequence
        .parse()
        .map_err(|e| GatewayError::Protocol(format!("bad sequence {:?}: {}", raw.sequence, e)))?;
    let levels = |raw: &[[rust_decimal::Decimal; 2]]| -> Vec<BookLevel> {
        raw.iter().map(|[price, qty]| BookLevel::sequenced(*price, *qty, sequence)).collect()
    };
    let snapshot = OrderBook::new(levels(&raw.bids), levels(&raw.asks), sequence);
    let merged = filter_and_merge(&store.read(), &snapshot, true);
    store.force_snapshot(merged);
    info!(pair = ?pair, sequence, "kucoin book resynced from REST");
    Ok(())
}

async fn drain_level2(
    shared: Arc<Shared>,
    pair: AssetPair,
    store: Arc<OrderBookStore>,
    mut receiver: mpsc::UnboundedReceiver<Value>,
) {
    loop {
        let data = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            data = receiver.recv() => match data {
                Some(data) => data,
                None => return,
            },
        };
        let data: Level2Data = match serde_json::from_value(data) {
            Ok(data) => data,
            Err(err) => {
                shared.record_fault(format!("level2 payload: {}", err));
                return;
            }
        };
        let delta = match decode_level2_delta(&data) {
            Ok(delta) => delta,
            Err(err) => {
                shared.record_fault(format!("level2 entries: {}", err));
                return;
            }
        };
        if let Err(err) = store.apply_delta(&delta, SequencePolicy::PerEntry) {
            warn!(pair = ?pair, error = %err, "level2 update rejected, resyncing");
            if let Err(err) = resync_level2(&shared, pair, &store).await {
                shared.record_fault(format!("resync failed: {}", err));
                return;
            }
        }
    }
}

/// Keep-alive per the bootstrap contract: ping every `pingInterval`, and a
/// pong must come back before the next deadline.
async fn ping_loop(shared: Arc<Shared>, connection_closed: CancellationToken) {
    loop {
        let interval = *shared.ping_interval.read().expect("ping interval lock poisoned");
        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            _ = connection_closed.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        match send_and_await(&shared, "ping", None, true).await {
            Ok(()) => debug!("pong received"),
            Err(err) => {
                shared.record_fault(format!("keep-alive failed: {}", err));
                return;
            }
        }
    }
}

async fn read_loop(shared: Arc<Shared>, source: ws::WsSource) {
    let mut source = Some(source);
    let mut attempt: u32 = 0;

    loop {
        if shared.shutdown.is_cancelled() {
            return;
        }

        let current = match source.take() {
            Some(stream) => stream,
            None => match establish(&shared).await {
                Ok(stream) => {
                    info!("kucoin stream reconnected, resubscribing");
                    attempt = 0;
                    shared.clear_fault();
                    let spread_pairs: Vec<AssetPair> = shared
                        .spread_feeds
                        .read()
                        .expect("spread feed lock poisoned")
                        .keys()
                        .copied()
                        .collect();
                    let book_pairs: Vec<AssetPair> = shared
                        .book_feeds
                        .read()
                        .expect("book feed lock poisoned")
                        .keys()
                        .copied()
                        .collect();
                    if let Err(err) = ensure_ticker_feeds(&shared, &spread_pairs, false).await
                    {
                        warn!(error = %err, "ticker resubscription failed");
                    }
                    if let Err(err) = ensure_level2_feeds(&shared, &book_pairs, false).await {
                        warn!(error = %err, "level2 resubscription failed");
                    }
                    stream
                }
                Err(err) => {
                    let delay = reconnect_delay(attempt);
                    warn!(error = %err, delay_secs = delay.as_secs(),
                          "kucoin connect failed, backing off");
                    attempt += 1;
                    tokio::select! {
                        _ = shared.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            },
        };

        let connection_closed = CancellationToken::new();
        tokio::spawn(ping_loop(Arc::clone(&shared), connection_closed.clone()));

        let fatal = run_connection(&shared, current).await;
        connection_closed.cancel();
        *shared.writer.lock().await = None;
        if fatal {
            return;
        }
    }
}

async fn run_connection(shared: &Arc<Shared>, mut source: ws::WsSource) -> bool {
    loop {
        let message = tokio::select! {
            _ = shared.shutdown.cancelled() => return true,
            message = source.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                let meta: InboundMeta = match serde_json::from_str(&text) {
                    Ok(meta) => meta,
                    Err(err) => {
                        shared.record_fault(format!("undecodable frame: {}", err));
                        return true;
                    }
                };
                match meta.kind.as_str() {
                    "ack" | "pong" => {
                        let Some(id) = meta.id else {
                            shared.record_fault(format!("{} without id", meta.kind));
                            return true;
                        };
                        let waiter =
                            shared.waiters.lock().expect("waiter lock poisoned").remove(&id);
                        match waiter {
                            Some(sender) => {
                                let _ = sender.send(Ok(()));
                            }
                            None => debug!(id = %id, kind = %meta.kind, "reply with no waiter"),
                        }
                    }
                    "error" => {
                        let reason = format!("venue error frame: {}", text);
                        if let Some(id) = meta.id {
                            let waiter = shared
                                .waiters
                                .lock()
                                .expect("waiter lock poisoned")
                                .remove(&id);
                            if let Some(sender) = waiter {
                                let _ = sender.send(Err(GatewayError::VenueBusiness(reason)));
                                continue;
                            }
                        }
                        shared.record_fault(reason);
                        return true;
                    }
                    "message" => {
                        let Some(topic) = meta.topic else {
                            shared.record_fault(format!("message without topic: {}", text));
                            return true;
                        };
                        let data = match serde_json::from_str::<Value>(&text)
                            .ok()
                            .and_then(|mut v| v.get_mut("data").map(Value::take))
                        {
                            Some(data) => data,
                            None => {
                                shared.record_fault(format!("message without data: {}", text));
                                return true;
                            }
                        };
                        let sender = {
                            let channels =
                                shared.channels.read().expect("channel lock poisoned");
                            channels.get(&topic).cloned()
                        };
                        match sender {
                            Some(sender) => {
                                let _ = sender.send(data);
                            }
                            None => {
                                shared.record_fault(format!("frame for unknown topic {}", topic));
                                return true;
                            }
                        }
                    }
                    "welcome" => {}
                    other => {
                        shared.record_fault(format!("unexpected frame type {:?}", other));
                        return true;
                    }
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                if let Ok(mut writer) = shared.writer.try_lock() {
                    if let Some(sink) = writer.as_mut() {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            return false;
                        }
                    }
                }
            }
            Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                info!(?frame, "kucoin stream closed by venue");
                return false;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!(error = %err, "kucoin stream read error");
                return false;
            }
            None => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_payload_decodes() {
        let data: TickerData = serde_json::from_str(
            r#"{"sequence": "1545896668986", "bestAsk": "0.08", "bestBid": "0.07",
                "bestAskSize": "0.5", "bestBidSize": "0.1", "price": "0.075",
                "size": "0.01", "time": 1545896668986}"#,
        )
        .unwrap();
        assert_eq!(data.best_bid, "0.07".parse().unwrap());
        assert_eq!(data.best_ask, "0.08".parse().unwrap());
        assert_eq!(data.time, 1545896668986);
    }

    #[test]
    fn level2_delta_decodes_with_per_entry_sequences() {
        let data: Level2Data = serde_json::from_str(
            r#"{"changes": {
                    "asks": [["18906", "0.00331", "14103845"]],
                    "bids": [["18905", "0.58", "14103844"], ["18904", "0", "14103843"]]
                },
                "sequenceEnd": 14103845,
                "sequenceStart": 14103843,
                "symbol": "BTC-USDT",
                "time": 1663747970273}"#,
        )
        .unwrap();
        let delta = decode_level2_delta(&data).unwrap();
        assert_eq!(delta.first_seq, 14103843);
        assert_eq!(delta.last_seq, 14103845);
        assert_eq!(delta.asks[0].sequence, 14103845);
        assert_eq!(delta.bids[1].sequence, 14103843);
        assert!(delta.bids[1].quantity.is_zero());
    }

    #[test]
    fn bad_level2_entries_are_protocol_errors() {
        let data: Level2Data = serde_json::from_str(
            r#"{"changes": {"asks": [["x", "1", "2"]], "bids": []},
                "sequenceStart": 1, "sequenceEnd": 2}"#,
        )
        .unwrap();
        assert!(matches!(decode_level2_delta(&data), Err(GatewayError::Protocol(_))));
    }

    #[test]
    fn topic_prefixes_match_wire_format() {
        assert_eq!(format!("{}BTC-USDT", TICKER_TOPIC_PREFIX), "/market/ticker:BTC-USDT");
        assert_eq!(format!("{}BTC-USDT", LEVEL2_TOPIC_PREFIX), "/market/level2:BTC-USDT");
    }
}
