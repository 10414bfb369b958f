//! Kraken WebSocket recorder.
//!
//! One connection carries both the `spread` and `book` subscriptions for
//! every configured pair. The venue assigns a numeric channelID per
//! subscription; the read task dispatches array frames by that id into
//! per-symbol mailboxes. Books arrive as a pushed initial snapshot followed
//! by diffs, each diff carrying a CRC32 checksum over the visible window;
//! a mismatch or a crossed result forces a REST re-snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, Result};
use crate::exchange::backoff::{reconnect_delay, with_retries, DEFAULT_REST_RETRIES};
use crate::exchange::kraken::checksum;
use crate::exchange::kraken::client::KrakenRestClient;
use crate::exchange::ws::{self, WsSink, WS_OP_TIMEOUT};
use crate::exchange::{OrderBookRecorder, SpreadRecorder};
use crate::market::{
    filter_and_merge, BookDelta, LevelUpdate, OrderBookStore, SequencePolicy, SpreadRingBuffer,
};
use crate::types::{AssetPair, AssetPairTranslator, BookLevel, OrderBook, Spread};

pub const WS_ENDPOINT: &str = "wss://ws.kraken.com";

/// The venue's heartbeat is this exact frame; recognized bytewise before
/// any JSON work.
const HEARTBEAT: &[u8] = br#"{"event":"heartbeat"}"#;

const SPREAD_CHANNEL: &str = "spread";
const BOOK_CHANNEL: &str = "book";

type Mailbox = mpsc::UnboundedSender<Vec<Value>>;

#[derive(Debug, Serialize)]
struct SubscriptionSpec {
    name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    depth: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SubscribeMessage {
    event: &'static str,
    pair: Vec<String>,
    subscription: SubscriptionSpec,
}

#[derive(Debug, Deserialize)]
struct SubscriptionName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionStatus {
    #[serde(rename = "channelID")]
    channel_id: Option<u64>,
    pair: String,
    status: String,
    subscription: SubscriptionName,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

struct PendingSub {
    mailbox: Mailbox,
    /// Absent on reconnect resubscription, where nobody waits.
    done: Option<oneshot::Sender<Result<u64>>>,
}

struct SpreadFeed {
    buffer: Arc<SpreadRingBuffer>,
    mailbox: Mailbox,
}

struct BookFeed {
    store: Arc<OrderBookStore>,
    mailbox: Mailbox,
}

struct Shared {
    rest: KrakenRestClient,
    /// REST symbol space ("XXBTZUSD").
    rest_translator: AssetPairTranslator,
    /// WebSocket dialect symbol space ("XBT/USD").
    iso_translator: AssetPairTranslator,
    depth: usize,
    capacity: usize,
    writer: Mutex<Option<WsSink>>,
    channels: RwLock<HashMap<u64, Mailbox>>,
    pending: std::sync::Mutex<HashMap<(String, String), PendingSub>>,
    spread_feeds: RwLock<HashMap<AssetPair, SpreadFeed>>,
    book_feeds: RwLock<HashMap<AssetPair, BookFeed>>,
    fault: RwLock<Option<String>>,
    shutdown: CancellationToken,
}

impl Shared {
    fn record_fault(&self, message: String) {
        error!(error = %message, "kraken recorder entering failed state");
        *self.fault.write().expect("fault lock poisoned") = Some(message);
    }
}

pub struct KrakenRecorder {
    shared: Arc<Shared>,
}

impl KrakenRecorder {
    pub async fn connect(
        rest: KrakenRestClient,
        rest_translator: AssetPairTranslator,
        iso_translator: AssetPairTranslator,
        pairs: &[AssetPair],
        depth: usize,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            rest,
            rest_translator,
            iso_translator,
            depth,
            capacity,
            writer: Mutex::new(None),
            channels: RwLock::new(HashMap::new()),
            pending: std::sync::Mutex::new(HashMap::new()),
            spread_feeds: RwLock::new(HashMap::new()),
            book_feeds: RwLock::new(HashMap::new()),
            fault: RwLock::new(None),
            shutdown,
        });

        let source = establish(&shared).await?;
        tokio::spawn(read_loop(Arc::clone(&shared), source));

        ensure_spread_feeds(&shared, pairs, true).await?;
        ensure_book_feeds(&shared, pairs, true).await?;

        Ok(Self { shared })
    }

    pub fn fault(&self) -> Option<String> {
        self.shared.fault.read().expect("fault lock poisoned").clone()
    }
}

#[async_trait]
impl SpreadRecorder for KrakenRecorder {
    fn historical_spreads(&self, pair: AssetPair) -> Option<Vec<Spread>> {
        let feeds = self.shared.spread_feeds.read().expect("spread feed lock poisoned");
        feeds.get(&pair).map(|feed| feed.buffer.snapshot())
    }

    fn current_spread(&self, pair: AssetPair) -> Option<Spread> {
        let feeds = self.shared.spread_feeds.read().expect("spread feed lock poisoned");
        feeds.get(&pair).and_then(|feed| feed.buffer.back())
    }

    async fn register_asset_pair(&self, pair: AssetPair) -> Result<()> {
        ensure_spread_feeds(&self.shared, &[pair], true).await
    }
}

#[async_trait]
impl OrderBookRecorder for KrakenRecorder {
    fn order_book(&self, pair: AssetPair) -> Option<OrderBook> {
        let feeds = self.shared.book_feeds.read().expect("book feed lock poisoned");
        feeds.get(&pair).map(|feed| feed.store.read())
    }

    async fn register_asset_pair(&self, pair: AssetPair) -> Result<()> {
        ensure_book_feeds(&self.shared, &[pair], true).await
    }
}

/// Connects and completes the protocol handshake: the first real frame must
/// announce an online system.
async fn establish(shared: &Arc<Shared>) -> Result<ws::WsSource> {
    let stream = ws::connect(WS_ENDPOINT).await?;
    let (sink, mut source) = stream.split();

    let deadline = tokio::time::Instant::now() + WS_OP_TIMEOUT;
    loop {
        let message = tokio::time::timeout_at(deadline, source.next())
            .await
            .map_err(|_| GatewayError::TransportTimeout("kraken handshake".to_string()))?;
        let message = message
            .ok_or_else(|| GatewayError::Transport("connection closed in handshake".into()))??;
        let text = match message {
            Message::Text(text) => text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => {
                return Err(GatewayError::Protocol(format!(
                    "unexpected handshake frame: {:?}",
                    other
                )))
            }
        };
        if text.as_bytes() == HEARTBEAT {
            continue;
        }
        let value: Value = serde_json::from_str(&text)?;
        let online = value.get("event").and_then(Value::as_str) == Some("systemStatus")
            && value.get("status").and_then(Value::as_str) == Some("online");
        if !online {
            return Err(GatewayError::Protocol(format!("venue not online: {}", text)));
        }
        break;
    }

    *shared.writer.lock().await = Some(sink);
    Ok(source)
}

/// Subscribes `pairs` to a channel, installing mailboxes before the send so
/// data frames racing the ack land in them. With `await_acks`, the
/// connection write lock is held across the send-and-await window.
async fn subscribe(
    shared: &Arc<Shared>,
    pairs_with_mailboxes: &[(AssetPair, Mailbox)],
    name: &'static str,
    depth: Option<usize>,
    await_acks: bool,
) -> Result<()> {
    if pairs_with_mailboxes.is_empty() {
        return Ok(());
    }

    let mut iso_pairs = Vec::with_capacity(pairs_with_mailboxes.len());
    for (pair, _) in pairs_with_mailboxes {
        iso_pairs.push(shared.iso_translator.symbol(*pair)?.to_string());
    }

    let mut waiters = Vec::new();
    {
        let mut writer = shared.writer.lock().await;
        let sink = writer
            .as_mut()
            .ok_or_else(|| GatewayError::Transport("stream disconnected".to_string()))?;

        {
            let mut pending = shared.pending.lock().expect("pending lock poisoned");
            for ((_, mailbox), iso) in pairs_with_mailboxes.iter().zip(&iso_pairs) {
                let done = if await_acks {
                    let (done_tx, done_rx) = oneshot::channel();
                    waiters.push((iso.clone(), done_rx));
                    Some(done_tx)
                } else {
                    None
                };
                pending.insert(
                    (name.to_string(), iso.clone()),
                    PendingSub { mailbox: mailbox.clone(), done },
                );
            }
        }

        let payload = serde_json::to_string(&SubscribeMessage {
            event: "subscribe",
            pair: iso_pairs.clone(),
            subscription: SubscriptionSpec { name, depth },
        })?;
        sink.send(Message::Text(payload.into())).await?;

        // One ack per pair; interleaved data frames flow to their mailboxes
        // through the read task meanwhile.
        for (iso, done_rx) in waiters {
            match tokio::time::timeout(WS_OP_TIMEOUT, done_rx).await {
                Ok(Ok(Ok(channel_id))) => {
                    debug!(pair = %iso, channel_id, channel = name, "subscribed");
                }
                Ok(Ok(Err(err))) => return Err(err),
                Ok(Err(_)) => {
                    return Err(GatewayError::Protocol(
                        "subscription ack channel dropped".to_string(),
                    ))
                }
                Err(_) => {
                    shared
                        .pending
                        .lock()
                        .expect("pending lock poisoned")
                        .remove(&(name.to_string(), iso.clone()));
                    return Err(GatewayError::TransportTimeout(format!(
                        "subscription ack for {} {}",
                        name, iso
                    )));
                }
            }
        }
    }
    Ok(())
}

async fn ensure_spread_feeds(
    shared: &Arc<Shared>,
    pairs: &[AssetPair],
    await_acks: bool,
) -> Result<()> {
    let mut to_subscribe = Vec::new();
    let mut drainers = Vec::new();
    {
        let mut feeds = shared.spread_feeds.write().expect("spread feed lock poisoned");
        for &pair in pairs {
            if await_acks && feeds.contains_key(&pair) {
                continue;
            }
            match feeds.get(&pair) {
                Some(feed) => to_subscribe.push((pair, feed.mailbox.clone())),
                None => {
                    let (sender, receiver) = mpsc::unbounded_channel();
                    let buffer = Arc::new(SpreadRingBuffer::new(shared.capacity));
                    feeds.insert(
                        pair,
                        SpreadFeed { buffer: Arc::clone(&buffer), mailbox: sender.clone() },
                    );
                    to_subscribe.push((pair, sender));
                    drainers.push((buffer, receiver));
                }
            }
        }
    }

    for (buffer, receiver) in drainers {
        tokio::spawn(drain_spreads(Arc::clone(shared), buffer, receiver));
    }
    subscribe(shared, &to_subscribe, SPREAD_CHANNEL, None, await_acks).await
}

async fn ensure_book_feeds(
    shared: &Arc<Shared>,
    pairs: &[AssetPair],
    await_acks: bool,
) -> Result<()> {
    let mut to_subscribe = Vec::new();
    let mut drainers = Vec::new();
    {
        let mut feeds = shared.book_feeds.write().expect("book feed lock poisoned");
        for &pair in pairs {
            if await_acks && feeds.contains_key(&pair) {
                continue;
            }
            match feeds.get(&pair) {
                Some(feed) => to_subscribe.push((pair, feed.mailbox.clone())),
                None => {
                    let (sender, receiver) = mpsc::unbounded_channel();
                    let store = Arc::new(OrderBookStore::new(shared.depth));
                    feeds.insert(
                        pair,
                        BookFeed { store: Arc::clone(&store), mailbox: sender.clone() },
                    );
                    to_subscribe.push((pair, sender));
                    drainers.push((pair, store, receiver));
                }
            }
        }
    }

    for (pair, store, receiver) in drainers {
        tokio::spawn(drain_book(Arc::clone(shared), pair, store, receiver));
    }
    subscribe(shared, &to_subscribe, BOOK_CHANNEL, Some(shared.depth), await_acks).await
}

fn parse_decimal(value: &Value, what: &str) -> Result<Decimal> {
    value
        .as_str()
        .ok_or_else(|| GatewayError::Protocol(format!("{} is not a string", what)))?
        .parse()
        .map_err(|e| GatewayError::Protocol(format!("bad {}: {}", what, e)))
}

fn parse_wire_timestamp(value: &Value) -> Result<DateTime<Utc>> {
    let raw = value
        .as_str()
        .ok_or_else(|| GatewayError::Protocol("timestamp is not a string".to_string()))?;
    let seconds: f64 = raw
        .parse()
        .map_err(|e| GatewayError::Protocol(format!("bad timestamp {:?}: {}", raw, e)))?;
    let whole = seconds.trunc() as i64;
    let nanos = (seconds.fract() * 1_000_000_000.0) as u32;
    DateTime::from_timestamp(whole, nanos)
        .ok_or_else(|| GatewayError::Protocol(format!("timestamp {} out of range", raw)))
}

fn decode_spread_frame(frame: &[Value]) -> Result<Spread> {
    let payload = frame
        .get(1)
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::Protocol("spread frame missing payload".to_string()))?;
    Ok(Spread {
        bid: parse_decimal(payload.first().unwrap_or(&Value::Null), "bid")?,
        ask: parse_decimal(payload.get(1).unwrap_or(&Value::Null), "ask")?,
        timestamp: parse_wire_timestamp(payload.get(2).unwrap_or(&Value::Null))?,
    })
}

async fn drain_spreads(
    shared: Arc<Shared>,
    buffer: Arc<SpreadRingBuffer>,
    mut receiver: mpsc::UnboundedReceiver<Vec<Value>>,
) {
    loop {
        let frame = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            frame = receiver.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };
        match decode_spread_frame(&frame) {
            Ok(spread) => buffer.push(spread),
            Err(err) => {
                shared.record_fault(format!("spread frame: {}", err));
                return;
            }
        }
    }
}

fn parse_book_entry(raw: &Value) -> Result<LevelUpdate> {
    let entry = raw
        .as_array()
        .ok_or_else(|| GatewayError::Protocol("book entry is not an array".to_string()))?;
    Ok(LevelUpdate {
        price: parse_decimal(entry.first().unwrap_or(&Value::Null), "price")?,
        quantity: parse_decimal(entry.get(1).unwrap_or(&Value::Null), "volume")?,
        sequence: 0,
        republish: entry.len() == 4,
    })
}

fn parse_book_side(raw: &Value) -> Result<Vec<LevelUpdate>> {
    raw.as_array()
        .ok_or_else(|| GatewayError::Protocol("book side is not an array".to_string()))?
        .iter()
        .map(parse_book_entry)
        .collect()
}

enum BookFrame {
    Snapshot(OrderBook),
    Diff { delta: BookDelta, checksum: Option<String> },
}

fn decode_book_frame(frame: &[Value], depth: usize) -> Result<BookFrame> {
    if frame.len() < 4 {
        return Err(GatewayError::Protocol(format!("short book frame: {:?}", frame)));
    }
    let payloads = &frame[1..frame.len() - 2];

    // Initial snapshot: full sides under "as"/"bs".
    if let Some(first) = payloads.first().and_then(Value::as_object) {
        if first.contains_key("as") || first.contains_key("bs") {
            let mut asks = Vec::new();
            let mut bids = Vec::new();
            if let Some(raw) = first.get("as") {
                asks = parse_book_side(raw)?;
            }
            if let Some(raw) = first.get("bs") {
                bids = parse_book_side(raw)?;
            }
            let to_levels = |updates: Vec<LevelUpdate>| -> Vec<BookLevel> {
                updates
                    .into_iter()
                    .take(depth)
                    .map(|u| BookLevel::new(u.price, u.quantity))
                    .collect()
            };
            return Ok(BookFrame::Snapshot(OrderBook::new(
                to_levels(bids),
                to_levels(asks),
                0,
            )));
        }
    }

    let mut delta = BookDelta::default();
    let mut frame_checksum = None;
    for payload in payloads {
        let object = payload.as_object().ok_or_else(|| {
            GatewayError::Protocol(format!("book payload is not an object: {}", payload))
        })?;
        if let Some(raw) = object.get("a") {
            delta.asks.extend(parse_book_side(raw)?);
        }
        if let Some(raw) = object.get("b") {
            delta.bids.extend(parse_book_side(raw)?);
        }
        if let Some(c) = object.get("c").and_then(Value::as_str) {
            frame_checksum = Some(c.to_string());
        }
    }
    Ok(BookFrame::Diff { delta, checksum: frame_checksum })
}

/// REST re-snapshot after a checksum failure or crossed result. With no
/// sequence numbers on this dialect the prefer-new merge degenerates to the
/// snapshot itself.
async fn resync_book(shared: &Shared, pair: AssetPair, store: &OrderBookStore) -> Result<()> {
    let symbol = shared.rest_translator.symbol(pair)?;
    let raw = with_retries("kraken depth snapshot", DEFAULT_REST_RETRIES, || {
        shared.rest.get_depth(symbol, shared.depth)
    })
    .await?;

    let parse_side = |entries: &[Vec<Value>]| -> Result<Vec<BookLevel>> {
        entries
            .iter()
            .map(|entry| {
                Ok(BookLevel::new(
                    parse_decimal(entry.first().unwrap_or(&Value::Null), "price")?,
                    parse_decimal(entry.get(1).unwrap_or(&Value::Null), "volume")?,
                ))
            })
            .collect()
    };
    let snapshot =
        OrderBook::new(parse_side(&raw.bids)?, parse_side(&raw.asks)?, 0);
    let merged = filter_and_merge(&store.read(), &snapshot, true);
    store.force_snapshot(merged);
    info!(pair = ?pair, "kraken book resynced from REST");
    Ok(())
}

async fn drain_book(
    shared: Arc<Shared>,
    pair: AssetPair,
    store: Arc<OrderBookStore>,
    mut receiver: mpsc::UnboundedReceiver<Vec<Value>>,
) {
    loop {
        let frame = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            frame = receiver.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };

        let decoded = match decode_book_frame(&frame, shared.depth) {
            Ok(decoded) => decoded,
            Err(err) => {
                shared.record_fault(format!("book frame: {}", err));
                return;
            }
        };

        match decoded {
            BookFrame::Snapshot(book) => {
                debug!(pair = ?pair, bids = book.bids.len(), asks = book.asks.len(),
                       "kraken initial book installed");
                store.force_snapshot(book);
            }
            BookFrame::Diff { delta, checksum: frame_checksum } => {
                if let Err(err) = store.apply_delta(&delta, SequencePolicy::Unsequenced) {
                    warn!(pair = ?pair, error = %err, "book update rejected, resyncing");
                    if let Err(err) = resync_book(&shared, pair, &store).await {
                        shared.record_fault(format!("resync failed: {}", err));
                        return;
                    }
                    continue;
                }
                if let Some(expected) = frame_checksum {
                    if let Err(err) =
                        checksum::verify(&store.bids(), &store.asks(), &expected)
                    {
                        warn!(pair = ?pair, error = %err, "book checksum mismatch, resyncing");
                        if let Err(err) = resync_book(&shared, pair, &store).await {
                            shared.record_fault(format!("resync failed: {}", err));
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn handle_subscription_status(shared: &Arc<Shared>, value: Value) -> Result<()> {
    let status: SubscriptionStatus = serde_json::from_value(value)?;
    let key = (status.subscription.name.clone(), status.pair.clone());
    let pending = shared.pending.lock().expect("pending lock poisoned").remove(&key);
    let Some(pending) = pending else {
        return Err(GatewayError::Protocol(format!(
            "subscription status for unknown request {} {}",
            status.subscription.name, status.pair
        )));
    };

    if status.status == "subscribed" {
        let channel_id = status.channel_id.ok_or_else(|| {
            GatewayError::Protocol("subscribed ack without channelID".to_string())
        })?;
        shared
            .channels
            .write()
            .expect("channel lock poisoned")
            .insert(channel_id, pending.mailbox);
        if let Some(done) = pending.done {
            let _ = done.send(Ok(channel_id));
        }
    } else {
        let reason = status.error_message.unwrap_or_else(|| status.status.clone());
        match pending.done {
            Some(done) => {
                let _ = done.send(Err(GatewayError::VenueBusiness(reason)));
            }
            None => {
                // failed resubscription after a reconnect has no waiter
                shared.record_fault(format!(
                    "resubscription rejected for {}: {}",
                    status.pair, reason
                ));
            }
        }
    }
    Ok(())
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
                    info!("kraken stream reconnected, resubscribing");
                    attempt = 0;
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
                    // Fire-and-forget: acks re-install the channel mailboxes
                    // through this same read loop.
                    if let Err(err) = ensure_spread_feeds(&shared, &spread_pairs, false).await
                    {
                        warn!(error = %err, "spread resubscription failed");
                    }
                    if let Err(err) = ensure_book_feeds(&shared, &book_pairs, false).await {
                        warn!(error = %err, "book resubscription failed");
                    }
                    stream
                }
                Err(err) => {
                    let delay = reconnect_delay(attempt);
                    warn!(error = %err, delay_secs = delay.as_secs(),
                          "kraken connect failed, backing off");
                    attempt += 1;
                    tokio::select! {
                        _ = shared.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            },
        };

        let fatal = run_connection(&shared, current).await;
        *shared.writer.lock().await = None;
        shared.channels.write().expect("channel lock poisoned").clear();
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
                if text.as_bytes() == HEARTBEAT {
                    continue;
                }
                let value: Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(err) => {
                        shared.record_fault(format!("undecodable frame: {}", err));
                        return true;
                    }
                };
                match value {
                    Value::Array(frame) => {
                        let channel_id = frame.first().and_then(Value::as_u64);
                        let Some(channel_id) = channel_id else {
                            shared.record_fault(format!("array frame without channel id: {}", text));
                            return true;
                        };
                        let sender = {
                            let channels =
                                shared.channels.read().expect("channel lock poisoned");
                            channels.get(&channel_id).cloned()
                        };
                        match sender {
                            Some(sender) => {
                                let _ = sender.send(frame);
                            }
                            None => {
                                shared.record_fault(format!(
                                    "frame for unknown channel {}",
                                    channel_id
                                ));
                                return true;
                            }
                        }
                    }
                    Value::Object(ref object) => {
                        match object.get("event").and_then(Value::as_str) {
                            Some("subscriptionStatus") => {
                                if let Err(err) =
                                    handle_subscription_status(shared, value.clone())
                                {
                                    shared.record_fault(err.to_string());
                                    return true;
                                }
                            }
                            Some("systemStatus") | Some("pong") => {}
                            other => {
                                shared.record_fault(format!(
                                    "unexpected event {:?}: {}",
                                    other, text
                                ));
                                return true;
                            }
                        }
                    }
                    _ => {
                        shared.record_fault(format!("unexpected frame shape: {}", text));
                        return true;
                    }
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                // try_lock: a register_asset_pair holding the writer across
                // its ack wait must not stall the read loop
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
                info!(?frame, "kraken stream closed by venue");
                return false;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!(error = %err, "kraken stream read error");
                return false;
            }
            None => return false,
        }
    }
}
