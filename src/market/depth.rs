//! Depth-limited concurrent order book.
//!
//! One store per venue/symbol, written by that symbol's mailbox drainer and
//! the snapshot installer, read by facade queries. Both sides are kept as
//! sorted vectors (bids descending, asks ascending) so diff application is
//! a binary-search upsert and depth truncation is a simple cut, the same
//! shape the wire diffs arrive in.

use rust_decimal::Decimal;
use std::sync::RwLock;
use thiserror::Error;

use crate::error::GatewayError;
use crate::types::{BookLevel, OrderBook};

/// How a venue sequences its diffs, normalized across dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencePolicy {
    /// Diffs carry a `[first_seq, last_seq]` range that must abut the book's
    /// current sequence (Binance dialect).
    Range,
    /// Every level update carries its own sequence; stale entries are
    /// dropped individually (KuCoin dialect).
    PerEntry,
    /// No sequencing; integrity comes from per-message checksums (Kraken
    /// dialect).
    Unsequenced,
}

/// A single price-level change. `quantity == 0` deletes the level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelUpdate {
    pub price: Decimal,
    pub quantity: Decimal,
    /// Per-entry sequence; zero on venues without per-entry sequencing.
    pub sequence: u64,
    /// Level was re-sent after depth truncation and is appended without
    /// re-sorting (Kraken's 4-element "r" entries).
    pub republish: bool,
}

impl LevelUpdate {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity, sequence: 0, republish: false }
    }

    pub fn sequenced(price: Decimal, quantity: Decimal, sequence: u64) -> Self {
        Self { price, quantity, sequence, republish: false }
    }
}

/// Decoded differential book update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookDelta {
    pub bids: Vec<LevelUpdate>,
    pub asks: Vec<LevelUpdate>,
    pub first_seq: u64,
    pub last_seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    Applied,
    /// Entire delta precedes the current book state; nothing changed.
    Stale,
}

#[derive(Debug, Error)]
pub enum DepthError {
    #[error("sequence gap: expected {expected}, got {got}")]
    Gap { expected: u64, got: u64 },

    #[error("refusing to publish crossed book (bid {bid} >= ask {ask})")]
    Crossed { bid: Decimal, ask: Decimal },
}

impl DepthError {
    /// Both variants mean the live state can no longer be trusted and the
    /// recorder must take a fresh snapshot.
    pub fn needs_resync(&self) -> bool {
        true
    }
}

impl From<DepthError> for GatewayError {
    fn from(err: DepthError) -> Self {
        match err {
            DepthError::Gap { expected, got } => GatewayError::SequenceGap { expected, got },
            DepthError::Crossed { bid, ask } => {
                GatewayError::Protocol(format!("crossed book: bid {} >= ask {}", bid, ask))
            }
        }
    }
}

#[derive(Debug)]
pub struct OrderBookStore {
    depth: usize,
    book: RwLock<OrderBook>,
}

impl OrderBookStore {
    pub fn new(depth: usize) -> Self {
        Self { depth, book: RwLock::new(OrderBook::default()) }
    }

    pub fn with_snapshot(snapshot: OrderBook, depth: usize) -> Self {
        let store = Self::new(depth);
        store.force_snapshot(snapshot);
        store
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Copy of the current published book.
    pub fn read(&self) -> OrderBook {
        self.book.read().expect("order book lock poisoned").clone()
    }

    pub fn bids(&self) -> Vec<BookLevel> {
        self.book.read().expect("order book lock poisoned").bids.clone()
    }

    pub fn asks(&self) -> Vec<BookLevel> {
        self.book.read().expect("order book lock poisoned").asks.clone()
    }

    pub fn last_update_id(&self) -> u64 {
        self.book.read().expect("order book lock poisoned").last_update_id
    }

    /// Replaces the book wholesale: initial load and post-desync recovery.
    pub fn force_snapshot(&self, mut snapshot: OrderBook) {
        snapshot.bids.truncate(self.depth);
        snapshot.asks.truncate(self.depth);
        let mut book = self.book.write().expect("order book lock poisoned");
        *book = snapshot;
    }

    /// Applies a decoded diff and atomically publishes the result.
    ///
    /// Sequence validation happens first, per `policy`; a gap or a crossed
    /// result leaves the published book untouched and tells the caller to
    /// re-snapshot. Re-applying an already-covered range is a no-op.
    pub fn apply_delta(
        &self,
        delta: &BookDelta,
        policy: SequencePolicy,
    ) -> Result<DeltaOutcome, DepthError> {
        let mut book = self.book.write().expect("order book lock poisoned");

        if policy == SequencePolicy::Range && book.last_update_id != 0 {
            if delta.last_seq <= book.last_update_id {
                return Ok(DeltaOutcome::Stale);
            }
            let expected = book.last_update_id + 1;
            if delta.first_seq > expected {
                return Err(DepthError::Gap { expected, got: delta.first_seq });
            }
        }

        let mut bids = book.bids.clone();
        let mut asks = book.asks.clone();
        let mut max_entry_seq = 0u64;

        for update in &delta.bids {
            if policy == SequencePolicy::PerEntry && update.sequence < book.last_update_id {
                continue;
            }
            max_entry_seq = max_entry_seq.max(update.sequence);
            apply_update(&mut bids, update, Side::Bids);
            bids.truncate(self.depth);
        }
        for update in &delta.asks {
            if policy == SequencePolicy::PerEntry && update.sequence < book.last_update_id {
                continue;
            }
            max_entry_seq = max_entry_seq.max(update.sequence);
            apply_update(&mut asks, update, Side::Asks);
            asks.truncate(self.depth);
        }

        if let (Some(bid), Some(ask)) = (bids.first(), asks.first()) {
            if bid.price >= ask.price {
                return Err(DepthError::Crossed { bid: bid.price, ask: ask.price });
            }
        }

        bids.truncate(self.depth);
        asks.truncate(self.depth);
        book.bids = bids;
        book.asks = asks;
        book.last_update_id = match policy {
            SequencePolicy::Range => delta.last_seq,
            SequencePolicy::PerEntry => book.last_update_id.max(max_entry_seq),
            SequencePolicy::Unsequenced => book.last_update_id.max(delta.last_seq),
        };

        Ok(DeltaOutcome::Applied)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Side {
    Bids,
    Asks,
}

fn apply_update(levels: &mut Vec<BookLevel>, update: &LevelUpdate, side: Side) {
    if update.quantity.is_zero() {
        remove_price(levels, update.price, side);
        return;
    }
    if update.republish {
        // Truncation refill: the venue re-sends a level that fell off the
        // visible window; it belongs at the tail in arrival order.
        levels.push(BookLevel::sequenced(update.price, update.quantity, update.sequence));
        return;
    }
    remove_price(levels, update.price, side);
    let at = insertion_point(levels, update.price, side);
    levels.insert(at, BookLevel::sequenced(update.price, update.quantity, update.sequence));
}

fn remove_price(levels: &mut Vec<BookLevel>, price: Decimal, side: Side) {
    let at = insertion_point(levels, price, side);
    if at < levels.len() && levels[at].price == price {
        levels.remove(at);
    }
}

/// First index whose level sorts at or after `price` for the side's order.
fn insertion_point(levels: &[BookLevel], price: Decimal, side: Side) -> usize {
    levels.partition_point(|level| match side {
        Side::Bids => level.price > price,
        Side::Asks => level.price < price,
    })
}

/// Merges a live book with a fresh snapshot after a desync.
///
/// Live levels still newer than the snapshot's sequence survive; everything
/// else comes from the snapshot. Duplicated prices are resolved by the
/// higher `update_id`, and by `prefer_other` on exact ties.
pub fn filter_and_merge(live: &OrderBook, other: &OrderBook, prefer_other: bool) -> OrderBook {
    let merge_side = |live_levels: &[BookLevel], other_levels: &[BookLevel], side: Side| {
        let mut merged: Vec<BookLevel> = Vec::with_capacity(other_levels.len());
        for level in other_levels {
            merged.push(level.clone());
        }
        for level in live_levels {
            if level.update_id <= other.last_update_id {
                continue;
            }
            let at = insertion_point(&merged, level.price, side);
            if at < merged.len() && merged[at].price == level.price {
                let incumbent = &merged[at];
                let replace = level.update_id > incumbent.update_id
                    || (level.update_id == incumbent.update_id && !prefer_other);
                if replace {
                    merged[at] = level.clone();
                }
            } else {
                merged.insert(at, level.clone());
            }
        }
        merged
    };

    OrderBook {
        bids: merge_side(&live.bids, &other.bids, Side::Bids),
        asks: merge_side(&live.asks, &other.asks, Side::Asks),
        last_update_id: live.last_update_id.max(other.last_update_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn level(price: &str, qty: &str, seq: u64) -> BookLevel {
        BookLevel::sequenced(d(price), d(qty), seq)
    }

    fn seeded_store() -> OrderBookStore {
        OrderBookStore::with_snapshot(
            OrderBook::new(
                vec![level("99", "1", 100), level("98", "2", 100)],
                vec![level("101", "1", 100), level("102", "2", 100)],
                100,
            ),
            10,
        )
    }

    #[test]
    fn contiguous_delta_applies_and_advances_sequence() {
        let store = seeded_store();
        let delta = BookDelta {
            bids: vec![LevelUpdate::new(d("99.5"), d("3"))],
            asks: vec![],
            first_seq: 101,
            last_seq: 102,
        };
        assert!(matches!(
            store.apply_delta(&delta, SequencePolicy::Range),
            Ok(DeltaOutcome::Applied)
        ));
        let book = store.read();
        assert_eq!(book.last_update_id, 102);
        assert_eq!(book.best_bid().unwrap().price, d("99.5"));
    }

    #[test]
    fn gap_is_reported_and_book_untouched() {
        // Snapshot at 100; a delta starting at 105 skipped 101..=104.
        let store = seeded_store();
        let delta = BookDelta {
            bids: vec![LevelUpdate::new(d("99.5"), d("3"))],
            asks: vec![],
            first_seq: 105,
            last_seq: 110,
        };
        match store.apply_delta(&delta, SequencePolicy::Range) {
            Err(DepthError::Gap { expected, got }) => {
                assert_eq!(expected, 101);
                assert_eq!(got, 105);
            }
            other => panic!("expected gap, got {:?}", other),
        }
        assert_eq!(store.last_update_id(), 100);
        assert_eq!(store.read().best_bid().unwrap().price, d("99"));
    }

    #[test]
    fn duplicate_delta_is_a_noop() {
        let store = seeded_store();
        let delta = BookDelta {
            bids: vec![LevelUpdate::new(d("99.5"), d("3"))],
            asks: vec![],
            first_seq: 101,
            last_seq: 102,
        };
        store.apply_delta(&delta, SequencePolicy::Range).unwrap();
        let first = store.read();
        assert!(matches!(
            store.apply_delta(&delta, SequencePolicy::Range),
            Ok(DeltaOutcome::Stale)
        ));
        assert_eq!(store.read(), first);
    }

    #[test]
    fn zero_quantity_removes_the_level() {
        let store = seeded_store();
        let delta = BookDelta {
            bids: vec![LevelUpdate::new(d("99"), d("0"))],
            asks: vec![],
            first_seq: 101,
            last_seq: 101,
        };
        store.apply_delta(&delta, SequencePolicy::Range).unwrap();
        let book = store.read();
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.best_bid().unwrap().price, d("98"));
    }

    #[test]
    fn existing_price_is_replaced_not_duplicated() {
        let store = seeded_store();
        let delta = BookDelta {
            bids: vec![LevelUpdate::new(d("99"), d("7"))],
            asks: vec![],
            first_seq: 101,
            last_seq: 101,
        };
        store.apply_delta(&delta, SequencePolicy::Range).unwrap();
        let book = store.read();
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.best_bid().unwrap().quantity, d("7"));
    }

    #[test]
    fn sides_stay_sorted_and_unique_under_random_updates() {
        let store = OrderBookStore::new(8);
        store.force_snapshot(OrderBook::new(
            vec![level("50", "1", 1)],
            vec![level("51", "1", 1)],
            1,
        ));
        let prices = ["49", "48.5", "50.5", "47", "49.9", "48.5", "46", "49"];
        let mut seq = 1u64;
        for price in prices {
            seq += 1;
            let delta = BookDelta {
                bids: vec![LevelUpdate::new(d(price), d("1"))],
                asks: vec![],
                first_seq: seq,
                last_seq: seq,
            };
            store.apply_delta(&delta, SequencePolicy::Range).unwrap();
        }
        let book = store.read();
        assert!(book.bids.len() <= 8);
        for pair in book.bids.windows(2) {
            assert!(pair[0].price > pair[1].price, "bids must strictly descend");
        }
        for pair in book.asks.windows(2) {
            assert!(pair[0].price < pair[1].price, "asks must strictly ascend");
        }
        assert!(!book.is_crossed());
    }

    #[test]
    fn depth_is_enforced() {
        let store = OrderBookStore::new(3);
        store.force_snapshot(OrderBook::new(vec![], vec![level("100", "1", 1)], 1));
        for i in 0..10 {
            let delta = BookDelta {
                bids: vec![LevelUpdate::new(d(&format!("{}", 90 - i)), d("1"))],
                asks: vec![],
                first_seq: 2 + i,
                last_seq: 2 + i,
            };
            store.apply_delta(&delta, SequencePolicy::Range).unwrap();
        }
        assert_eq!(store.read().bids.len(), 3);
    }

    #[test]
    fn crossing_update_refuses_to_publish() {
        let store = seeded_store();
        let delta = BookDelta {
            bids: vec![LevelUpdate::new(d("101.5"), d("1"))],
            asks: vec![],
            first_seq: 101,
            last_seq: 101,
        };
        assert!(matches!(
            store.apply_delta(&delta, SequencePolicy::Range),
            Err(DepthError::Crossed { .. })
        ));
        // published book still the seeded one
        assert_eq!(store.read().best_bid().unwrap().price, d("99"));
    }

    #[test]
    fn per_entry_policy_drops_stale_entries() {
        let store = seeded_store();
        let delta = BookDelta {
            bids: vec![
                LevelUpdate::sequenced(d("97"), d("5"), 90),  // stale, skipped
                LevelUpdate::sequenced(d("99.5"), d("5"), 120),
            ],
            asks: vec![],
            first_seq: 0,
            last_seq: 0,
        };
        store.apply_delta(&delta, SequencePolicy::PerEntry).unwrap();
        let book = store.read();
        assert_eq!(book.last_update_id, 120);
        assert!(book.bids.iter().all(|l| l.price != d("97")));
        assert_eq!(book.best_bid().unwrap().price, d("99.5"));
    }

    #[test]
    fn republish_entries_append_without_sorting() {
        let store = seeded_store();
        let delta = BookDelta {
            bids: vec![LevelUpdate {
                price: d("97"),
                quantity: d("4"),
                sequence: 0,
                republish: true,
            }],
            asks: vec![],
            first_seq: 101,
            last_seq: 101,
        };
        store.apply_delta(&delta, SequencePolicy::Range).unwrap();
        let book = store.read();
        assert_eq!(book.bids.last().unwrap().price, d("97"));
    }

    #[test]
    fn merge_keeps_live_levels_newer_than_snapshot() {
        let live = OrderBook::new(
            vec![level("99", "1", 205), level("98", "1", 180)],
            vec![level("101", "1", 210)],
            210,
        );
        let snapshot = OrderBook::new(
            vec![level("99", "9", 200), level("97", "3", 200)],
            vec![level("101.5", "2", 200)],
            200,
        );
        let merged = filter_and_merge(&live, &snapshot, true);
        assert_eq!(merged.last_update_id, 210);
        // 99 from live (205 > 200); 98 dropped (180 <= 200); 97 from snapshot
        let bid_prices: Vec<Decimal> = merged.bids.iter().map(|l| l.price).collect();
        assert_eq!(bid_prices, vec![d("99"), d("97")]);
        assert_eq!(merged.bids[0].quantity, d("1"));
        // asks union stays ascending
        let ask_prices: Vec<Decimal> = merged.asks.iter().map(|l| l.price).collect();
        assert_eq!(ask_prices, vec![d("101"), d("101.5")]);
    }

    #[test]
    fn merge_tie_on_update_id_follows_preference() {
        let live = OrderBook::new(vec![level("99", "1", 200)], vec![], 200);
        let snapshot = OrderBook::new(vec![level("99", "9", 200)], vec![], 100);
        // live entry (update_id 200) survives the > last_update_id filter of
        // the snapshot (100); on the price tie with equal update ids the
        // preference flag decides.
        let merged = filter_and_merge(&live, &snapshot, true);
        assert_eq!(merged.bids[0].quantity, d("9"));
        let merged = filter_and_merge(&live, &snapshot, false);
        assert_eq!(merged.bids[0].quantity, d("1"));
    }
}
