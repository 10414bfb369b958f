//! Bounded spread history per venue/symbol stream.
//!
//! A fixed-capacity ring: pushing at capacity evicts the oldest entry.
//! Writers are the per-symbol mailbox drainers; readers are facade queries,
//! which take copies so no lock is held across caller code.

use chrono::Duration as ChronoDuration;
use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::Duration;
use tracing::warn;

use crate::types::Spread;

#[derive(Debug)]
struct Ring {
    entries: VecDeque<Spread>,
    capacity: usize,
}

#[derive(Debug)]
pub struct SpreadRingBuffer {
    inner: RwLock<Ring>,
}

impl SpreadRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Ring {
                entries: VecDeque::with_capacity(capacity),
                capacity,
            }),
        }
    }

    /// Appends, evicting the oldest entry when full.
    pub fn push(&self, spread: Spread) {
        let mut ring = self.inner.write().expect("spread ring lock poisoned");
        if ring.entries.len() == ring.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(spread);
    }

    /// Independent copy of the whole history, oldest first.
    pub fn snapshot(&self) -> Vec<Spread> {
        let ring = self.inner.read().expect("spread ring lock poisoned");
        ring.entries.iter().cloned().collect()
    }

    /// Most recent entry, if any.
    pub fn back(&self) -> Option<Spread> {
        let ring = self.inner.read().expect("spread ring lock poisoned");
        ring.entries.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("spread ring lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-bounds the ring, evicting from the front if shrinking.
    pub fn set_capacity(&self, capacity: usize) {
        let mut ring = self.inner.write().expect("spread ring lock poisoned");
        while ring.entries.len() > capacity {
            ring.entries.pop_front();
        }
        ring.capacity = capacity;
    }
}

/// Regularly spaced sample of `history` covering `window` backward from the
/// most recent entry.
///
/// Each sample timestamp is answered by the most recent entry at or before
/// it. When the buffer does not reach back far enough the spacing is
/// clamped to the available range. Returns exactly `n_samples` spreads for
/// non-empty input, or nothing when `n_samples` or `window` is zero.
pub fn sample_spreads(history: &[Spread], window: Duration, n_samples: usize) -> Vec<Spread> {
    if n_samples == 0 || window.is_zero() || history.is_empty() {
        return Vec::new();
    }

    let newest = history[history.len() - 1].timestamp;
    let oldest = history[0].timestamp;

    let mut period = ChronoDuration::nanoseconds((window.as_nanos() as i64) / n_samples as i64);
    let span_back = period * (n_samples as i32 - 1);
    if newest - span_back < oldest {
        warn!("requested window exceeds recorded history, clamping to available range");
        period = ChronoDuration::nanoseconds((newest - oldest).num_nanoseconds().unwrap_or(0)
            / n_samples as i64);
    }

    let targets: Vec<_> = (0..n_samples)
        .map(|i| newest - period * (n_samples - 1 - i) as i32)
        .collect();

    // Both sequences are timestamp-sorted, so one linear pass suffices.
    let mut samples = Vec::with_capacity(n_samples);
    let mut target_index = 0;
    for (i, spread) in history.iter().enumerate() {
        while target_index < targets.len()
            && targets[target_index] >= spread.timestamp
            && (i + 1 >= history.len() || targets[target_index] < history[i + 1].timestamp)
        {
            let mut sampled = spread.clone();
            sampled.timestamp = targets[target_index];
            samples.push(sampled);
            target_index += 1;
        }
        if target_index == targets.len() {
            break;
        }
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn spread(bid: i64, at_secs: i64) -> Spread {
        Spread {
            bid: Decimal::from(bid),
            ask: Decimal::from(bid + 1),
            timestamp: Utc.timestamp_opt(at_secs, 0).unwrap(),
        }
    }

    #[test]
    fn push_evicts_oldest_at_capacity() {
        let ring = SpreadRingBuffer::new(3);
        for (bid, at) in [(1, 0), (2, 1), (3, 2), (4, 3)] {
            ring.push(spread(bid, at));
        }
        let contents = ring.snapshot();
        let bids: Vec<Decimal> = contents.iter().map(|s| s.bid).collect();
        let expected: Vec<Decimal> = [2, 3, 4].into_iter().map(Decimal::from).collect();
        assert_eq!(bids, expected);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn contents_equal_last_capacity_pushes_in_order() {
        let ring = SpreadRingBuffer::new(5);
        for i in 0..37 {
            ring.push(spread(i, i));
        }
        let bids: Vec<Decimal> = ring.snapshot().iter().map(|s| s.bid).collect();
        let expected: Vec<Decimal> = (32..=36).map(Decimal::from).collect();
        assert_eq!(bids, expected);
    }

    #[test]
    fn back_returns_most_recent() {
        let ring = SpreadRingBuffer::new(2);
        assert!(ring.back().is_none());
        ring.push(spread(1, 0));
        ring.push(spread(2, 1));
        assert_eq!(ring.back().unwrap().bid, Decimal::from(2));
    }

    #[test]
    fn shrinking_capacity_evicts_from_front() {
        let ring = SpreadRingBuffer::new(4);
        for i in 0..4 {
            ring.push(spread(i, i));
        }
        ring.set_capacity(2);
        let bids: Vec<Decimal> = ring.snapshot().iter().map(|s| s.bid).collect();
        let expected: Vec<Decimal> = [2, 3].into_iter().map(Decimal::from).collect();
        assert_eq!(bids, expected);
    }

    #[test]
    fn sampling_degenerate_requests_are_empty() {
        let history = vec![spread(1, 0), spread(2, 1)];
        assert!(sample_spreads(&history, Duration::ZERO, 5).is_empty());
        assert!(sample_spreads(&history, Duration::from_secs(10), 0).is_empty());
        assert!(sample_spreads(&[], Duration::from_secs(10), 5).is_empty());
    }

    #[test]
    fn sampling_returns_exactly_n_monotonic_samples() {
        let history: Vec<Spread> = (0..50).map(|i| spread(i, i)).collect();
        let samples = sample_spreads(&history, Duration::from_secs(20), 10);
        assert_eq!(samples.len(), 10);
        for window in samples.windows(2) {
            assert!(window[0].timestamp < window[1].timestamp);
        }
        assert_eq!(samples.last().unwrap().timestamp, history.last().unwrap().timestamp);
    }

    #[test]
    fn each_sample_is_most_recent_at_or_before_target() {
        let history: Vec<Spread> = (0..10).map(|i| spread(i, i * 2)).collect();
        let samples = sample_spreads(&history, Duration::from_secs(9), 3);
        assert_eq!(samples.len(), 3);
        for sample in &samples {
            let source = history
                .iter()
                .rev()
                .find(|s| s.timestamp <= sample.timestamp)
                .unwrap();
            assert_eq!(sample.bid, source.bid);
            assert_eq!(sample.ask, source.ask);
        }
    }

    #[test]
    fn window_longer_than_history_clamps_to_available_range() {
        // Entries at t = 0..4 s; asking for 10 s of history across 5 samples
        // must clamp and still land on the recorded timestamps.
        let history: Vec<Spread> = (0..5).map(|i| spread(i, i)).collect();
        let samples = sample_spreads(&history, Duration::from_secs(10), 5);
        assert_eq!(samples.len(), 5);
        let offsets: Vec<i64> = samples
            .iter()
            .map(|s| (s.timestamp - history[0].timestamp).num_milliseconds())
            .collect();
        // period clamps to (4s - 0s) / 5 = 800ms, ending at the newest entry
        assert_eq!(offsets, vec![800, 1600, 2400, 3200, 4000]);
        // ...and the picked entries are exactly the five recorded ones
        let bids: Vec<Decimal> = samples.iter().map(|s| s.bid).collect();
        let expected: Vec<Decimal> = (0..5).map(Decimal::from).collect();
        assert_eq!(bids, expected);
    }
}
