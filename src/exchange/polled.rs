//! REST-polled spread feed.
//!
//! For venues without a dedicated spread stream: a periodic sampler task
//! calls the venue's ticker endpoint for every registered pair and pushes
//! the result into that pair's ring buffer. Registration is synchronous
//! map insertion; the sampler picks new pairs up on its next tick.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::exchange::SpreadRecorder;
use crate::market::SpreadRingBuffer;
use crate::types::{AssetPair, Spread};

pub const DEFAULT_CAPACITY: usize = 200;
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(200);

type Buffers = Arc<RwLock<HashMap<AssetPair, Arc<SpreadRingBuffer>>>>;

pub struct PolledSpreadRecorder {
    buffers: Buffers,
    capacity: usize,
}

impl PolledSpreadRecorder {
    /// Starts the sampler task and returns the recorder handle.
    ///
    /// `fetch` performs one ticker call; failures are logged and the pair is
    /// retried on the next tick.
    pub fn spawn<F, Fut>(
        pairs: &[AssetPair],
        capacity: usize,
        period: Duration,
        fetch: F,
        shutdown: CancellationToken,
    ) -> Self
    where
        F: Fn(AssetPair) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Spread>> + Send,
    {
        let buffers: Buffers = Arc::new(RwLock::new(
            pairs
                .iter()
                .map(|&pair| (pair, Arc::new(SpreadRingBuffer::new(capacity))))
                .collect(),
        ));

        let task_buffers = Arc::clone(&buffers);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("spread sampler stopping");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let pairs: Vec<AssetPair> = {
                    let map = task_buffers.read().expect("spread buffers lock poisoned");
                    map.keys().copied().collect()
                };
                for pair in pairs {
                    match fetch(pair).await {
                        Ok(spread) => {
                            let buffer = {
                                let map = task_buffers
                                    .read()
                                    .expect("spread buffers lock poisoned");
                                map.get(&pair).cloned()
                            };
                            if let Some(buffer) = buffer {
                                buffer.push(spread);
                            }
                        }
                        Err(err) => {
                            warn!(?pair, error = %err, "spread poll failed, will retry next tick");
                        }
                    }
                }
            }
        });

        Self { buffers, capacity }
    }

    pub fn set_capacity(&self, capacity: usize) {
        let map = self.buffers.read().expect("spread buffers lock poisoned");
        for buffer in map.values() {
            buffer.set_capacity(capacity);
        }
    }
}

#[async_trait]
impl SpreadRecorder for PolledSpreadRecorder {
    fn historical_spreads(&self, pair: AssetPair) -> Option<Vec<Spread>> {
        let map = self.buffers.read().expect("spread buffers lock poisoned");
        map.get(&pair).map(|buffer| buffer.snapshot())
    }

    fn current_spread(&self, pair: AssetPair) -> Option<Spread> {
        let map = self.buffers.read().expect("spread buffers lock poisoned");
        map.get(&pair).and_then(|buffer| buffer.back())
    }

    async fn register_asset_pair(&self, pair: AssetPair) -> Result<()> {
        let mut map = self.buffers.write().expect("spread buffers lock poisoned");
        map.entry(pair)
            .or_insert_with(|| Arc::new(SpreadRingBuffer::new(self.capacity)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn spread(bid: i64) -> Spread {
        Spread {
            bid: Decimal::from(bid),
            ask: Decimal::from(bid + 1),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sampler_records_into_registered_buffers() {
        let shutdown = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let fetch_counter = Arc::clone(&counter);
        let recorder = PolledSpreadRecorder::spawn(
            &[AssetPair(0)],
            16,
            Duration::from_millis(5),
            move |_pair| {
                let n = fetch_counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(spread(n as i64)) }
            },
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown.cancel();

        let history = recorder.historical_spreads(AssetPair(0)).unwrap();
        assert!(!history.is_empty());
        assert_eq!(recorder.current_spread(AssetPair(0)).unwrap().bid, history.last().unwrap().bid);
        assert!(recorder.historical_spreads(AssetPair(9)).is_none());
    }

    #[tokio::test]
    async fn late_registration_is_picked_up() {
        let shutdown = CancellationToken::new();
        let recorder = PolledSpreadRecorder::spawn(
            &[],
            16,
            Duration::from_millis(5),
            |_pair| async { Ok(spread(7)) },
            shutdown.clone(),
        );

        assert!(recorder.historical_spreads(AssetPair(2)).is_none());
        recorder.register_asset_pair(AssetPair(2)).await.unwrap();
        assert_eq!(recorder.historical_spreads(AssetPair(2)).unwrap().len(), 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        shutdown.cancel();
        assert!(!recorder.historical_spreads(AssetPair(2)).unwrap().is_empty());
    }
}
