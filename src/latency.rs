//! Round-trip latency estimation.
//!
//! Exponentially weighted moving average with mean-deviation tracking, the
//! RFC 2988 (Jacobson/Karels) RTT estimator. One estimator per venue,
//! sampled by the facade's ping calls.

use std::sync::RwLock;
use std::time::Duration;

pub const DEFAULT_ALPHA: f64 = 0.125;
pub const DEFAULT_BETA: f64 = 0.25;
pub const DEFAULT_K: f64 = 4.0;

#[derive(Debug, Default, Clone, Copy)]
struct EwmaState {
    estimate: f64,
    variation: f64,
    primed: bool,
}

/// Thread-safe EWMA RTT estimator. Milliseconds throughout.
#[derive(Debug)]
pub struct EwmaEstimator {
    state: RwLock<EwmaState>,
    alpha: f64,
    beta: f64,
    k: f64,
}

impl EwmaEstimator {
    pub fn new(alpha: f64, beta: f64, k: f64) -> Self {
        Self { state: RwLock::new(EwmaState::default()), alpha, beta, k }
    }

    pub fn sample(&self, sample_ms: f64) {
        let mut state = self.state.write().expect("latency estimator lock poisoned");
        if !state.primed {
            state.estimate = sample_ms;
            state.primed = true;
        } else {
            state.variation = (1.0 - self.beta) * state.variation
                + self.beta * (state.estimate - sample_ms).abs();
            state.estimate = (1.0 - self.alpha) * state.estimate + self.alpha * sample_ms;
        }
    }

    /// Conservative estimate: `estimate + k * variation`.
    pub fn read_ms(&self) -> f64 {
        let state = self.state.read().expect("latency estimator lock poisoned");
        state.estimate + self.k * state.variation
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs_f64(self.read_ms().max(0.0) / 1000.0)
    }
}

impl Default for EwmaEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA, DEFAULT_BETA, DEFAULT_K)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_initializes_estimate() {
        let estimator = EwmaEstimator::default();
        estimator.sample(42.0);
        assert_eq!(estimator.read_ms(), 42.0);
    }

    #[test]
    fn constant_samples_converge_with_zero_variation() {
        let estimator = EwmaEstimator::default();
        for _ in 0..100 {
            estimator.sample(10.0);
        }
        assert!((estimator.read_ms() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn read_is_at_least_estimate() {
        let estimator = EwmaEstimator::default();
        for sample in [10.0, 30.0, 5.0, 25.0, 12.0] {
            estimator.sample(sample);
            let state = estimator.state.read().unwrap();
            assert!(estimator.read_ms() >= state.estimate);
        }
    }

    #[test]
    fn variation_responds_to_jitter() {
        let estimator = EwmaEstimator::default();
        estimator.sample(10.0);
        estimator.sample(50.0);
        // variation = 0.25 * |10 - 50| = 10; estimate = 0.875*10 + 0.125*50 = 15
        assert!((estimator.read_ms() - (15.0 + 4.0 * 10.0)).abs() < 1e-9);
    }
}
