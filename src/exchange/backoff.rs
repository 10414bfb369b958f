//! Retry and reconnect pacing.
//!
//! Exponential backoff capped at 30 seconds, with jitter on the REST retry
//! path so concurrent fan-out requests don't resynchronize against a
//! rate-limited venue.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::error::Result;

/// Cap for reconnect delays (1 s, 2 s, 4 s ... 30 s).
pub const MAX_RECONNECT_DELAY_SECS: u64 = 30;

/// Retries REST operations this many times before giving up.
pub const DEFAULT_REST_RETRIES: u32 = 3;

/// Exponential reconnect delay for `attempt` (zero-based), capped.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let secs = 2_u64
        .checked_pow(attempt.min(16))
        .unwrap_or(MAX_RECONNECT_DELAY_SECS)
        .min(MAX_RECONNECT_DELAY_SECS);
    Duration::from_secs(secs)
}

/// Exponential delay with uniform jitter for REST retries.
fn retry_delay(attempt: u32) -> Duration {
    let base_ms = 250_u64.saturating_mul(2_u64.pow(attempt.min(10)));
    let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 2);
    Duration::from_millis((base_ms + jitter_ms).min(MAX_RECONNECT_DELAY_SECS * 1000))
}

/// Runs `operation`, retrying transient transport failures with jittered
/// backoff. Non-retryable errors (auth, protocol, business) pass straight
/// through.
pub async fn with_retries<T, F, Fut>(what: &str, max_retries: u32, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_retries => {
                let delay = retry_delay(attempt);
                warn!(
                    operation = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn reconnect_delay_doubles_up_to_cap() {
        assert_eq!(reconnect_delay(0), Duration::from_secs(1));
        assert_eq!(reconnect_delay(1), Duration::from_secs(2));
        assert_eq!(reconnect_delay(3), Duration::from_secs(8));
        assert_eq!(reconnect_delay(10), Duration::from_secs(30));
        assert_eq!(reconnect_delay(60), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GatewayError::Transport("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries("test", 5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::Auth("bad signature".into())) }
        })
        .await;
        assert!(matches!(result, Err(GatewayError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
