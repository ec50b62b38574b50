//! Retry logic with exponential backoff
//!
//! Two layers of retry live in this crate and both are computed here:
//!
//! - **Page-level**: within one chapter attempt, individual page fetches
//!   are retried via [`fetch_with_retry`] using [`RetryConfig`].
//! - **Queue-level**: when a whole attempt fails retriably, the
//!   dispatcher reschedules the item after [`queue_backoff`].

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Exponent cap for queue-level backoff; keeps `base * 2^n` bounded.
const QUEUE_BACKOFF_EXP_CAP: u32 = 6;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server errors, throttling)
/// should return `true`. Permanent failures (missing pages, parse
/// errors, cancellation) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        self.kind().is_retriable()
    }
}

/// Compute the delay before re-queueing an item that has failed
/// `attempt_count` times: `base * 2^min(attempt_count, cap)`.
///
/// Monotonic in the attempt count and capped, per the dispatcher's
/// retry policy.
pub fn queue_backoff(base: Duration, attempt_count: u32) -> Duration {
    let exp = attempt_count.min(QUEUE_BACKOFF_EXP_CAP);
    base.saturating_mul(1u32 << exp)
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Retry configuration (max attempts, delays, backoff multiplier, jitter)
/// * `operation` - Async closure returning `Result<T, E>` where `E: IsRetryable`
///
/// Returns the successful result or the last error after all retry
/// attempts are exhausted.
pub async fn fetch_with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay,
/// so the actual delay lands between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
