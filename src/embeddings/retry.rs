//! Exponential backoff with jitter, wrapped in a timeout per attempt
//! (spec §7: "embedding calls are retried with exponential backoff and
//! jitter; non-retryable errors propagate immediately").
//!
//! The teacher has no backoff implementation to ground this on (its
//! embedding path is a local ONNX model, never remote); the shape here
//! follows the generic retry-loop idiom used across the retrieved pack
//! (attempt counter, `rand` jitter, early-return on non-retryable error).

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::cancellation::CancellationToken;
use crate::config::RetryConfig;
use crate::error::{RagError, Result};

/// How often to poll `cancellation` while an attempt or a backoff sleep is
/// in flight. The token itself isn't async-aware, so this is the interval
/// at which an in-flight request actually notices a cancellation.
const CANCELLATION_POLL_INTERVAL: Duration = Duration::from_millis(50);

async fn wait_for_cancellation(cancellation: &CancellationToken) {
    loop {
        if cancellation.is_cancelled() {
            return;
        }
        tokio::time::sleep(CANCELLATION_POLL_INTERVAL).await;
    }
}

/// Races `operation` (wrapped in a per-attempt timeout) against
/// `cancellation`, retrying retryable failures with exponential backoff and
/// jitter. A cancellation observed at any point — mid-attempt or mid-sleep
/// — aborts immediately with `RagError::IndexingAborted`, so an in-flight
/// embedding request can be interrupted rather than only ever timing out.
pub async fn with_retry_and_timeout<F, Fut, T>(config: &RetryConfig, cancellation: &CancellationToken, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let timeout = Duration::from_millis(config.timeout_ms);

        let error = tokio::select! {
            _ = wait_for_cancellation(cancellation) => return Err(RagError::IndexingAborted),
            result = tokio::time::timeout(timeout, operation()) => match result {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => RagError::embedding(format!("timed out after {}ms", config.timeout_ms)),
            },
        };

        if !error.is_retryable() || attempt >= config.max_attempts {
            return Err(error);
        }

        let delay = backoff_delay(config, attempt);
        tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "retrying embedding call");

        tokio::select! {
            _ = wait_for_cancellation(cancellation) => return Err(RagError::IndexingAborted),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.base_delay_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let capped = exp.min(config.max_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4 + 1);
    Duration::from_millis(capped.saturating_sub(jitter / 2))
}
