//! Retry with exponential back-off for transient feed errors.
//!
//! Network failures, timeouts, 429 and 5xx responses are retried. Decode
//! errors and other 4xx responses are returned immediately.

use std::future::Future;
use std::time::Duration;

use crate::error::FeedError;

/// Returns `true` if `err` is a transient transport condition.
fn is_retriable(err: &FeedError) -> bool {
    match err {
        FeedError::Http(_) => true,
        FeedError::UnexpectedStatus { status, .. } => *status == 429 || *status >= 500,
        FeedError::Deserialize { .. }
        | FeedError::InvalidBaseUrl { .. }
        | FeedError::PaginationLimit { .. }
        | FeedError::Cancelled { .. } => false,
    }
}

/// Executes `operation`, retrying transient errors up to `max_retries`
/// additional times.
///
/// The wait before retry `n` (1-based) is `backoff_base_ms * 2^(n-1)`
/// milliseconds. With `max_retries = 0` the operation runs exactly once.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    backoff_base_ms: u64,
    mut operation: F,
) -> Result<T, FeedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FeedError>>,
{
    let mut attempt = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !is_retriable(&err) || attempt >= max_retries {
            return Err(err);
        }

        let delay_ms = backoff_base_ms.saturating_mul(1u64 << attempt.min(62));
        tracing::warn!(
            attempt = attempt + 1,
            max_retries,
            delay_ms,
            error = %err,
            "transient feed error, retrying after backoff"
        );
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        attempt += 1;
    }
}
