//! Retry with exponential back-off and jitter for platform API calls.

use std::future::Future;
use std::time::Duration;

use crate::error::CollectorError;

const MAX_DELAY_MS: u64 = 60_000;

/// Returns `true` for errors that are worth retrying after a back-off delay.
///
/// Retriable: 429, 5xx, and network-level failures (timeout, connect).
/// Everything else (4xx, API errors, malformed bodies, configuration) is
/// returned immediately.
pub(crate) fn is_retriable(err: &CollectorError) -> bool {
    match err {
        CollectorError::RateLimited { .. } => true,
        CollectorError::Http(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        CollectorError::UnexpectedStatus { status, .. } => *status >= 500,
        CollectorError::Deserialize { .. }
        | CollectorError::Api { .. }
        | CollectorError::MissingCredential { .. }
        | CollectorError::PaginationLimit { .. }
        | CollectorError::InvalidBaseUrl { .. } => false,
    }
}

/// Runs `operation` with up to `max_retries` additional attempts on transient
/// errors. The n-th retry waits `backoff_base_ms * 2^(n-1)` ms, +/-25 % jitter,
/// capped at 60 s, or the platform's `Retry-After` when that is longer.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    backoff_base_ms: u64,
    mut operation: F,
) -> Result<T, CollectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollectorError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                let delay_ms = retry_delay_ms(&err, attempt, backoff_base_ms);
                tracing::warn!(
                    attempt,
                    max_retries,
                    delay_ms,
                    error = %err,
                    "transient platform error, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

/// Delay before retry number `attempt` (1-based).
fn retry_delay_ms(err: &CollectorError, attempt: u32, backoff_base_ms: u64) -> u64 {
    let computed = backoff_base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
    let capped = computed.min(MAX_DELAY_MS);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let jittered = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
    let floor = match err {
        CollectorError::RateLimited {
            retry_after_secs, ..
        } => retry_after_secs.saturating_mul(1000).min(MAX_DELAY_MS),
        _ => 0,
    };
    jittered.max(floor)
}
