//! Bounded retry with exponential back-off and jitter for extraction calls.

use std::future::Future;
use std::time::Duration;

use crate::error::ExtractorError;

const MAX_DELAY_MS: u64 = 120_000;

/// Runs `operation` up to `max_attempts` times in total, sleeping
/// `backoff_base_ms * 2^(n-1)` ms (+/-25 % jitter) before the n-th retry, or
/// the service's `Retry-After` when that is longer. Non-retryable errors are
/// returned immediately.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_attempts: u32,
    backoff_base_ms: u64,
    mut operation: F,
) -> Result<T, ExtractorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExtractorError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= max_attempts {
                    return Err(err);
                }
                let delay_ms = retry_delay_ms(&err, attempt, backoff_base_ms);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms,
                    error = %err,
                    "extraction call failed, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Delay before retry number `attempt` (1-based).
fn retry_delay_ms(err: &ExtractorError, attempt: u32, backoff_base_ms: u64) -> u64 {
    let computed = backoff_base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
    let capped = computed.min(MAX_DELAY_MS);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let jittered = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
    let floor = match err {
        ExtractorError::RateLimited { retry_after_secs } => {
            retry_after_secs.saturating_mul(1000).min(MAX_DELAY_MS)
        }
        _ => 0,
    };
    jittered.max(floor)
}
