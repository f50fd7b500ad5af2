//! Retry logic.
//!
//! # Responsibilities
//! - Re-run idempotent backend reads (L1 fee, nonce, quotes) on transient failure
//! - Space attempts with exponential backoff + jitter
//!
//! # Design Decisions
//! - Callers decide which errors are retryable
//! - Never used around signing or broadcast

use std::fmt::Display;
use std::future::Future;

use crate::config::schema::RetryConfig;
use crate::resilience::backoff::calculate_backoff;

/// Run `call` until it succeeds, the error is not retryable, or attempts run out.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    config: &RetryConfig,
    op: &'static str,
    mut call: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = if config.enabled {
        config.max_attempts.max(1)
    } else {
        1
    };
    let mut attempt = 0;

    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                let delay = calculate_backoff(attempt, config.base_delay_ms, config.max_delay_ms);
                tracing::debug!(
                    op,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if attempt > 1 {
                    tracing::warn!(op, attempts = attempt, error = %e, "Giving up after retries");
                }
                return Err(e);
            }
        }
    }
}
