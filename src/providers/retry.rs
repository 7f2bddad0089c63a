use crate::{config::RetryPolicy, error::Result};
use std::future::Future;

/// Runs `op` until it succeeds or `policy.max_attempts` attempts have been
/// made, sleeping `base * 2^(attempt-1)` between attempts. Errors that are
/// not retryable are returned immediately; otherwise the last error wins.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt >= max_attempts => {
                if attempt > 1 || max_attempts > 1 {
                    log::warn!(
                        "{} failed (attempt {}/{}), giving up: {}",
                        label,
                        attempt,
                        max_attempts,
                        e
                    );
                }
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                log::warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    label,
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
