//! Generic business-level retry helper: `(fn, maxAttempts, baseDelay, name)
//! -> {ok, result|error}`. Distinct from [`crate::store::with_retry`], which
//! only retries raw SQLite lock contention. This operates on business
//! outcomes like OCR-result persistence and webhook delivery.

use std::future::Future;
use std::time::Duration;

/// Retry an async operation up to `max_attempts` times with exponential
/// backoff starting at `base_delay`, logging each retry under `name`.
/// Returns the last error if every attempt fails.
pub async fn with_backoff<T, E, F, Fut>(
    name: &str,
    max_attempts: u32,
    base_delay: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = base_delay;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts => {
                tracing::debug!(
                    "{name}: attempt {attempt}/{max_attempts} failed ({err}), retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => {
                tracing::warn!("{name}: all {max_attempts} attempts failed ({err})");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff(
            "test",
            3,
            Duration::from_millis(1),
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            },
        )
        .await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let result: Result<u32, &str> =
            with_backoff("test", 2, Duration::from_millis(1), || async { Err("nope") }).await;
        assert_eq!(result, Err("nope"));
    }
}
