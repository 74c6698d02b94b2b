//! Bounded retry with exponential backoff for transient external failures.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;

/// Attempts including the first try.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 200;
const MAX_DELAY_MS: u64 = 2_000;

/// Retry `op` on retriable errors (see [`ServiceError::is_retriable`]),
/// doubling the delay each attempt up to a cap. Non-retriable errors and the
/// final failure surface unchanged.
///
/// [`ServiceError::is_retriable`]: crate::error::ServiceError::is_retriable
pub async fn retry_with_backoff<T, F, Fut>(
    operation: &'static str,
    max_attempts: u32,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.is_retriable() || attempt >= max_attempts {
                    return Err(error);
                }
                let delay = backoff_delay(attempt);
                debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let pow = attempt.saturating_sub(1).min(16);
    Duration::from_millis((BASE_DELAY_MS << pow).min(MAX_DELAY_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test", 3, || async {
            if calls.fetch_add(1, Ordering::Relaxed) < 2 {
                Err(ServiceError::external("stub", "503"))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn does_not_retry_validation_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff("test", 3, || async {
            calls.fetch_add(1, Ordering::Relaxed);
            Err(ServiceError::Validation("bad".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff("test", 3, || async {
            calls.fetch_add(1, Ordering::Relaxed);
            Err(ServiceError::external("stub", "unreachable"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }
}
