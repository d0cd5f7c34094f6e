// Bounded retry for transient store errors (lock contention, busy database)

use crate::error::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Attempts per operation, including the first
pub const TRANSIENT_MAX_ATTEMPTS: u32 = 3;

/// Base delay before the first retry
pub const TRANSIENT_BASE_DELAY: Duration = Duration::from_millis(50);

/// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), +/-50% jitter
pub fn jittered_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.as_millis() as f64 * 2f64.powi(attempt.saturating_sub(1) as i32);
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_millis((exp * factor) as u64)
}

/// Run `op` until it succeeds, fails with a non-transient error, or
/// `TRANSIENT_MAX_ATTEMPTS` is reached.
pub async fn retry_transient<T, F, Fut>(operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < TRANSIENT_MAX_ATTEMPTS => {
                let delay = jittered_delay(TRANSIENT_BASE_DELAY, attempt);
                warn!(
                    operation = operation,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient store error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_transient("claim", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::TransientStore("database is locked".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = retry_transient("claim", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::TransientStore("database is locked".into()))
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), TRANSIENT_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = retry_transient("enqueue", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Validation("queue_name is required".into()))
        })
        .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_jittered_delay_bounds() {
        for attempt in 1..=3 {
            let delay = jittered_delay(Duration::from_millis(100), attempt);
            let nominal = 100 * 2u64.pow(attempt - 1);
            assert!(delay.as_millis() as u64 >= nominal / 2);
            assert!((delay.as_millis() as u64) < nominal * 3 / 2);
        }
    }
}
