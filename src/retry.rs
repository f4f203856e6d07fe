//! Exponential backoff with jitter for `BackendTransient` errors (§5 "Retries", §7). Reuses the
//! teacher's `fastrand` dependency, repurposed from O(1) random eviction to jitter (DESIGN.md).

use std::time::Duration;

use tracing::warn;

use crate::error::{CacheError, Result};

/// Retries `f` up to `max_retries` additional times while it returns `CacheError::BackendTransient`,
/// doubling `retry_backoff_base_ms` each attempt and adding up to 50% jitter. Once retries are
/// exhausted, a still-transient failure is converted to `CacheError::BackendUnavailable` (§7:
/// "L2 or vectorizer unreachable after retries") rather than surfacing the raw transient error.
/// Any other error is returned as-is, without retrying.
pub async fn with_retry<F, Fut, T>(max_retries: u32, retry_backoff_base_ms: u64, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(CacheError::BackendTransient(msg)) if attempt < max_retries => {
                let backoff_ms = retry_backoff_base_ms.saturating_mul(1u64 << attempt);
                let jitter_ms = (backoff_ms as f64 * fastrand::f64() * 0.5) as u64;
                let delay = Duration::from_millis(backoff_ms + jitter_ms);
                warn!(attempt, backoff_ms, "retrying after transient backend error: {msg}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(CacheError::BackendTransient(msg)) => {
                warn!(attempt, "exhausted retries, surfacing as backend unavailable: {msg}");
                return Err(CacheError::BackendUnavailable(msg));
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_ok() {
        let calls = AtomicU32::new(0);
        let result = with_retry(3, 1, || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Ok::<_, CacheError>(42) }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(5, 1, || {
            let n = calls.fetch_add(1, Ordering::Relaxed);
            async move {
                if n < 2 {
                    Err(CacheError::BackendTransient("try again".to_string()))
                } else {
                    Ok(99)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 99);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries_and_surfaces_as_backend_unavailable() {
        let err = with_retry(2, 1, || async {
            Err::<i32, _>(CacheError::BackendTransient("nope".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CacheError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_retry(5, 1, || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err::<i32, _>(CacheError::InvalidArgument("bad".to_string())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
