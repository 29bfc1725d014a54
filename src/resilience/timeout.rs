//! Per-attempt timeout layer

use crate::error::{ResilienceError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run `future`, failing with [`ResilienceError::TimeoutError`] if it does
/// not finish within `duration`. The future is dropped on timeout.
pub async fn with_timeout<T, F>(duration: Duration, context: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(context, timeout_ms = duration.as_millis() as u64, "Operation timed out");
            Err(ResilienceError::TimeoutError {
                timeout_ms: duration.as_millis() as u64,
                context: context.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_bound() {
        let result = with_timeout(Duration::from_millis(100), "fast", async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_elapsed_is_timeout_error() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), "slow ocr", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        match result {
            Err(ResilienceError::TimeoutError { timeout_ms, context }) => {
                assert_eq!(timeout_ms, 10);
                assert_eq!(context, "slow ocr");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
