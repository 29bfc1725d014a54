//! # Retry, Circuit Breaking and the Combined Call Path
//!
//! [`call_with_resilience`] is the single entry point used by service
//! clients: cache lookup first, then the operation under retry with every
//! attempt gated by the dependency's circuit breaker, then cache write-back.

pub mod backoff;
pub mod circuit_breaker;
pub mod retry;
pub mod timeout;

pub use backoff::RetryPolicy;
pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use retry::{execute, RetryExecutor};
pub use timeout::with_timeout;

use crate::cache::{CacheStore, EntryMetadata};
use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Run `operation` with caching, circuit breaking and retry.
///
/// - With `cache` set to `Some((store, key))`, a cached value is returned
///   without calling anything. A cached payload that does not deserialize as
///   `T` counts as a miss.
/// - Otherwise the operation runs under `policy`, each attempt gated by and
///   reported to `breaker`.
/// - A successful result is written back under `key` with `ttl` (the store
///   default when `None`). A failed write-back is logged, not returned.
///
/// Callers see the value, [`CircuitOpenError`], [`RetryExhaustedError`]
/// wrapping the last failure, or a non-retryable error from the operation.
///
/// [`CircuitOpenError`]: crate::ResilienceError::CircuitOpenError
/// [`RetryExhaustedError`]: crate::ResilienceError::RetryExhaustedError
pub async fn call_with_resilience<T, F, Fut>(
    operation: F,
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    cache: Option<(&CacheStore, &str)>,
    ttl: Option<Duration>,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if let Some((store, key)) = cache {
        if let Some(cached) = store.retrieve_json::<T>(key).await {
            debug!(service = breaker.name(), key, "Serving cached result");
            return Ok(cached);
        }
    }

    let value = RetryExecutor::new(policy.clone())
        .execute_with_breaker(breaker, operation)
        .await?;

    if let Some((store, key)) = cache {
        let metadata = EntryMetadata::new().with("service", breaker.name());
        if let Err(e) = store.store_json(key, &value, ttl, Some(metadata)).await {
            warn!(service = breaker.name(), key, "Failed to cache result: {}", e);
        }
    }

    Ok(value)
}
