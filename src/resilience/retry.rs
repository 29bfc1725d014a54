//! Bounded retry with exponential backoff

use crate::error::{ResilienceError, Result};
use crate::resilience::backoff::RetryPolicy;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::timeout::with_timeout;
use std::future::Future;
use tracing::{debug, info, warn};

/// Runs a fallible operation under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call `operation` until it succeeds, fails with a non-retryable error,
    /// or the policy's retries are used up.
    ///
    /// Exhaustion yields [`ResilienceError::RetryExhaustedError`] carrying the
    /// last failure as its source.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(None, operation).await
    }

    /// Like [`execute`](Self::execute), with every attempt gated by `breaker`
    /// and reported to it as a separate outcome. An open circuit ends the
    /// loop immediately with [`ResilienceError::CircuitOpenError`].
    pub async fn execute_with_breaker<T, F, Fut>(&self, breaker: &CircuitBreaker, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(Some(breaker), operation).await
    }

    async fn run<T, F, Fut>(&self, breaker: Option<&CircuitBreaker>, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let error = match self.attempt(breaker, &mut operation, attempts).await {
                Ok(value) => {
                    if attempts > 1 {
                        info!("Operation succeeded on attempt {}/{}", attempts, max_attempts);
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                debug!(attempt = attempts, "Non-retryable failure: {}", error);
                return Err(error);
            }

            if attempts >= max_attempts {
                warn!(attempts, "Retries exhausted, last error: {}", error);
                return Err(ResilienceError::RetryExhaustedError {
                    attempts,
                    source: Box::new(error),
                });
            }

            let delay = self.policy.backoff_for(attempts - 1);
            warn!(
                "Attempt {}/{} failed, retrying after {:?}: {}",
                attempts, max_attempts, delay, error
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt<T, F, Fut>(&self, breaker: Option<&CircuitBreaker>, operation: &mut F, attempt: u32) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = match breaker {
            Some(breaker) => Some(breaker.try_acquire()?),
            None => None,
        };

        let result = match self.policy.attempt_timeout {
            Some(limit) => with_timeout(limit, &format!("attempt {}", attempt), operation()).await,
            None => operation().await,
        };

        if let Some(permit) = permit {
            permit.record(&result);
        }
        result
    }
}

/// Run `operation` under `policy` without a breaker
pub async fn execute<T, F, Fut>(operation: F, policy: &RetryPolicy) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryExecutor::new(policy.clone()).execute(operation).await
}
