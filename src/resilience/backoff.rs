//! Retry policy and exponential backoff with jitter

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable retry configuration, passed per call or per client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt)
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Upper bound on any single delay, jitter included
    pub max_backoff: Duration,

    /// Growth factor applied per attempt
    pub backoff_multiplier: f64,

    /// Jitter factor (0.0 - 1.0) as a fraction of the computed delay
    pub jitter: f64,

    /// Bound on each individual attempt; elapsed attempts are retryable
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.1,
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), String> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be a finite value >= 1.0".to_string());
        }

        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("jitter must be between 0.0 and 1.0".to_string());
        }

        if self.initial_backoff > self.max_backoff {
            return Err("initial_backoff must not exceed max_backoff".to_string());
        }

        if matches!(self.attempt_timeout, Some(t) if t.is_zero()) {
            return Err("attempt_timeout must be greater than 0".to_string());
        }

        Ok(())
    }

    /// `min(initial_backoff * multiplier^attempt, max_backoff)` without jitter.
    ///
    /// `attempt` is zero-based: the delay before the first retry uses 0.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let initial = self.initial_backoff.as_secs_f64();
        let max = self.max_backoff.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = initial * self.backoff_multiplier.powi(exponent);

        if !delay.is_finite() || delay >= max {
            return self.max_backoff;
        }
        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Delay before retry number `attempt + 1`, jitter applied and clamped
    /// to `[0, max_backoff]`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        // Unvalidated policies may carry NaN or infinite jitter
        if !self.jitter.is_finite() || self.jitter <= 0.0 || base.is_zero() {
            return base;
        }

        let base_secs = base.as_secs_f64();
        let jitter_range = base_secs * self.jitter.min(1.0);
        let offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        let jittered = (base_secs + offset).clamp(0.0, self.max_backoff.as_secs_f64());

        Duration::from_secs_f64(jittered)
    }
}
