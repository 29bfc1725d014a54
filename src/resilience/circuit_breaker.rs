//! # Circuit Breaker
//!
//! Fault isolation for one remote dependency. Three states:
//! Closed (normal operation), Open (failing fast) and Half-Open (a single
//! trial call probes whether the dependency recovered).
//!
//! All state lives behind one `std::sync::Mutex` that is never held across an
//! `.await`, so the breaker is usable from plain threads as well as tasks.

use crate::error::{ResilienceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - exactly one trial call is allowed through
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Time the circuit stays open before a trial call is allowed
    pub cooldown_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_duration: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_state_change: DateTime<Utc>,
    pub trial_in_flight: bool,
    /// Calls admitted through the breaker
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    /// Calls turned away while open or during a trial
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    /// Monotonic clock for the cooldown
    changed_at: Instant,
    /// Wall clock for reporting
    last_state_change: DateTime<Utc>,
    trial_in_flight: bool,
    total_calls: u64,
    successes: u64,
    failures: u64,
    rejected_calls: u64,
}

/// Circuit breaker guarding one named remote dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Dependency name for logging and errors
    name: String,

    /// Configuration parameters
    config: CircuitBreakerConfig,

    /// Mutable state, changed only through `transition` and the record paths
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            cooldown_ms = config.cooldown_duration.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                changed_at: Instant::now(),
                last_state_change: Utc::now(),
                trial_in_flight: false,
                total_calls: 0,
                successes: 0,
                failures: 0,
                rejected_calls: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current circuit state
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Consecutive failures counted so far
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_state_change: inner.last_state_change,
            trial_in_flight: inner.trial_in_flight,
            total_calls: inner.total_calls,
            successes: inner.successes,
            failures: inner.failures,
            rejected_calls: inner.rejected_calls,
        }
    }

    /// Ask permission to make one call.
    ///
    /// Fails with [`ResilienceError::CircuitOpenError`] while open, or while
    /// half-open with the trial call already in flight.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>> {
        let mut inner = self.lock();

        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                if inner.changed_at.elapsed() < self.config.cooldown_duration {
                    inner.rejected_calls += 1;
                    return Err(self.open_error());
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    debug!(component = %self.name, "Rejecting call while trial is in flight");
                    inner.rejected_calls += 1;
                    return Err(self.open_error());
                }
                inner.trial_in_flight = true;
                true
            }
        };
        inner.total_calls += 1;

        Ok(CallPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.try_acquire()?;
        let result = operation().await;
        permit.record(&result);
        result
    }

    /// Force the circuit open, restarting the cooldown
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.trial_in_flight = false;
        if inner.state == CircuitState::Open {
            inner.changed_at = Instant::now();
            inner.last_state_change = Utc::now();
        } else {
            self.transition(&mut inner, CircuitState::Open);
        }
        warn!(component = %self.name, "Circuit breaker forced open");
    }

    /// Return to closed with a zero failure count
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.trial_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed);
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        inner.successes += 1;
        match inner.state {
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                inner.failure_count = 0;
                self.transition(&mut inner, CircuitState::Closed);
            }
            CircuitState::Closed => inner.failure_count = 0,
            // Call admitted before the circuit opened; the trial decides
            _ => debug!(component = %self.name, state = %inner.state, "Ignoring late success"),
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        inner.failures += 1;
        match inner.state {
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                warn!(component = %self.name, "Trial call failed");
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                debug!(
                    component = %self.name,
                    failure_count = inner.failure_count,
                    failure_threshold = self.config.failure_threshold,
                    "Operation failed"
                );
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            _ => debug!(component = %self.name, state = %inner.state, "Ignoring late failure"),
        }
    }

    fn on_abandoned(&self, trial: bool) {
        if !trial {
            return;
        }
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
            warn!(component = %self.name, "Trial call dropped without an outcome");
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    /// The single place where the state changes
    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }

        inner.state = to;
        inner.changed_at = Instant::now();
        inner.last_state_change = Utc::now();

        match to {
            CircuitState::Open => warn!(
                component = %self.name,
                from = %from,
                failure_count = inner.failure_count,
                cooldown_ms = self.config.cooldown_duration.as_millis() as u64,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => info!(
                component = %self.name,
                from = %from,
                "Circuit breaker half-open, allowing trial call"
            ),
            CircuitState::Closed => info!(
                component = %self.name,
                from = %from,
                "Circuit breaker closed"
            ),
        }
    }

    fn open_error(&self) -> ResilienceError {
        ResilienceError::CircuitOpenError {
            service: self.name.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Permission to make one call through a [`CircuitBreaker`].
///
/// Report the outcome with one of the `record*` methods. Dropping a permit
/// without an outcome counts as an abandoned call: an abandoned trial call
/// re-opens the circuit.
#[must_use = "a permit must record the call outcome"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this permit is the half-open trial call
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    /// Record a call result. Only errors that indicate an unhealthy
    /// dependency count as failures; any other answer is a success.
    pub fn record<T>(self, result: &Result<T>) {
        match result {
            Err(e) if e.indicates_unhealthy_dependency() => self.record_failure(),
            _ => self.record_success(),
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandoned(self.trial);
        }
    }
}
