//! Error types for cache, retry, circuit breaker and lifecycle operations
//!
//! Every component in this crate reports failures through [`ResilienceError`].
//! The variants double as the retry classification: see
//! [`ResilienceError::is_retryable`].

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for resilience operations
#[derive(Error, Debug)]
pub enum ResilienceError {
    /// Disk tier failure - exhaustion, permission denial, failed write or rename
    #[error("Storage error during {operation} at {}: {source}", .path.display())]
    StorageError {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Entry cannot be stored within the configured capacity
    #[error("Storage capacity exceeded: entry of {entry_bytes} bytes, limit {max_bytes} bytes")]
    CapacityError { entry_bytes: u64, max_bytes: u64 },

    /// All retry attempts failed; `source` is the last underlying failure
    #[error("Retries exhausted after {attempts} attempt(s): {source}")]
    RetryExhaustedError {
        attempts: u32,
        #[source]
        source: Box<ResilienceError>,
    },

    /// Call rejected by an open circuit breaker without running the operation
    #[error("Circuit breaker is open for {service}")]
    CircuitOpenError { service: String },

    /// Operation or cancellation exceeded its time bound
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    TimeoutError { timeout_ms: u64, context: String },

    /// Caller input defect - never retried
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Network or transport failure talking to a remote service
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Remote service reported it is temporarily unable to serve
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Invalid credentials or permissions on the remote service
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Resource manager or client already closed
    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

/// Result type alias for resilience operations
pub type Result<T> = std::result::Result<T, ResilienceError>;

impl ResilienceError {
    /// Build a storage error from an I/O failure on `path`
    pub fn storage(operation: &str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ResilienceError::StorageError {
            operation: operation.to_string(),
            path: path.into(),
            source,
        }
    }

    /// Whether a failed attempt may succeed if repeated.
    ///
    /// Transient remote conditions are retryable. Caller defects, credential
    /// problems, local storage failures and open circuits are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResilienceError::ConnectionError(_)
                | ResilienceError::ServiceUnavailable(_)
                | ResilienceError::TimeoutError { .. }
        )
    }

    /// Whether this error means the remote dependency itself is unhealthy.
    ///
    /// Circuit breakers count only these as failures.
    pub fn indicates_unhealthy_dependency(&self) -> bool {
        self.is_retryable()
    }

    /// The innermost cause when this error wraps another `ResilienceError`
    pub fn root_cause(&self) -> &ResilienceError {
        match self {
            ResilienceError::RetryExhaustedError { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for ResilienceError {
    fn from(e: serde_json::Error) -> Self {
        ResilienceError::SerializationError(e.to_string())
    }
}
