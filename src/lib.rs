//! # Ouroboros Resilience (ouroboros-resilience)
//!
//! Local caching and fault-tolerance layer for calls to external AI services
//! (scene detection, transcription, OCR, vector search).
//!
//! ## Features
//!
//! - Hybrid memory + disk cache with TTL expiry and size-bounded eviction
//! - Atomic, restart-safe on-disk entries
//! - Exponential-backoff retry with retryable/fatal error classification
//! - Per-dependency circuit breakers with single-probe half-open recovery
//! - Lifecycle management of client tasks and network sessions
//! - Async-first design using tokio
//!
//! ## Cache
//!
//! ```no_run
//! use ouroboros_resilience::{CacheConfig, CacheStore};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheStore::open(CacheConfig::default()).await?;
//!
//!     cache
//!         .store("frame_42", json!({"scene": "intro"}), Some(Duration::from_secs(2)), None)
//!         .await?;
//!     assert_eq!(cache.retrieve("frame_42").await, Some(json!({"scene": "intro"})));
//!     Ok(())
//! }
//! ```
//!
//! ## Resilient Calls
//!
//! [`call_with_resilience`] combines cache lookup, circuit breaking and
//! retry. Each retry attempt is gated by the breaker and counted by it.
//!
//! ```no_run
//! use ouroboros_resilience::{
//!     call_with_resilience, CacheConfig, CacheStore, CircuitBreaker, CircuitBreakerConfig,
//!     ResilienceError, RetryPolicy,
//! };
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheStore::open(CacheConfig::default()).await?;
//!     let breaker = CircuitBreaker::new("scene-detection", CircuitBreakerConfig::default());
//!     let policy = RetryPolicy::default();
//!
//!     let scenes: Value = call_with_resilience(
//!         || async { Ok::<_, ResilienceError>(json!([{"scene": "intro", "start_ms": 0}])) },
//!         &policy,
//!         &breaker,
//!         Some((&cache, "video_7:scenes")),
//!         None,
//!     )
//!     .await?;
//!     println!("Scenes: {}", scenes);
//!     Ok(())
//! }
//! ```
//!
//! ## Clients
//!
//! Concrete backends implement [`ServiceBackend`] and are wrapped in a
//! [`ResilientClient`], which owns an [`AsyncResourceManager`]. Call
//! `close()` on the way out:
//!
//! ```no_run
//! use async_trait::async_trait;
//! use ouroboros_resilience::{
//!     ClientConfig, ResilientClient, ServiceBackend, ServiceKind, ServiceRequest,
//! };
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! struct Ocr;
//!
//! #[async_trait]
//! impl ServiceBackend for Ocr {
//!     fn kind(&self) -> ServiceKind {
//!         ServiceKind::Ocr
//!     }
//!
//!     async fn invoke(&self, request: &ServiceRequest) -> ouroboros_resilience::Result<Value> {
//!         Ok(json!({"text": "hello", "page": request.payload}))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ResilientClient::new(Arc::new(Ocr), ClientConfig::default(), None, None)?;
//!     let page = client.call(&ServiceRequest::new("read_page", json!(1))).await?;
//!     println!("{}", page);
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod resilience;

// Re-export main types for convenience
pub use cache::{
    start_auto_cleanup, CacheConfig, CacheConfigBuilder, CacheEntry, CacheKey, CacheStats, CacheStore, CacheTier,
    CacheValue, EntryMetadata,
};
pub use client::{BackendRegistry, ClientConfig, ResilientClient, ServiceBackend, ServiceKind, ServiceRequest};
pub use config::ResilienceConfig;
pub use error::{ResilienceError, Result};
pub use lifecycle::{
    begin_process_shutdown, AsyncResourceManager, CleanupPath, CloseReport, ManagerConfig, SessionHandle,
};
pub use resilience::{
    call_with_resilience, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, RetryExecutor,
    RetryPolicy,
};
