//! # Hybrid Result Cache
//!
//! Durable key/value cache for results of expensive external calls
//! (scene detection, transcription, OCR, vector search).
//!
//! ## Features
//!
//! - **TTL-Based Expiration**: Entries expire lazily on read and in bulk via `clear_expired`
//! - **Two Tiers**: A bounded memory tier in front of one JSON file per entry on disk
//! - **Size-Bounded**: Oldest entries are evicted to keep the disk footprint under a limit
//! - **Atomic Writes**: Files are written to a temporary path and renamed into place
//! - **Survives Restarts**: Entries written by one process are readable by the next
//!
//! ## Example
//!
//! ```rust,no_run
//! use ouroboros_resilience::cache::{CacheConfig, CacheStore};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example() -> ouroboros_resilience::Result<()> {
//! let config = CacheConfig::builder()
//!     .cache_dir("/tmp/frame-cache")
//!     .default_ttl(Duration::from_secs(3600)) // 1 hour
//!     .max_size_bytes(100 * 1024 * 1024) // 100 MB
//!     .build();
//!
//! let cache = CacheStore::open(config).await?;
//!
//! cache.store("frame_42", json!({"scene": "intro"}), None, None).await?;
//!
//! if let Some(value) = cache.retrieve("frame_42").await {
//!     println!("Cached: {}", value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
mod disk;
pub mod entry;
mod locks;
mod memory;
pub mod store;
pub mod types;

pub use config::{default_cache_dir, CacheConfig, CacheConfigBuilder};
pub use disk::entry_file_name;
pub use entry::CacheEntry;
pub use store::{start_auto_cleanup, CacheStore};
pub use types::{CacheKey, CacheStats, CacheTier, CacheValue, EntryMetadata};
