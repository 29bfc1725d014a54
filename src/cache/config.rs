//! Configuration for the cache system

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the hybrid cache store
///
/// One instance is built per store and handed to [`CacheStore::open`];
/// there is no process-wide cache directory.
///
/// [`CacheStore::open`]: crate::cache::CacheStore::open
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding one file per entry
    pub cache_dir: PathBuf,

    /// Upper bound on the total bytes of entry files on disk
    pub max_size_bytes: u64,

    /// TTL used when `store` is called without one
    pub default_ttl: Duration,

    /// Maximum number of entries kept in the memory tier (0 disables it)
    pub memory_item_limit: usize,

    /// TTL jitter factor (0.0 - 1.0), applied to `default_ttl` only.
    /// Spreads expiry of entries written together.
    pub ttl_jitter: f64,

    /// Run `clear_expired` periodically from a background task
    pub enable_auto_cleanup: bool,

    /// Interval for automatic cleanup
    pub cleanup_interval: Duration,
}

/// Default cache location: the platform cache dir, falling back to temp
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("ouroboros")
        .join("resilience-cache")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            // 100 MB on disk
            max_size_bytes: 100 * 1024 * 1024,
            // 1 hour
            default_ttl: Duration::from_secs(3600),
            memory_item_limit: 1_000,
            ttl_jitter: 0.0,
            enable_auto_cleanup: true,
            // Cleanup every 5 minutes
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err("cache_dir must not be empty".to_string());
        }

        if self.max_size_bytes == 0 {
            return Err("max_size_bytes must be greater than 0".to_string());
        }

        if self.default_ttl.is_zero() {
            return Err("default_ttl must be greater than 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err("ttl_jitter must be between 0.0 and 1.0".to_string());
        }

        if self.enable_auto_cleanup && self.cleanup_interval.is_zero() {
            return Err("cleanup_interval must be greater than 0 when auto cleanup is enabled".to_string());
        }

        Ok(())
    }

    /// Calculate the default TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.default_ttl;
        }

        let base_secs = self.default_ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::from_secs_f64(final_secs)
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    cache_dir: Option<PathBuf>,
    max_size_bytes: Option<u64>,
    default_ttl: Option<Duration>,
    memory_item_limit: Option<usize>,
    ttl_jitter: Option<f64>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
}

impl CacheConfigBuilder {
    /// Set the directory for entry files
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Set maximum on-disk size in bytes
    pub fn max_size_bytes(mut self, size: u64) -> Self {
        self.max_size_bytes = Some(size);
        self
    }

    /// Set default TTL for cache entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set maximum number of memory tier entries
    pub fn memory_item_limit(mut self, limit: usize) -> Self {
        self.memory_item_limit = Some(limit);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Enable or disable automatic cleanup
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            cache_dir: self.cache_dir.unwrap_or(defaults.cache_dir),
            max_size_bytes: self.max_size_bytes.unwrap_or(defaults.max_size_bytes),
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            memory_item_limit: self.memory_item_limit.unwrap_or(defaults.memory_item_limit),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
        }
    }
}
