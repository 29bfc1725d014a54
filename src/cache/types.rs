//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Cache key type - caller-chosen string, unique within a store
pub type CacheKey = String;

/// Cache value type - opaque JSON payload, never interpreted by the store
pub type CacheValue = serde_json::Value;

/// Free-form metadata attached to a cache entry
///
/// Only the mutations the cache needs are exposed: insert, remove by key and
/// merge. Keys are kept ordered so the on-disk form is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryMetadata(BTreeMap<String, serde_json::Value>);

impl EntryMetadata {
    /// Create empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a value, returning the previous one
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Option<serde_json::Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a key, returning its value if present
    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.0.remove(key)
    }

    /// Merge another mapping into this one; values from `other` win
    pub fn merge(&mut self, other: EntryMetadata) {
        self.0.extend(other.0);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheStats {
    /// Total number of cache hits (either tier)
    pub hits: u64,

    /// Hits served from the memory tier
    pub memory_hits: u64,

    /// Hits served from the disk tier
    pub disk_hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Successful writes
    pub writes: u64,

    /// Number of entries currently on disk
    pub entries: usize,

    /// Total size of on-disk entries in bytes
    pub size_bytes: u64,

    /// Number of evictions due to size limits
    pub evictions_size: u64,

    /// Number of removals due to TTL expiration
    pub evictions_ttl: u64,

    /// Malformed entries found and deleted
    pub corrupted_entries: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate total evictions
    pub fn total_evictions(&self) -> u64 {
        self.evictions_size + self.evictions_ttl
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, size: {} bytes, evictions: {}, corrupted: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.size_bytes,
            self.total_evictions(),
            self.corrupted_entries
        )
    }
}

/// Storage tier an entry was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    /// In-process memory tier
    Memory,

    /// Durable disk tier
    Disk,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Memory => write!(f, "memory"),
            CacheTier::Disk => write!(f, "disk"),
        }
    }
}
