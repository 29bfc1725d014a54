//! Hybrid memory + disk cache store with TTL expiry and size-bounded eviction

use crate::cache::{
    config::CacheConfig,
    disk::{DiskRead, DiskTier},
    entry::CacheEntry,
    locks::KeyLocks,
    memory::MemoryTier,
    types::{CacheStats, CacheTier, CacheValue, EntryMetadata},
};
use crate::error::{ResilienceError, Result};
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Durable, size- and TTL-bounded key/value store
///
/// This implementation provides:
/// - A bounded in-process memory tier in front of a durable disk tier
/// - Atomic disk writes (temporary file + rename)
/// - Lazy TTL expiry on read plus an explicit [`clear_expired`] sweep
/// - Oldest-first eviction keeping the disk footprint under `max_size_bytes`
/// - Per-key striped locking so unrelated keys proceed in parallel
///
/// Share it between tasks behind an `Arc`.
///
/// [`clear_expired`]: CacheStore::clear_expired
pub struct CacheStore {
    /// Cache configuration
    config: CacheConfig,

    /// In-process tier
    memory: RwLock<MemoryTier>,

    /// Durable tier
    disk: DiskTier,

    /// Same-key operation ordering
    locks: KeyLocks,

    /// Running counters
    stats: Mutex<CacheStats>,
}

impl CacheStore {
    /// Open a store, creating the cache directory and loading any entries
    /// persisted by an earlier process
    pub async fn open(config: CacheConfig) -> Result<Self> {
        config.validate().map_err(ResilienceError::ConfigError)?;

        info!(
            cache_dir = %config.cache_dir.display(),
            max_size_bytes = config.max_size_bytes,
            default_ttl_secs = config.default_ttl.as_secs(),
            memory_item_limit = config.memory_item_limit,
            "Initializing cache store"
        );

        let (disk, dropped) = DiskTier::open(config.cache_dir.clone(), config.max_size_bytes).await?;

        let stats = CacheStats {
            entries: disk.len(),
            size_bytes: disk.size_bytes(),
            ..Default::default()
        };
        if dropped > 0 {
            debug!("Dropped {} stale files while opening cache", dropped);
        }

        Ok(Self {
            memory: RwLock::new(MemoryTier::new(config.memory_item_limit)),
            disk,
            locks: KeyLocks::new(),
            stats: Mutex::new(stats),
            config,
        })
    }

    /// Store a value under `key`.
    ///
    /// `ttl` overrides the configured default. The entry is written to disk
    /// first; only a successful write makes it visible in the memory tier.
    pub async fn store(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        metadata: Option<EntryMetadata>,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(ResilienceError::ValidationError(
                "cache key must not be empty".to_string(),
            ));
        }

        let ttl = match ttl {
            Some(ttl) if ttl.is_zero() => {
                return Err(ResilienceError::ValidationError(format!(
                    "TTL for {} must be greater than 0",
                    key
                )))
            }
            Some(ttl) => ttl,
            None => self.config.ttl_with_jitter(),
        };

        let entry = CacheEntry::new(key.to_string(), value, ttl, metadata.unwrap_or_default())?;

        let written = {
            let _guard = self.locks.lock(key).await;
            let written = match self.disk.write(&entry).await {
                Ok(written) => written,
                Err(e) => {
                    warn!(key, "Failed to store cache entry: {}", e);
                    // Whatever the memory tier held is no longer backed by disk
                    self.memory.write().await.remove(key);
                    return Err(e);
                }
            };
            self.memory.write().await.insert(entry);
            written
        };

        // One stripe at a time, after our own is released
        for evicted in &written.evicted {
            let _guard = self.locks.lock(evicted).await;
            self.disk.discard_evicted(evicted).await;
            if !self.disk.contains(evicted) {
                self.memory.write().await.remove(evicted);
            }
        }

        {
            let mut stats = self.counters();
            stats.writes += 1;
            stats.evictions_size += written.evicted.len() as u64;
        }

        debug!(key, bytes = written.bytes, ttl_ms = ttl.as_millis() as u64, "Stored cache entry");
        Ok(())
    }

    /// Serialize `value` and store it
    pub async fn store_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        metadata: Option<EntryMetadata>,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.store(key, value, ttl, metadata).await
    }

    /// Retrieve a value; `None` on miss, expiry or a corrupted record
    pub async fn retrieve(&self, key: &str) -> Option<CacheValue> {
        self.retrieve_entry(key).await.map(|entry| entry.value)
    }

    /// Retrieve and deserialize a value.
    ///
    /// A payload that does not deserialize as `T` is reported as a miss.
    pub async fn retrieve_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.retrieve(key).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(key, "Cached payload has unexpected shape: {}", e);
                None
            }
        }
    }

    /// Retrieve the full entry including metadata and timestamps
    pub async fn retrieve_entry(&self, key: &str) -> Option<CacheEntry> {
        let fresh = self
            .memory
            .read()
            .await
            .get(key)
            .filter(|entry| !entry.is_expired())
            .cloned();
        if let Some(entry) = fresh {
            self.record_hit(CacheTier::Memory);
            debug!("Cache hit ({}): {}", CacheTier::Memory, key);
            return Some(entry);
        }

        let _guard = self.locks.lock(key).await;

        // Expired in memory (or absent): consult disk under the key lock
        let stale = self.memory.write().await.remove(key);
        if let Some(entry) = stale {
            if !entry.is_expired() {
                // Rewritten between the read above and taking the lock
                self.record_hit(CacheTier::Memory);
                self.memory.write().await.insert(entry.clone());
                return Some(entry);
            }
        }

        match self.disk.read(key).await {
            DiskRead::Hit(entry) if entry.is_expired() => {
                debug!("Cache entry expired: {}", key);
                if let Err(e) = self.disk.remove(key).await {
                    warn!(key, "Failed to remove expired cache entry: {}", e);
                }
                let mut stats = self.counters();
                stats.misses += 1;
                stats.evictions_ttl += 1;
                None
            }
            DiskRead::Hit(entry) => {
                self.record_hit(CacheTier::Disk);
                debug!("Cache hit ({}): {}", CacheTier::Disk, key);
                self.memory.write().await.insert(entry.clone());
                Some(entry)
            }
            DiskRead::Corrupt => {
                if let Err(e) = self.disk.remove(key).await {
                    warn!(key, "Failed to remove corrupted cache entry: {}", e);
                }
                let mut stats = self.counters();
                stats.misses += 1;
                stats.corrupted_entries += 1;
                None
            }
            DiskRead::Missing => {
                debug!("Cache miss: {}", key);
                self.counters().misses += 1;
                None
            }
        }
    }

    /// Remove a specific entry from both tiers. Returns whether it existed.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let _guard = self.locks.lock(key).await;
        let in_memory = self.memory.write().await.remove(key).is_some();
        let on_disk = self.disk.remove(key).await?;
        Ok(in_memory || on_disk)
    }

    /// Remove every expired or corrupted entry from the disk tier and
    /// reconcile the size accounting with the directory contents.
    ///
    /// Returns the number of entries removed. Safe to run while other tasks
    /// store and retrieve.
    pub async fn clear_expired(&self) -> Result<usize> {
        let scan_started = Utc::now();
        let scan = self.disk.scan(scan_started).await?;
        let mut expired_removed = 0;
        let mut corrupt_removed = 0;

        for key in &scan.expired {
            let _guard = self.locks.lock(key).await;
            // Re-checked under the lock: a concurrent store may have replaced it
            if self.disk.remove_if_stale(key, Utc::now()).await? {
                expired_removed += 1;
            }
            let mut memory = self.memory.write().await;
            if memory.get(key).map_or(false, |e| e.is_expired()) {
                memory.remove(key);
            }
        }

        for path in &scan.corrupt {
            if self.disk.remove_if_corrupt(path).await {
                corrupt_removed += 1;
            }
        }

        self.disk.reconcile(scan.live, scan_started);

        {
            let mut stats = self.counters();
            stats.evictions_ttl += expired_removed as u64;
            stats.corrupted_entries += corrupt_removed as u64;
        }

        let removed = expired_removed + corrupt_removed;
        if removed > 0 {
            debug!(
                expired = expired_removed,
                corrupted = corrupt_removed,
                "Cleaned up stale cache entries"
            );
        }
        Ok(removed)
    }

    /// Clear all entries from both tiers
    pub async fn clear(&self) -> Result<()> {
        self.memory.write().await.clear();
        let removed = self.disk.clear().await?;
        info!("Cleared {} entries from cache", removed);
        Ok(())
    }

    /// Get a snapshot of the cache statistics
    pub fn stats_snapshot(&self) -> CacheStats {
        let mut snapshot = self.counters().clone();
        snapshot.entries = self.disk.len();
        snapshot.size_bytes = self.disk.size_bytes();
        snapshot
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        self.stats_snapshot()
    }

    /// Current on-disk size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.disk.size_bytes()
    }

    /// Number of entries on disk (expired ones count until removed)
    pub fn len(&self) -> usize {
        self.disk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disk.len() == 0
    }

    /// Number of entries held in the memory tier
    pub async fn memory_len(&self) -> usize {
        self.memory.read().await.len()
    }

    /// Whether the disk tier currently tracks `key`
    pub fn contains_on_disk(&self, key: &str) -> bool {
        self.disk.contains(key)
    }

    /// Path of the file that holds (or would hold) `key`
    pub fn entry_path(&self, key: &str) -> std::path::PathBuf {
        self.disk.path_for(key)
    }

    pub fn cache_dir(&self) -> &Path {
        self.disk.dir()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn counters(&self) -> MutexGuard<'_, CacheStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_hit(&self, tier: CacheTier) {
        let mut stats = self.counters();
        stats.hits += 1;
        match tier {
            CacheTier::Memory => stats.memory_hits += 1,
            CacheTier::Disk => stats.disk_hits += 1,
        }
    }
}

/// Spawn the periodic `clear_expired` loop for `cache`.
///
/// Returns `None` when auto cleanup is disabled in the config. The handle
/// can be aborted or handed to an [`AsyncResourceManager`].
///
/// [`AsyncResourceManager`]: crate::lifecycle::AsyncResourceManager
pub fn start_auto_cleanup(cache: Arc<CacheStore>) -> Option<JoinHandle<()>> {
    if !cache.config.enable_auto_cleanup {
        return None;
    }

    let interval = cache.config.cleanup_interval;
    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match cache.clear_expired().await {
                Ok(removed) if removed > 0 => debug!("Auto cleanup removed {} entries", removed),
                Ok(_) => {}
                Err(e) => warn!("Auto cleanup failed: {}", e),
            }
        }
    }))
}
