//! Durable disk tier
//!
//! One JSON file per entry in the cache directory, named from a UUID v5 of
//! the key. Writes go to a unique temporary file first and are renamed into
//! place, so readers only ever see a complete record or no record.
//!
//! Size accounting is kept in an in-memory index updated on every write and
//! delete. [`DiskTier::reconcile`] brings it back in line with the directory
//! contents after a full scan.
//!
//! Callers are expected to hold the key's stripe lock for any call that takes
//! a key. A write never deletes another key's file: it returns the evicted
//! keys and the caller discards them under their own stripe locks.

use crate::cache::entry::CacheEntry;
use crate::cache::types::CacheKey;
use crate::error::{ResilienceError, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Namespace for deriving entry file names from keys
const CACHE_FILE_NAMESPACE: Uuid = Uuid::from_u128(0x6f75_726f_626f_726f_735f_6361_6368_6531);

const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Deterministic file name for a key
pub fn entry_file_name(key: &str) -> String {
    format!(
        "{}.{}",
        Uuid::new_v5(&CACHE_FILE_NAMESPACE, key.as_bytes()).simple(),
        ENTRY_EXTENSION
    )
}

#[derive(Debug, Clone)]
struct IndexedFile {
    size: u64,
    created_at: DateTime<Utc>,
    /// Reserved by an in-flight write; never chosen for eviction
    pending: bool,
}

#[derive(Default)]
struct DiskIndex {
    files: HashMap<CacheKey, IndexedFile>,
    by_age: BTreeSet<(DateTime<Utc>, CacheKey)>,
    total_bytes: u64,
    /// Bytes reserved by in-flight writes
    pending_bytes: u64,
    /// Evicted keys whose files are not yet discarded
    evicted: HashSet<CacheKey>,
}

impl DiskIndex {
    fn insert(&mut self, key: CacheKey, file: IndexedFile) -> Option<IndexedFile> {
        let previous = self.remove(&key);
        self.total_bytes += file.size;
        if file.pending {
            self.pending_bytes += file.size;
        }
        self.by_age.insert((file.created_at, key.clone()));
        self.files.insert(key, file);
        previous
    }

    fn remove(&mut self, key: &str) -> Option<IndexedFile> {
        let removed = self.files.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(removed.size);
        if removed.pending {
            self.pending_bytes = self.pending_bytes.saturating_sub(removed.size);
        }
        self.by_age.remove(&(removed.created_at, key.to_string()));
        Some(removed)
    }

    /// Clear the reservation made for the write of `key` at `created_at`
    fn settle(&mut self, key: &str, created_at: DateTime<Utc>) {
        if let Some(file) = self.files.get_mut(key) {
            if file.pending && file.created_at == created_at {
                file.pending = false;
                self.pending_bytes = self.pending_bytes.saturating_sub(file.size);
            }
        }
    }

    /// Make room for `file` under `key` and reserve it.
    ///
    /// Returns `None` without touching the index when only in-flight
    /// reservations stand in the way.
    fn reserve(&mut self, key: &str, file: IndexedFile, max_bytes: u64) -> Option<(Vec<CacheKey>, Option<IndexedFile>)> {
        // The key's own previous record is settled: its writer holds the stripe lock
        let freed = self.files.get(key).map_or(0, |f| f.size);
        if self.pending_bytes + file.size > max_bytes {
            return None;
        }

        let mut evicted = Vec::new();
        while self.total_bytes.saturating_sub(freed) + file.size > max_bytes {
            match self.oldest_evictable(key) {
                Some(oldest) => {
                    self.remove(&oldest);
                    self.evicted.insert(oldest.clone());
                    evicted.push(oldest);
                }
                None => break,
            }
        }

        let previous = self.insert(key.to_string(), file);
        Some((evicted, previous))
    }

    /// Oldest settled entry other than `exclude`
    fn oldest_evictable(&self, exclude: &str) -> Option<CacheKey> {
        self.by_age
            .iter()
            .map(|(_, key)| key)
            .find(|key| {
                key.as_str() != exclude && self.files.get(key.as_str()).map_or(false, |f| !f.pending)
            })
            .cloned()
    }
}

/// Result of reading one key from disk
#[derive(Debug)]
pub(crate) enum DiskRead {
    Hit(CacheEntry),
    Missing,
    Corrupt,
}

/// Classification of one file found during a directory scan
#[derive(Debug, Default)]
pub(crate) struct DiskScan {
    /// Valid, unexpired entries: key -> (size, created_at)
    pub(crate) live: HashMap<CacheKey, (u64, DateTime<Utc>)>,
    /// Keys whose records have expired
    pub(crate) expired: Vec<CacheKey>,
    /// Files that did not parse as a record for their own name
    pub(crate) corrupt: Vec<PathBuf>,
    /// Leftover temporary files
    pub(crate) temp: Vec<PathBuf>,
}

/// Outcome of a successful write
#[derive(Debug, Default)]
pub(crate) struct DiskWrite {
    pub(crate) bytes: u64,
    pub(crate) evicted: Vec<CacheKey>,
}

pub(crate) struct DiskTier {
    dir: PathBuf,
    max_size_bytes: u64,
    index: Mutex<DiskIndex>,
    /// Signalled whenever a reservation settles or rolls back
    settled: Notify,
}

impl DiskTier {
    /// Open (creating if needed) the cache directory and index what is there.
    ///
    /// Corrupt, expired and temporary files left by an earlier process are
    /// deleted. Returns the tier plus the number of files dropped.
    pub(crate) async fn open(dir: PathBuf, max_size_bytes: u64) -> Result<(Self, usize)> {
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ResilienceError::storage("create cache directory", &dir, e))?;

        let tier = Self {
            dir,
            max_size_bytes,
            index: Mutex::new(DiskIndex::default()),
            settled: Notify::new(),
        };

        let scan = tier.scan(Utc::now()).await?;
        let mut dropped = 0;

        for key in &scan.expired {
            if tier.delete_file(&tier.path_for(key)).await {
                dropped += 1;
            }
        }
        for path in scan.corrupt.iter().chain(scan.temp.iter()) {
            if tier.delete_file(path).await {
                dropped += 1;
            }
        }

        {
            let mut index = tier.index();
            for (key, (size, created_at)) in scan.live {
                index.insert(
                    key,
                    IndexedFile {
                        size,
                        created_at,
                        pending: false,
                    },
                );
            }
        }

        // The limit may have shrunk since the files were written
        let over_limit = tier.evict_over_limit();
        for key in &over_limit {
            tier.delete_file(&tier.path_for(key)).await;
        }
        dropped += over_limit.len();

        info!(
            dir = %tier.dir.display(),
            entries = tier.len(),
            size_bytes = tier.size_bytes(),
            dropped,
            "Opened cache disk tier"
        );

        Ok((tier, dropped))
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(entry_file_name(key))
    }

    pub(crate) fn size_bytes(&self) -> u64 {
        self.index().total_bytes
    }

    pub(crate) fn len(&self) -> usize {
        self.index().files.len()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.index().files.contains_key(key)
    }

    fn index(&self) -> MutexGuard<'_, DiskIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read a key's record
    pub(crate) async fn read(&self, key: &str) -> DiskRead {
        let path = self.path_for(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return DiskRead::Missing,
            Err(e) => {
                warn!(path = %path.display(), "Failed to read cache entry, treating as miss: {}", e);
                return DiskRead::Missing;
            }
        };

        match CacheEntry::from_bytes(&bytes) {
            Ok(entry) if entry.key == key => DiskRead::Hit(entry),
            Ok(entry) => {
                warn!(
                    path = %path.display(),
                    expected = key,
                    found = %entry.key,
                    "Cache file holds a different key"
                );
                DiskRead::Corrupt
            }
            Err(e) => {
                warn!(path = %path.display(), "Malformed cache entry: {}", e);
                DiskRead::Corrupt
            }
        }
    }

    /// Write an entry atomically, evicting the oldest entries if needed.
    ///
    /// Waits while in-flight writes to other keys hold the room this entry
    /// needs. Evicted keys are dropped from the index only; their files are
    /// left for [`DiskTier::discard_evicted`].
    pub(crate) async fn write(&self, entry: &CacheEntry) -> Result<DiskWrite> {
        let bytes = entry.to_bytes()?;
        let size = bytes.len() as u64;
        if size > self.max_size_bytes {
            return Err(ResilienceError::CapacityError {
                entry_bytes: size,
                max_bytes: self.max_size_bytes,
            });
        }

        let (evicted, previous) = loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            // Registered before checking, so a settle in between is not missed
            settled.as_mut().enable();

            let reserved = self.index().reserve(
                &entry.key,
                IndexedFile {
                    size,
                    created_at: entry.created_at,
                    pending: true,
                },
                self.max_size_bytes,
            );
            match reserved {
                Some(reserved) => break reserved,
                None => {
                    debug!(key = %entry.key, bytes = size, "Waiting for in-flight cache writes to settle");
                    settled.await;
                }
            }
        };

        let path = self.path_for(&entry.key);
        if let Err(e) = self.write_atomic(&path, &bytes).await {
            self.rollback(entry, previous);
            self.settled.notify_waiters();
            // The caller never sees these keys on failure
            for key in &evicted {
                self.discard_evicted(key).await;
            }
            return Err(e);
        }

        self.index().settle(&entry.key, entry.created_at);
        self.settled.notify_waiters();

        debug!(key = %entry.key, bytes = size, evicted = evicted.len(), "Wrote cache entry");
        Ok(DiskWrite {
            bytes: size,
            evicted,
        })
    }

    /// Delete the file of a key evicted by [`DiskTier::write`], unless the
    /// key has been written again since. Returns whether a file was removed.
    pub(crate) async fn discard_evicted(&self, key: &str) -> bool {
        let rewritten = {
            let mut index = self.index();
            index.evicted.remove(key);
            index.files.contains_key(key)
        };
        if rewritten {
            return false;
        }
        debug!("Evicting cache entry due to size limit: {}", key);
        self.delete_file(&self.path_for(key)).await
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("entry");
        let temp_path = self.dir.join(format!(
            ".{}.{}.{}",
            stem,
            Uuid::new_v4().simple(),
            TEMP_EXTENSION
        ));

        let result = async {
            let mut file = fs::File::create(&temp_path)
                .await
                .map_err(|e| ResilienceError::storage("create temporary file", &temp_path, e))?;
            file.write_all(bytes)
                .await
                .map_err(|e| ResilienceError::storage("write temporary file", &temp_path, e))?;
            file.sync_all()
                .await
                .map_err(|e| ResilienceError::storage("sync temporary file", &temp_path, e))?;
            drop(file);

            fs::rename(&temp_path, path)
                .await
                .map_err(|e| ResilienceError::storage("rename entry into place", path, e))
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        result
    }

    fn rollback(&self, entry: &CacheEntry, previous: Option<IndexedFile>) {
        let mut index = self.index();
        let reserved = index
            .files
            .get(&entry.key)
            .map_or(false, |f| f.pending && f.created_at == entry.created_at);
        if reserved {
            index.remove(&entry.key);
            if let Some(previous) = previous {
                index.insert(entry.key.clone(), previous);
            }
        }
    }

    /// Delete a key's file and index entry. Returns whether a file existed.
    pub(crate) async fn remove(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        let existed = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(ResilienceError::storage("remove entry", &path, e)),
        };

        self.index().remove(key);
        Ok(existed)
    }

    /// Delete a key only if its current record is expired or unreadable
    pub(crate) async fn remove_if_stale(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        match self.read(key).await {
            DiskRead::Hit(entry) if !entry.is_expired_at(now) => Ok(false),
            DiskRead::Missing => {
                self.index().remove(key);
                Ok(false)
            }
            _ => self.remove(key).await,
        }
    }

    /// Delete a file found corrupt during a scan if it still is
    pub(crate) async fn remove_if_corrupt(&self, path: &Path) -> bool {
        let still_corrupt = match fs::read(path).await {
            Ok(bytes) => match CacheEntry::from_bytes(&bytes) {
                Ok(entry) => path.file_name().and_then(|n| n.to_str())
                    != Some(entry_file_name(&entry.key).as_str()),
                Err(_) => true,
            },
            Err(_) => false,
        };

        still_corrupt && self.delete_file(path).await
    }

    /// Classify every file in the cache directory
    pub(crate) async fn scan(&self, now: DateTime<Utc>) -> Result<DiskScan> {
        let mut scan = DiskScan::default();
        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| ResilienceError::storage("scan cache directory", &self.dir, e))?;

        loop {
            let dirent = match dir.next_entry().await {
                Ok(Some(dirent)) => dirent,
                Ok(None) => break,
                Err(e) => return Err(ResilienceError::storage("scan cache directory", &self.dir, e)),
            };

            let path = dirent.path();
            let extension = path.extension().and_then(|e| e.to_str());

            if extension == Some(TEMP_EXTENSION) {
                scan.temp.push(path);
                continue;
            }
            if extension != Some(ENTRY_EXTENSION) {
                continue;
            }

            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                // Removed between listing and reading
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %path.display(), "Skipping unreadable cache file: {}", e);
                    continue;
                }
            };

            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            match CacheEntry::from_bytes(&bytes) {
                Ok(entry) if entry_file_name(&entry.key) != file_name => scan.corrupt.push(path),
                Ok(entry) if entry.is_expired_at(now) => scan.expired.push(entry.key),
                Ok(entry) => {
                    scan.live
                        .insert(entry.key, (bytes.len() as u64, entry.created_at));
                }
                Err(_) => scan.corrupt.push(path),
            }
        }

        Ok(scan)
    }

    /// Rebuild the size accounting from a scan taken at `scan_started`.
    ///
    /// Index entries written after the scan began, or still in flight, are
    /// kept as they are. Older entries take the scanned size, or are dropped
    /// when their file is gone. Files on disk the index does not know about
    /// are adopted.
    pub(crate) fn reconcile(&self, live: HashMap<CacheKey, (u64, DateTime<Utc>)>, scan_started: DateTime<Utc>) -> u64 {
        let mut index = self.index();
        let before = index.total_bytes;
        let mut rebuilt = DiskIndex {
            evicted: std::mem::take(&mut index.evicted),
            ..Default::default()
        };

        for (key, file) in index.files.drain() {
            let recent = file.pending || file.created_at >= scan_started;
            match live.get(&key) {
                _ if recent => {
                    rebuilt.insert(key, file);
                }
                Some(&(size, created_at)) => {
                    rebuilt.insert(
                        key,
                        IndexedFile {
                            size,
                            created_at,
                            pending: false,
                        },
                    );
                }
                None => {
                    debug!("Dropping index entry with no file on disk: {}", key);
                }
            }
        }

        for (key, (size, created_at)) in live {
            let untracked = !rebuilt.files.contains_key(&key) && !rebuilt.evicted.contains(&key);
            if created_at < scan_started && untracked && self.path_for(&key).exists() {
                debug!("Adopting untracked cache file: {}", key);
                rebuilt.insert(
                    key,
                    IndexedFile {
                        size,
                        created_at,
                        pending: false,
                    },
                );
            }
        }

        *index = rebuilt;
        if index.total_bytes != before {
            info!(
                before_bytes = before,
                after_bytes = index.total_bytes,
                "Reconciled cache size accounting"
            );
        }
        index.total_bytes
    }

    /// Evict oldest entries until the index is back under the limit
    fn evict_over_limit(&self) -> Vec<CacheKey> {
        let mut index = self.index();
        let mut evicted = Vec::new();
        while index.total_bytes > self.max_size_bytes {
            match index.oldest_evictable("") {
                Some(oldest) => {
                    index.remove(&oldest);
                    evicted.push(oldest);
                }
                None => break,
            }
        }
        evicted
    }

    /// Delete every settled entry file and reset the index
    pub(crate) async fn clear(&self) -> Result<usize> {
        let keys: Vec<CacheKey> = {
            let index = self.index();
            index
                .files
                .iter()
                .filter(|(_, f)| !f.pending)
                .map(|(k, _)| k.clone())
                .collect()
        };

        let mut removed = 0;
        for key in &keys {
            if self.remove(key).await? {
                removed += 1;
            }
        }

        // Files the index never knew about
        let scan = self.scan(Utc::now()).await?;
        for path in scan.corrupt {
            if self.delete_file(&path).await {
                removed += 1;
            }
        }
        for key in scan.live.keys().chain(scan.expired.iter()) {
            let pending = self.index().files.get(key).map_or(false, |f| f.pending);
            if !pending && self.remove(key).await? {
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Best-effort delete; returns whether a file was removed
    async fn delete_file(&self, path: &Path) -> bool {
        match fs::remove_file(path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), "Failed to delete cache file: {}", e);
                false
            }
        }
    }
}
