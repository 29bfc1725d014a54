//! In-process memory tier
//!
//! Bounded by item count. When full, the entry written earliest is dropped;
//! reads do not reorder anything.

use crate::cache::entry::CacheEntry;
use crate::cache::types::CacheKey;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

pub(crate) struct MemoryTier {
    /// Maximum number of entries (0 disables the tier)
    limit: usize,

    /// key -> entry
    entries: HashMap<CacheKey, CacheEntry>,

    /// Write order, oldest first
    order: VecDeque<CacheKey>,
}

impl MemoryTier {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Insert an entry, dropping the oldest ones if the tier is full
    pub(crate) fn insert(&mut self, entry: CacheEntry) {
        if self.limit == 0 {
            return;
        }

        let key = entry.key.clone();
        if self.entries.insert(key.clone(), entry).is_some() {
            self.order.retain(|k| k != &key);
        }
        self.order.push_back(key);

        while self.entries.len() > self.limit {
            match self.order.pop_front() {
                Some(oldest) => {
                    debug!("Dropping oldest memory tier entry: {}", oldest);
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
