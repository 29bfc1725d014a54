//! Cache entry management with TTL support
//!
//! A [`CacheEntry`] is also the on-disk record: one JSON document per entry
//! holding `key`, `value`, `created_at`, `expires_at` and `metadata`.

use crate::cache::types::{CacheKey, CacheValue, EntryMetadata};
use crate::error::{ResilienceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cache entry with TTL and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The cached value
    pub value: CacheValue,

    /// When the entry was written
    pub created_at: DateTime<Utc>,

    /// When the entry stops being served
    pub expires_at: DateTime<Utc>,

    /// Caller-supplied metadata
    #[serde(default)]
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    /// Create a new cache entry expiring `ttl` from now
    pub fn new(key: CacheKey, value: CacheValue, ttl: Duration, metadata: EntryMetadata) -> Result<Self> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| ResilienceError::ValidationError(format!("TTL out of range: {}", e)))?;
        let created_at = Utc::now();

        Ok(Self {
            key,
            value,
            created_at,
            expires_at: created_at + ttl,
            metadata,
        })
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check expiry against a fixed instant (used for batch scans)
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Get time until expiration
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let now = Utc::now();
        if now > self.expires_at {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }

    /// Serialize to the on-disk record format
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and structurally validate an on-disk record
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let entry: CacheEntry = serde_json::from_slice(bytes)?;

        if entry.key.is_empty() {
            return Err(ResilienceError::SerializationError(
                "cache record has an empty key".to_string(),
            ));
        }
        if entry.expires_at < entry.created_at {
            return Err(ResilienceError::SerializationError(format!(
                "cache record for {} expires before it was created",
                entry.key
            )));
        }

        Ok(entry)
    }
}
