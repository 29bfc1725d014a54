//! Integration tests for the cache store
//!
//! These tests verify the complete cache functionality including:
//! - Round-trip storage and TTL expiry (lazy and swept)
//! - Size-bounded eviction, oldest first
//! - Persistence across reopen
//! - Corrupted entry handling
//! - Concurrent access

use futures::future::join_all;
use ouroboros_resilience::cache::{entry_file_name, CacheConfig, CacheStore};
use ouroboros_resilience::ResilienceError;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn config(dir: &Path) -> CacheConfig {
    CacheConfig::builder()
        .cache_dir(dir)
        .default_ttl(Duration::from_secs(60))
        .ttl_jitter(0.0) // No jitter for predictable tests
        .enable_auto_cleanup(false)
        .build()
}

#[tokio::test]
async fn test_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::open(config(dir.path())).await.unwrap();

    let values = [
        ("scene:1", json!({"scene": "intro", "start_ms": 0})),
        ("ocr:page_3", json!("Chapter One")),
        ("vec:q", json!([0.25, 0.5, 0.75])),
        ("empty", json!(null)),
    ];

    for (key, value) in &values {
        cache
            .store(key, value.clone(), Some(Duration::from_secs(30)), None)
            .await
            .unwrap();
        assert_eq!(cache.retrieve(key).await.as_ref(), Some(value));
    }

    assert_eq!(cache.len(), values.len());
}

#[tokio::test]
async fn test_frame_42_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::open(config(dir.path())).await.unwrap();

    cache
        .store("frame_42", json!({"scene": "intro"}), Some(Duration::from_secs(2)), None)
        .await
        .unwrap();

    assert_eq!(cache.retrieve("frame_42").await, Some(json!({"scene": "intro"})));

    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(cache.retrieve("frame_42").await, None);
}

#[tokio::test]
async fn test_expired_entry_removed_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::open(config(dir.path())).await.unwrap();

    cache
        .store("expiring_key", json!("expiring_value"), Some(Duration::from_secs(1)), None)
        .await
        .unwrap();
    let path = cache.entry_path("expiring_key");
    assert!(path.exists());

    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert!(cache.retrieve("expiring_key").await.is_none());
    assert!(!path.exists());
    assert!(!cache.contains_on_disk("expiring_key"));
    assert_eq!(cache.size_bytes(), 0);

    let stats = cache.stats().await;
    assert_eq!(stats.evictions_ttl, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_size_eviction_drops_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let max_size_bytes = 1_000;
    let cache = CacheStore::open(
        CacheConfig::builder()
            .cache_dir(dir.path())
            .max_size_bytes(max_size_bytes)
            .enable_auto_cleanup(false)
            .build(),
    )
    .await
    .unwrap();

    let payload = "x".repeat(200);
    for i in 0..10 {
        cache
            .store(&format!("entry_{:02}", i), json!(payload), None, None)
            .await
            .unwrap();
        assert!(cache.size_bytes() <= max_size_bytes);
    }

    assert!(cache.retrieve("entry_00").await.is_none());
    assert!(cache.retrieve("entry_01").await.is_none());
    assert!(cache.retrieve("entry_08").await.is_some());
    assert!(cache.retrieve("entry_09").await.is_some());
    assert!(!cache.entry_path("entry_00").exists());

    let stats = cache.stats().await;
    assert!(stats.evictions_size >= 7);
    assert_eq!(stats.entries + stats.evictions_size as usize, 10);
}

#[tokio::test]
async fn test_oversized_entry_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::open(
        CacheConfig::builder()
            .cache_dir(dir.path())
            .max_size_bytes(64)
            .enable_auto_cleanup(false)
            .build(),
    )
    .await
    .unwrap();

    let result = cache.store("big", json!("y".repeat(500)), None, None).await;
    assert!(matches!(result, Err(ResilienceError::CapacityError { .. })));
    assert!(cache.retrieve("big").await.is_none());
    assert_eq!(cache.size_bytes(), 0);
}

#[tokio::test]
async fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let size_before = {
        let cache = CacheStore::open(config(dir.path())).await.unwrap();
        cache
            .store("transcript:ep1", json!({"text": "hello world"}), None, None)
            .await
            .unwrap();
        cache
            .store("short_lived", json!(1), Some(Duration::from_millis(50)), None)
            .await
            .unwrap();
        cache.size_bytes()
    };

    tokio::time::sleep(Duration::from_millis(100)).await;

    let reopened = CacheStore::open(config(dir.path())).await.unwrap();
    assert_eq!(reopened.len(), 1);
    assert!(reopened.size_bytes() < size_before);
    assert_eq!(
        reopened.retrieve("transcript:ep1").await,
        Some(json!({"text": "hello world"}))
    );
    assert!(!reopened.entry_path("short_lived").exists());

    let stats = reopened.stats().await;
    assert_eq!(stats.disk_hits, 1);
}

#[tokio::test]
async fn test_on_disk_format() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::open(config(dir.path())).await.unwrap();

    cache
        .store("frame_7", json!({"scene": "outro"}), None, None)
        .await
        .unwrap();

    let path = dir.path().join(entry_file_name("frame_7"));
    assert_eq!(path, cache.entry_path("frame_7"));

    let record: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(record["key"], json!("frame_7"));
    assert_eq!(record["value"], json!({"scene": "outro"}));
    assert!(record["created_at"].is_string());
    assert!(record["expires_at"].is_string());
    assert!(record["metadata"].is_object());
}

#[tokio::test]
async fn test_corrupted_entry_is_a_miss_and_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::open(
        CacheConfig::builder()
            .cache_dir(dir.path())
            .memory_item_limit(0)
            .enable_auto_cleanup(false)
            .build(),
    )
    .await
    .unwrap();

    cache.store("frame_9", json!({"scene": "chase"}), None, None).await.unwrap();
    let path = cache.entry_path("frame_9");
    std::fs::write(&path, b"{\"key\": \"frame_9\", \"value\": ").unwrap();

    assert!(cache.retrieve("frame_9").await.is_none());
    assert!(!path.exists());
    assert_eq!(cache.stats().await.corrupted_entries, 1);

    // A fresh write over the removed entry works
    cache.store("frame_9", json!({"scene": "chase"}), None, None).await.unwrap();
    assert_eq!(cache.retrieve("frame_9").await, Some(json!({"scene": "chase"})));
}

#[tokio::test]
async fn test_reopen_discards_corrupt_and_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(entry_file_name("broken")), b"not json").unwrap();
    std::fs::write(dir.path().join(".deadbeef.1234.tmp"), b"{}").unwrap();

    let cache = CacheStore::open(config(dir.path())).await.unwrap();
    assert!(cache.is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_clear_expired_reconciles_size() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::open(config(dir.path())).await.unwrap();

    cache.store("keep", json!("k"), None, None).await.unwrap();
    cache
        .store("drop", json!("d"), Some(Duration::from_millis(30)), None)
        .await
        .unwrap();

    // A file removed behind the store's back
    cache.store("vanished", json!("v"), None, None).await.unwrap();
    std::fs::remove_file(cache.entry_path("vanished")).unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(cache.clear_expired().await.unwrap(), 1);
    assert_eq!(cache.len(), 1);

    let on_disk = std::fs::metadata(cache.entry_path("keep")).unwrap().len();
    assert_eq!(cache.size_bytes(), on_disk);
}

#[tokio::test]
async fn test_concurrent_store_and_retrieve() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheStore::open(config(dir.path())).await.unwrap());

    let writers = (0..32).map(|i| {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            let key = format!("frame_{}", i % 8);
            cache.store(&key, json!({"writer": i}), None, None).await.unwrap();
            cache.retrieve(&key).await
        })
    });

    for result in join_all(writers).await {
        assert!(result.unwrap().is_some());
    }

    assert_eq!(cache.len(), 8);
    let total: u64 = (0..8)
        .map(|i| std::fs::metadata(cache.entry_path(&format!("frame_{}", i))).unwrap().len())
        .sum();
    assert_eq!(cache.size_bytes(), total);
}

#[tokio::test]
async fn test_clear_expired_while_writing() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheStore::open(config(dir.path())).await.unwrap());

    for i in 0..20 {
        cache
            .store(&format!("old_{}", i), json!(i), Some(Duration::from_millis(20)), None)
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(40)).await;

    let writer = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            for i in 0..20 {
                cache.store(&format!("new_{}", i), json!(i), None, None).await.unwrap();
            }
        })
    };
    let sweeper = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.clear_expired().await.unwrap() })
    };

    writer.await.unwrap();
    assert_eq!(sweeper.await.unwrap(), 20);

    for i in 0..20 {
        assert_eq!(cache.retrieve(&format!("new_{}", i)).await, Some(json!(i)));
    }
    assert_eq!(cache.len(), 20);
}

#[tokio::test]
async fn test_clear_removes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::open(config(dir.path())).await.unwrap();

    for i in 0..5 {
        cache.store(&format!("k{}", i), json!(i), None, None).await.unwrap();
    }
    cache.clear().await.unwrap();

    assert!(cache.is_empty());
    assert_eq!(cache.size_bytes(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    for i in 0..5 {
        assert!(cache.retrieve(&format!("k{}", i)).await.is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stores_under_tight_size_limit() {
    let dir = tempfile::tempdir().unwrap();
    let max_size_bytes = 600;
    let cache = Arc::new(
        CacheStore::open(
            CacheConfig::builder()
                .cache_dir(dir.path())
                .max_size_bytes(max_size_bytes)
                .enable_auto_cleanup(false)
                .build(),
        )
        .await
        .unwrap(),
    );

    for round in 0..20 {
        let writers = (0..40).map(|i| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .store(&format!("frame_{}", i % 6), json!({"round": round, "writer": i}), None, None)
                    .await
            })
        });

        for result in join_all(writers).await {
            // Every entry fits on its own, so no store may be refused
            result.unwrap().unwrap();
        }
        assert!(cache.size_bytes() <= max_size_bytes);
    }

    let entry_files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(entry_files, cache.len());
    let on_disk: u64 = (0..6)
        .map(|i| cache.entry_path(&format!("frame_{}", i)))
        .filter(|path| path.exists())
        .map(|path| std::fs::metadata(path).unwrap().len())
        .sum();
    assert_eq!(cache.size_bytes(), on_disk);
}
