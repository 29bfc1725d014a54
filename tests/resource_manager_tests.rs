//! Integration tests for the async resource manager and client lifecycle

use async_trait::async_trait;
use ouroboros_resilience::{
    AsyncResourceManager, CleanupPath, ClientConfig, ManagerConfig, ResilienceError, ResilientClient, Result,
    ServiceBackend, ServiceKind, ServiceRequest, SessionHandle,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct CountingSession {
    closes: AtomicU32,
    releases: AtomicU32,
}

#[async_trait]
impl SessionHandle for CountingSession {
    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

impl CountingSession {
    fn total_releases(&self) -> u32 {
        self.closes.load(Ordering::SeqCst) + self.releases.load(Ordering::SeqCst)
    }
}

/// A session whose async close never completes
#[derive(Default)]
struct HangingSession {
    close_started: AtomicU32,
    releases: AtomicU32,
}

#[async_trait]
impl SessionHandle for HangingSession {
    async fn close(&self) -> Result<()> {
        self.close_started.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts how many times a task's future was dropped
struct DropCounter(Arc<AtomicU32>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn config(shutdown_timeout: Duration) -> ManagerConfig {
    ManagerConfig {
        name: "scene-client".to_string(),
        shutdown_timeout,
    }
}

fn track_pending(manager: &AsyncResourceManager, label: &str, dropped: &Arc<AtomicU32>) {
    let counter = DropCounter(Arc::clone(dropped));
    manager
        .track(label, async move {
            let _counter = counter;
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .unwrap();
}

#[tokio::test]
async fn test_close_twice_with_two_tracked_tasks() {
    let session = Arc::new(CountingSession::default());
    let manager = AsyncResourceManager::with_session(config(Duration::from_secs(1)), session.clone());
    let dropped = Arc::new(AtomicU32::new(0));

    track_pending(&manager, "scene-detect:video_1", &dropped);
    track_pending(&manager, "ocr:video_1", &dropped);
    assert_eq!(manager.active_count(), 2);

    let first = manager.close().await;
    assert_eq!(first.path, CleanupPath::Explicit);
    assert!(!first.already_closed);
    assert_eq!(first.cancelled, 2);
    assert_eq!(first.abandoned, 0);
    assert!(first.session_released);
    assert_eq!(manager.active_count(), 0);

    let second = manager.close().await;
    assert!(second.already_closed);
    assert_eq!(second.cancelled, 0);
    assert!(!second.session_released);

    assert_eq!(dropped.load(Ordering::SeqCst), 2);
    assert_eq!(session.closes.load(Ordering::SeqCst), 1);
    assert_eq!(session.total_releases(), 1);
    assert!(manager.is_closed());
}

#[tokio::test]
async fn test_concurrent_closes_release_session_once() {
    let session = Arc::new(CountingSession::default());
    let manager = AsyncResourceManager::with_session(config(Duration::from_secs(1)), session.clone());
    let dropped = Arc::new(AtomicU32::new(0));
    track_pending(&manager, "transcribe", &dropped);

    let (a, b) = futures::join!(manager.close(), manager.close());

    assert_eq!([a.already_closed, b.already_closed].iter().filter(|c| **c).count(), 1);
    assert_eq!(session.total_releases(), 1);
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_finished_tasks_leave_registry() {
    let manager = AsyncResourceManager::new(config(Duration::from_secs(1)));

    let handles: Vec<_> = (0..10)
        .map(|i| {
            manager
                .track(format!("task-{}", i), async move {
                    tokio::time::sleep(Duration::from_millis(5 * i)).await;
                    i
                })
                .unwrap()
        })
        .collect();

    let mut sum = 0;
    for handle in handles {
        sum += handle.await.unwrap();
    }
    assert_eq!(sum, 45);
    assert_eq!(manager.active_count(), 0);

    let report = manager.close().await;
    assert_eq!(report.cancelled, 0);
}

#[tokio::test]
async fn test_panicking_task_is_unregistered() {
    let manager = AsyncResourceManager::new(config(Duration::from_secs(1)));
    let handle = manager
        .track("explodes", async {
            panic!("backend bug");
        })
        .unwrap();

    assert!(handle.await.unwrap_err().is_panic());
    assert_eq!(manager.active_count(), 0);
    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unresponsive_task_is_abandoned() {
    let session = Arc::new(CountingSession::default());
    let manager = AsyncResourceManager::with_session(config(Duration::from_millis(50)), session.clone());

    manager
        .track("blocking-decode", async {
            // Never yields, so cannot observe cancellation in time
            std::thread::sleep(Duration::from_millis(400));
        })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = manager.close().await;

    assert_eq!(report.cancelled, 1);
    assert_eq!(report.abandoned, 1);
    assert!(report.session_released);
    assert_eq!(manager.active_count(), 0);
    assert_eq!(session.total_releases(), 1);
}

#[test]
fn test_fallback_synchronous_release() {
    let session = Arc::new(CountingSession::default());
    let manager = AsyncResourceManager::with_session(config(Duration::from_secs(1)), session.clone());

    drop(manager);

    assert_eq!(session.releases.load(Ordering::SeqCst), 1);
    assert_eq!(session.total_releases(), 1);
}

#[tokio::test]
async fn test_fallback_deferred_on_running_runtime() {
    let session = Arc::new(CountingSession::default());
    let manager = AsyncResourceManager::with_session(config(Duration::from_secs(1)), session.clone());
    let dropped = Arc::new(AtomicU32::new(0));
    track_pending(&manager, "vector-search", &dropped);

    // Returns immediately; cleanup runs as a spawned task
    drop(manager);
    assert_eq!(session.total_releases(), 0);

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    assert_eq!(session.closes.load(Ordering::SeqCst), 1);
    assert_eq!(session.total_releases(), 1);
}

#[test]
fn test_fallback_temporary_runtime() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let session = Arc::new(CountingSession::default());
    let manager = AsyncResourceManager::with_session(config(Duration::from_secs(1)), session.clone());
    let dropped = Arc::new(AtomicU32::new(0));
    {
        let _entered = runtime.enter();
        track_pending(&manager, "ocr:page_1", &dropped);
    }
    assert_eq!(manager.active_count(), 1);

    // No runtime on this thread and a task to await
    drop(manager);

    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    assert_eq!(session.closes.load(Ordering::SeqCst), 1);
    assert_eq!(session.total_releases(), 1);

    runtime.shutdown_timeout(Duration::from_secs(1));
}

#[tokio::test]
async fn test_close_bounds_hanging_session() {
    let session = Arc::new(HangingSession::default());
    let manager = AsyncResourceManager::with_session(config(Duration::from_millis(100)), session.clone());

    let report = tokio::time::timeout(Duration::from_secs(2), manager.close())
        .await
        .expect("close must not wait on the session forever");

    assert!(report.session_released);
    assert_eq!(session.close_started.load(Ordering::SeqCst), 1);
    assert_eq!(session.releases.load(Ordering::SeqCst), 1);

    let second = manager.close().await;
    assert!(second.already_closed);
    assert_eq!(session.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fallback_temporary_runtime_bounds_hanging_session() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let session = Arc::new(HangingSession::default());
    let manager = AsyncResourceManager::with_session(config(Duration::from_millis(100)), session.clone());
    let dropped = Arc::new(AtomicU32::new(0));
    {
        let _entered = runtime.enter();
        track_pending(&manager, "transcribe:ep9", &dropped);
    }

    // Dropped on a plain thread: cleanup runs on a temporary runtime
    let (done_tx, done_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        drop(manager);
        let _ = done_tx.send(());
    });

    assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok());
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    assert_eq!(session.close_started.load(Ordering::SeqCst), 1);
    assert_eq!(session.releases.load(Ordering::SeqCst), 1);

    runtime.shutdown_timeout(Duration::from_secs(1));
}

struct SlowBackend;

#[async_trait]
impl ServiceBackend for SlowBackend {
    fn kind(&self) -> ServiceKind {
        ServiceKind::SceneDetection
    }

    async fn invoke(&self, _request: &ServiceRequest) -> Result<Value> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(json!([]))
    }
}

#[tokio::test]
async fn test_client_close_cancels_spawned_calls() {
    let session = Arc::new(CountingSession::default());
    let client = ResilientClient::new(
        Arc::new(SlowBackend),
        ClientConfig::default(),
        None,
        Some(session.clone()),
    )
    .unwrap();

    let first = client
        .spawn_call(ServiceRequest::new("detect", json!({"video": 1})))
        .unwrap();
    let second = client
        .spawn_call(ServiceRequest::new("detect", json!({"video": 2})))
        .unwrap();
    assert_eq!(client.resources().active_count(), 2);

    let report = client.close().await;
    assert_eq!(report.cancelled, 2);

    assert!(first.await.unwrap_err().is_cancelled());
    assert!(second.await.unwrap_err().is_cancelled());
    assert_eq!(session.total_releases(), 1);

    let late = client.spawn_call(ServiceRequest::new("detect", json!({})));
    assert!(matches!(late, Err(ResilienceError::ShutdownError(_))));
}
