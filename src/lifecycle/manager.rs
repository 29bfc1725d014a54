//! Tracking and teardown of a client's background tasks and network session

use crate::error::{ResilienceError, Result};
use crate::lifecycle::shutdown::is_process_shutting_down;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Resource manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Name used in logs (usually the owning client)
    pub name: String,

    /// How long `close()` waits for cancelled tasks to acknowledge, and
    /// separately for the session to close
    pub shutdown_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: "resource-manager".to_string(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.shutdown_timeout.is_zero() {
            return Err("shutdown_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Network session/connection owned by a client
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Asynchronous teardown, used by `close()`
    async fn close(&self) -> Result<()>;

    /// Synchronous release, used when no runtime is available
    fn release(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tracked task as reported by [`AsyncResourceManager::active_tasks`]
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub label: String,
    pub started_at: DateTime<Utc>,
}

/// How a close was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CleanupPath {
    /// `close()` called by the owner
    Explicit,
    /// No runtime and nothing to await: session released synchronously
    Synchronous,
    /// Cleanup spawned onto the runtime current at drop time
    Deferred,
    /// Cleanup run to completion on a short-lived runtime
    TemporaryRuntime,
    /// Process shutting down or thread panicking: nothing done
    Skipped,
}

/// Outcome of a close
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseReport {
    pub path: CleanupPath,
    /// The manager was already closed; nothing was done
    pub already_closed: bool,
    /// Tasks aborted by this close
    pub cancelled: usize,
    /// Tasks that did not acknowledge cancellation within the timeout
    pub abandoned: usize,
    /// Whether this close released the session
    pub session_released: bool,
}

impl CloseReport {
    fn noop(path: CleanupPath) -> Self {
        Self {
            path,
            already_closed: true,
            cancelled: 0,
            abandoned: 0,
            session_released: false,
        }
    }
}

/// Choose how to clean up a manager dropped without `close()`
pub fn select_fallback_path(has_active_tasks: bool, runtime_available: bool, shutting_down: bool) -> CleanupPath {
    if shutting_down {
        CleanupPath::Skipped
    } else if runtime_available {
        CleanupPath::Deferred
    } else if !has_active_tasks {
        CleanupPath::Synchronous
    } else {
        CleanupPath::TemporaryRuntime
    }
}

struct TrackedTask {
    info: TaskInfo,
    abort: Option<AbortHandle>,
    aborted: bool,
}

struct Shared {
    name: String,
    shutdown_timeout: Duration,
    tasks: Mutex<HashMap<TaskId, TrackedTask>>,
    /// Number of registered tasks, for waiting without polling
    active: watch::Sender<usize>,
    closed: AtomicBool,
    /// Taken exactly once by whichever close path runs first
    session: Mutex<Option<Arc<dyn SessionHandle>>>,
}

impl Shared {
    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, TrackedTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_session(&self) -> Option<Arc<dyn SessionHandle>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn unregister(&self, id: TaskId) {
        let mut tasks = self.tasks();
        if tasks.remove(&id).is_some() {
            self.active.send_replace(tasks.len());
        }
    }

    fn abort_all(&self) -> usize {
        let handles: Vec<AbortHandle> = {
            let mut tasks = self.tasks();
            tasks
                .values_mut()
                .filter(|task| !task.aborted)
                .filter_map(|task| {
                    let abort = task.abort.clone()?;
                    debug!(manager = %self.name, task = %task.info.label, "Cancelling task");
                    task.aborted = true;
                    Some(abort)
                })
                .collect()
        };

        // Aborted futures drop their registration, which takes the lock
        for handle in &handles {
            handle.abort();
        }
        handles.len()
    }

    /// Wait for the registry to drain; returns the number abandoned
    async fn wait_for_tasks(&self) -> usize {
        let mut active = self.active.subscribe();
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            active.wait_for(|count| *count == 0).await.is_ok()
        })
        .await;
        if matches!(drained, Ok(true)) {
            return 0;
        }

        let mut tasks = self.tasks();
        let labels: Vec<String> = tasks.values().map(|t| t.info.label.clone()).collect();
        tasks.clear();
        self.active.send_replace(0);

        if !labels.is_empty() {
            warn!(
                manager = %self.name,
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                tasks = ?labels,
                "Abandoning tasks that did not acknowledge cancellation"
            );
        }
        labels.len()
    }

    /// Async session teardown bounded by the shutdown timeout, falling back
    /// to the synchronous release
    async fn close_session(&self, session: Arc<dyn SessionHandle>) {
        match tokio::time::timeout(self.shutdown_timeout, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(manager = %self.name, "Session close failed: {}", e),
            Err(_) => {
                warn!(
                    manager = %self.name,
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "Session close timed out; releasing synchronously"
                );
                session.release();
            }
        }
    }

    async fn close(&self, path: CleanupPath) -> CloseReport {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!(manager = %self.name, "Resource manager already closed");
            return CloseReport::noop(path);
        }

        info!(manager = %self.name, ?path, "Closing resource manager");

        let cancelled = self.abort_all();
        let abandoned = self.wait_for_tasks().await;

        let session_released = match self.take_session() {
            Some(session) => {
                self.close_session(session).await;
                true
            }
            None => false,
        };

        info!(
            manager = %self.name,
            cancelled,
            abandoned,
            session_released,
            "Resource manager closed"
        );

        CloseReport {
            path,
            already_closed: false,
            cancelled,
            abandoned,
            session_released,
        }
    }
}

/// Removes a task's registration when its future is dropped, whether it
/// completed, panicked or was cancelled
struct Registration {
    shared: Arc<Shared>,
    id: TaskId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.shared.unregister(self.id);
    }
}

/// Lifecycle guard for a remote-service client.
///
/// Tracks spawned tasks and owns the network session. Call [`close`] on the
/// way out; dropping an open manager falls back to a best-effort cleanup
/// chosen by [`select_fallback_path`].
///
/// [`close`]: AsyncResourceManager::close
pub struct AsyncResourceManager {
    shared: Arc<Shared>,
}

impl AsyncResourceManager {
    /// Create a manager without a session
    pub fn new(config: ManagerConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a manager owning `session`
    pub fn with_session(config: ManagerConfig, session: Arc<dyn SessionHandle>) -> Self {
        Self::build(config, Some(session))
    }

    fn build(config: ManagerConfig, session: Option<Arc<dyn SessionHandle>>) -> Self {
        debug!(manager = %config.name, has_session = session.is_some(), "Creating resource manager");
        let (active, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                name: config.name,
                shutdown_timeout: config.shutdown_timeout,
                tasks: Mutex::new(HashMap::new()),
                active,
                closed: AtomicBool::new(false),
                session: Mutex::new(session),
            }),
        }
    }

    /// Spawn `future` on the current runtime and track it until it finishes.
    ///
    /// Fails with `ShutdownError` once the manager is closed and with
    /// `ConfigError` when called outside a Tokio runtime.
    pub fn track<F, T>(&self, label: impl Into<String>, future: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(ResilienceError::ShutdownError(format!(
                "resource manager {} is closed",
                self.shared.name
            )));
        }

        let runtime = Handle::try_current().map_err(|_| {
            ResilienceError::ConfigError("tracking a task requires a Tokio runtime".to_string())
        })?;

        let info = TaskInfo {
            id: TaskId::new(),
            label: label.into(),
            started_at: Utc::now(),
        };
        let id = info.id;
        debug!(manager = %self.shared.name, task = %info.label, "Tracking task");

        {
            let mut tasks = self.shared.tasks();
            if self.is_closed() {
                return Err(ResilienceError::ShutdownError(format!(
                    "resource manager {} closed while tracking {}",
                    self.shared.name, info.label
                )));
            }
            tasks.insert(
                id,
                TrackedTask {
                    info,
                    abort: None,
                    aborted: false,
                },
            );
            self.shared.active.send_replace(tasks.len());
        }

        let registration = Registration {
            shared: Arc::clone(&self.shared),
            id,
        };
        let handle = runtime.spawn(async move {
            let _registration = registration;
            future.await
        });

        // A close that started before the abort handle was stored missed this task
        let missed_by_close = {
            let mut tasks = self.shared.tasks();
            match tasks.get_mut(&id) {
                Some(task) => {
                    task.abort = Some(handle.abort_handle());
                    let missed = self.shared.closed.load(Ordering::SeqCst) && !task.aborted;
                    task.aborted |= missed;
                    missed
                }
                None => false,
            }
        };
        if missed_by_close {
            handle.abort();
        }

        Ok(handle)
    }

    /// Number of tasks still running
    pub fn active_count(&self) -> usize {
        self.shared.tasks().len()
    }

    pub fn active_tasks(&self) -> Vec<TaskInfo> {
        self.shared.tasks().values().map(|t| t.info.clone()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// The session, until a close has released it
    pub fn session(&self) -> Option<Arc<dyn SessionHandle>> {
        self.shared
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Cancel every tracked task, wait up to the shutdown timeout, release
    /// the session. A second call is a no-op.
    ///
    /// Task shutdown and session teardown are each bounded by the shutdown
    /// timeout.
    pub async fn close(&self) -> CloseReport {
        self.shared.close(CleanupPath::Explicit).await
    }

    fn fallback_cleanup(&self) {
        let shared = &self.shared;
        let runtime = Handle::try_current().ok();
        let shutting_down = is_process_shutting_down() || std::thread::panicking();
        let path = select_fallback_path(self.active_count() > 0, runtime.is_some(), shutting_down);

        match (path, runtime) {
            (CleanupPath::Skipped, _) => {}
            (CleanupPath::Deferred, Some(runtime)) => {
                warn!(manager = %shared.name, "Resource manager dropped without close(); deferring cleanup");
                let shared = Arc::clone(shared);
                runtime.spawn(async move {
                    shared.close(CleanupPath::Deferred).await;
                });
            }
            (CleanupPath::TemporaryRuntime, _) => {
                warn!(manager = %shared.name, "Resource manager dropped without close(); cleaning up on a temporary runtime");
                match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(temporary) => {
                        temporary.block_on(shared.close(CleanupPath::TemporaryRuntime));
                    }
                    Err(e) => {
                        warn!(manager = %shared.name, "Failed to build cleanup runtime: {}", e);
                        self.release_synchronously();
                    }
                }
            }
            _ => {
                debug!(manager = %shared.name, "Releasing resource manager synchronously");
                self.release_synchronously();
            }
        }
    }

    fn release_synchronously(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.abort_all();
        if let Some(session) = self.shared.take_session() {
            session.release();
        }
    }
}

impl Drop for AsyncResourceManager {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.fallback_cleanup();
        }
    }
}
