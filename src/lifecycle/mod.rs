//! # Client Lifecycle
//!
//! [`AsyncResourceManager`] owns a client's network session and the tasks it
//! spawns. `close()` is the contract; `Drop` is a logged safety net.

pub mod manager;
pub mod shutdown;

pub use manager::{
    select_fallback_path, AsyncResourceManager, CleanupPath, CloseReport, ManagerConfig, SessionHandle, TaskId,
    TaskInfo,
};
pub use shutdown::{begin_process_shutdown, is_process_shutting_down};
