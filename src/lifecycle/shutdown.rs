//! Process-wide shutdown flag
//!
//! The owning binary sets this on its exit path. Fallback cleanup checks it
//! and skips work that needs runtime facilities which may already be gone.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

static PROCESS_SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);

/// Flag the process as shutting down. Idempotent.
pub fn begin_process_shutdown() {
    if !PROCESS_SHUTTING_DOWN.swap(true, Ordering::SeqCst) {
        info!("Process shutdown flagged; fallback cleanup disabled");
    }
}

pub fn is_process_shutting_down() -> bool {
    PROCESS_SHUTTING_DOWN.load(Ordering::SeqCst)
}
