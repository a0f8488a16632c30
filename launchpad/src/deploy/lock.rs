//! Per-application deployment lock
//!
//! Presence of an application id in the set means a deployment for that
//! application is in flight. Admission is fail-fast: a second claim is
//! rejected, never queued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

/// Set of application ids currently being deployed
#[derive(Debug, Default)]
pub struct AppLocks {
    locked: Mutex<HashSet<i64>>,
}

impl AppLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the application, or `None` if it is already claimed.
    ///
    /// The claim is released when the returned guard is dropped, including
    /// while unwinding from a panic.
    pub fn try_lock(self: &Arc<Self>, app_id: i64) -> Option<AppLockGuard> {
        let mut locked = self.locked.lock().unwrap_or_else(|e| e.into_inner());
        if !locked.insert(app_id) {
            return None;
        }
        debug!("Locked app {} for deployment", app_id);
        Some(AppLockGuard {
            locks: Arc::clone(self),
            app_id,
        })
    }

    pub fn is_locked(&self, app_id: i64) -> bool {
        let locked = self.locked.lock().unwrap_or_else(|e| e.into_inner());
        locked.contains(&app_id)
    }

    fn unlock(&self, app_id: i64) {
        let mut locked = self.locked.lock().unwrap_or_else(|e| e.into_inner());
        locked.remove(&app_id);
        debug!("Unlocked app {}", app_id);
    }
}

/// Releases the application claim on drop
#[derive(Debug)]
pub struct AppLockGuard {
    locks: Arc<AppLocks>,
    app_id: i64,
}

impl AppLockGuard {
    pub fn app_id(&self) -> i64 {
        self.app_id
    }
}

impl Drop for AppLockGuard {
    fn drop(&mut self) {
        self.locks.unlock(self.app_id);
    }
}
