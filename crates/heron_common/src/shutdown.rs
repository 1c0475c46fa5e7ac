//! Interruptible wake-up signal for background tasks.
//!
//! Background workers sleep until a deadline, but both shutdown and a
//! deadline change must wake them immediately — a bare `thread::sleep`
//! would pin the old deadline until it elapses. The Condvar-backed wait
//! here responds to either event within milliseconds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// A cooperative wake-up/shutdown signal shared between a background task
/// and its control plane.
#[derive(Clone)]
pub struct TaskSignal {
    inner: Arc<TaskSignalInner>,
}

struct TaskSignalInner {
    stopped: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl TaskSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TaskSignalInner {
                stopped: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Request shutdown. Wakes all waiters immediately.
    pub fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.condvar.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Wake the task without shutting it down, so it re-reads its deadline.
    pub fn notify(&self) {
        self.inner.condvar.notify_all();
    }

    /// Sleep for at most `duration`, waking early on `notify()` or
    /// `shutdown()`. Returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        let guard = self.inner.mutex.lock().unwrap_or_else(|e| e.into_inner());
        let _ = self
            .inner
            .condvar
            .wait_timeout(guard, duration)
            .unwrap_or_else(|e| e.into_inner());
        self.is_shutdown()
    }
}

impl Default for TaskSignal {
    fn default() -> Self {
        Self::new()
    }
}
