//! Bounded parking and wake signaling for worker loops.
//!
//! A worker parks on its command ring with a bounded timeout and is woken
//! early by any producer holding a [`WakeHandle`]: a ring push, a
//! pending-RX arrival, or a stop request. The bound keeps a missed wake
//! from ever stalling a worker for more than one park interval.

use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::thread::Thread;
use std::time::Duration;

/// Default bounded park interval for worker loops.
pub const PARK_TIMEOUT: Duration = Duration::from_millis(250);

struct WakeInner {
    notified: AtomicBool,
    thread: Mutex<Option<Thread>>,
}

/// Consumer side. Create on the worker thread before first park.
pub struct WorkerParker {
    inner: Arc<WakeInner>,
}

/// Producer side. Cheap to clone; wakes the parked worker if any.
#[derive(Clone)]
pub struct WakeHandle {
    inner: Arc<WakeInner>,
}

impl Default for WorkerParker {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(WakeInner {
                notified: AtomicBool::new(false),
                thread: Mutex::new(None),
            }),
        }
    }

    pub fn wake_handle(&self) -> WakeHandle {
        WakeHandle {
            inner: self.inner.clone(),
        }
    }

    /// Parks the current thread until woken or `timeout` elapses. Returns
    /// immediately if a wake arrived since the last park.
    pub fn park_timeout(&self, timeout: Duration) {
        *self.inner.thread.lock().unwrap() = Some(std::thread::current());
        if self.inner.notified.swap(false, SeqCst) {
            return;
        }
        std::thread::park_timeout(timeout);
        self.inner.notified.store(false, SeqCst);
    }

    pub fn park(&self) {
        self.park_timeout(PARK_TIMEOUT);
    }
}

impl WakeHandle {
    pub fn wake(&self) {
        self.inner.notified.store(true, SeqCst);
        if let Some(thread) = self.inner.thread.lock().unwrap().as_ref() {
            thread.unpark();
        }
    }
}
