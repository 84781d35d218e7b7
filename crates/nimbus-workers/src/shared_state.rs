//! Worker-scoped shared-state publication.
//!
//! The GPU worker publishes its scanout and cursor buffer references for
//! the rest of the worker (and host-side observers) to read. Pause
//! withdraws them; resume publishes them again. All pause/resume handling
//! must go through this registry so every withdraw step can be guarded by
//! a pause-flag recheck.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};

/// A published reference into one of the init-time shared regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedBufferRef {
    pub offset: usize,
    pub len: usize,
}

#[derive(Default)]
struct Slot {
    published: AtomicBool,
    offset: AtomicUsize,
    len: AtomicUsize,
}

impl Slot {
    fn publish(&self, r: SharedBufferRef) {
        self.offset.store(r.offset, SeqCst);
        self.len.store(r.len, SeqCst);
        self.published.store(true, SeqCst);
    }

    fn withdraw(&self) {
        self.published.store(false, SeqCst);
    }

    fn get(&self) -> Option<SharedBufferRef> {
        if !self.published.load(SeqCst) {
            return None;
        }
        Some(SharedBufferRef {
            offset: self.offset.load(SeqCst),
            len: self.len.load(SeqCst),
        })
    }
}

/// Publication registry for the scanout and cursor buffers. Shareable
/// (`Arc`) so readers outside the owning loop see withdraws immediately.
#[derive(Default)]
pub struct SharedStateRegistry {
    scanout: Slot,
    cursor: Slot,
}

impl SharedStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_scanout(&self, r: SharedBufferRef) {
        self.scanout.publish(r);
    }

    pub fn publish_cursor(&self, r: SharedBufferRef) {
        self.cursor.publish(r);
    }

    pub fn withdraw_scanout(&self) {
        self.scanout.withdraw();
    }

    pub fn withdraw_cursor(&self) {
        self.cursor.withdraw();
    }

    pub fn scanout(&self) -> Option<SharedBufferRef> {
        self.scanout.get()
    }

    pub fn cursor(&self) -> Option<SharedBufferRef> {
        self.cursor.get()
    }
}
