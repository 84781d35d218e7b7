//! Control-region status words.
//!
//! One `StatusRegion` is shared between the coordinator and all workers.
//! All accesses are sequentially consistent; these words are the only
//! cross-worker synchronization outside the rings.

use std::sync::atomic::{AtomicU32, Ordering::SeqCst};

use crate::protocol::WorkerRole;

#[derive(Default)]
pub struct StatusRegion {
    /// One READY bit per worker role.
    ready: AtomicU32,
    /// Nonzero once the coordinator has requested shutdown.
    stop_requested: AtomicU32,
}

impl StatusRegion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, role: WorkerRole) {
        self.ready.fetch_or(1 << role.as_u8(), SeqCst);
    }

    pub fn clear_ready(&self, role: WorkerRole) {
        self.ready.fetch_and(!(1 << role.as_u8()), SeqCst);
    }

    pub fn is_ready(&self, role: WorkerRole) -> bool {
        self.ready.load(SeqCst) & (1 << role.as_u8()) != 0
    }

    pub fn all_ready(&self, roles: &[WorkerRole]) -> bool {
        roles.iter().all(|r| self.is_ready(*r))
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(1, SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(SeqCst) != 0
    }
}
