//! Per-worker snapshot pause/resume state machine.
//!
//! Entering pause is synchronous: the pause flag is raised the moment the
//! request is handled, which blocks new guest-observable work. The
//! acknowledgment is deferred until the worker's in-flight work reaches a
//! fixed point; the worker reports that via [`PauseCoordinator::poll_acks`].
//!
//! A resume can land while a pause is still draining (the coordinator may
//! time out and send a best-effort resume). The resume applies
//! immediately; the pause still acknowledges once the drain finishes, but
//! the completion carries `withdraw_globals: false` so the pause path
//! cannot undo shared state the resume already re-enabled. Workers with
//! multi-step withdraws must additionally recheck [`pause_flag`] before
//! each step.
//!
//! ```text
//! running --pause-req--> pausing --drain_done--> paused
//! paused --resume-req--> resuming --globals_ok--> running
//! pausing --resume-req--> (apply resume; finish drain; end state = running)
//! ```
//!
//! [`pause_flag`]: PauseCoordinator::pause_flag

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPhase {
    Running,
    Pausing,
    Paused,
    Resuming,
}

/// Completion of a pause drain: the requests to acknowledge and whether
/// the shared-state withdraw steps should still run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseCompletion {
    pub request_ids: Vec<u64>,
    pub withdraw_globals: bool,
}

#[derive(Default)]
pub struct PauseCoordinator {
    flag: bool,
    resuming: bool,
    pending: Vec<u64>,
}

impl PauseCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pause flag: true from the moment a pause is requested until a
    /// resume is applied. While set, no new guest-observable work may
    /// start.
    pub fn pause_flag(&self) -> bool {
        self.flag
    }

    pub fn phase(&self) -> SnapshotPhase {
        if self.resuming {
            return SnapshotPhase::Resuming;
        }
        match (self.flag, self.pending.is_empty()) {
            (true, false) => SnapshotPhase::Pausing,
            (true, true) => SnapshotPhase::Paused,
            (false, _) => SnapshotPhase::Running,
        }
    }

    /// Raises the pause flag and records the request for deferred ack.
    /// Safe to call repeatedly and before init.
    pub fn request_pause(&mut self, request_id: u64) {
        self.flag = true;
        self.resuming = false;
        self.pending.push(request_id);
    }

    /// Applies a resume: clears the flag immediately and enters the
    /// transient `Resuming` phase while the caller republishes
    /// shared-state globals; [`resume_complete`](Self::resume_complete)
    /// must follow before the resume is acknowledged. A pause still
    /// draining keeps draining; its eventual completion will see
    /// `withdraw_globals: false`.
    pub fn apply_resume(&mut self) {
        self.flag = false;
        self.resuming = true;
    }

    /// Marks the globals republished; the worker is running again.
    pub fn resume_complete(&mut self) {
        self.resuming = false;
    }

    /// Called by the worker loop once its in-flight work classes are
    /// quiescent. Returns the drained pause requests, if any.
    pub fn poll_acks(&mut self, quiescent: bool) -> Option<PauseCompletion> {
        if !quiescent || self.pending.is_empty() {
            return None;
        }
        Some(PauseCompletion {
            request_ids: std::mem::take(&mut self.pending),
            withdraw_globals: self.flag,
        })
    }
}
