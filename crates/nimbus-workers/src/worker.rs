//! Ring plumbing shared by every worker loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nimbus_ipc::protocol::{decode_event, encode_command, encode_event, Command, Event};
use nimbus_ipc::ring::RingBuffer;
use nimbus_ipc::status::StatusRegion;
use nimbus_ipc::wake::WakeHandle;

/// One worker's shared-memory attachments: its command ring (coordinator
/// to worker), event ring (worker to coordinator) and the status words.
#[derive(Clone)]
pub struct WorkerLink {
    pub cmd: Arc<RingBuffer>,
    pub evt: Arc<RingBuffer>,
    pub status: Arc<StatusRegion>,
}

impl WorkerLink {
    pub fn new(cmd_capacity: usize, evt_capacity: usize) -> Self {
        Self {
            cmd: Arc::new(RingBuffer::new(cmd_capacity)),
            evt: Arc::new(RingBuffer::new(evt_capacity)),
            status: Arc::new(StatusRegion::new()),
        }
    }

    pub fn emit(&self, event: &Event) {
        self.evt.push_spinning(&encode_event(event));
    }
}

/// Coordinator-side driver for one worker: pushes commands, wakes the
/// worker, drains its events.
pub struct CoordinatorHandle {
    link: WorkerLink,
    wake: WakeHandle,
}

impl CoordinatorHandle {
    pub fn new(link: WorkerLink, wake: WakeHandle) -> Self {
        Self { link, wake }
    }

    pub fn status(&self) -> &StatusRegion {
        &self.link.status
    }

    pub fn send(&self, command: &Command) {
        self.link.cmd.push_spinning(&encode_command(command));
        self.wake.wake();
    }

    pub fn wake(&self) {
        self.wake.wake();
    }

    pub fn try_recv(&self) -> Option<Event> {
        let bytes = self.link.evt.try_pop().ok()?;
        decode_event(&bytes).ok()
    }

    /// Blocks (politely) until the worker emits an event or the deadline
    /// passes.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Drains events until one matches `pred`, or times out.
    pub fn recv_matching(
        &self,
        timeout: Duration,
        mut pred: impl FnMut(&Event) -> bool,
    ) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        loop {
            while let Some(event) = self.try_recv() {
                if pred(&event) {
                    return Some(event);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
