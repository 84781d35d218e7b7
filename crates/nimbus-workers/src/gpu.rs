//! GPU worker: presenter ticks, screenshots, telemetry, and the pause
//! gate around all of them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use nimbus_ipc::protocol::{decode_command, Command, Event, WorkerRole};
use nimbus_ipc::wake::{WakeHandle, WorkerParker};

use crate::config::ConfigState;
use crate::pause::PauseCoordinator;
use crate::rpc::{failure_from_snapshot_error, validate_request_id};
use crate::shared_state::{SharedBufferRef, SharedStateRegistry};
use crate::worker::WorkerLink;

/// The pluggable presenter backend. Hooks run on the worker loop; a hook
/// that is mid-call when a pause arrives therefore completes before the
/// pause is acknowledged.
pub trait Presenter: Send {
    fn present(&mut self, frame_id: u64);
    fn screenshot(&mut self, request_id: u64) -> bool;
    fn submit(&mut self, data: &[u8]);
    fn telemetry(&mut self) {}
}

pub struct GpuWorker {
    link: WorkerLink,
    parker: WorkerParker,
    presenter: Box<dyn Presenter>,
    pause: PauseCoordinator,
    shared: Arc<SharedStateRegistry>,
    scanout_ref: SharedBufferRef,
    cursor_ref: SharedBufferRef,
    /// Submits received while pausing/paused; dispatched on resume.
    queued_submits: VecDeque<(u64, Vec<u8>)>,
    config: ConfigState,
    telemetry_period: Option<Duration>,
    last_telemetry: Instant,
    initialized: bool,
    stopping: bool,
}

impl GpuWorker {
    pub fn new(
        link: WorkerLink,
        presenter: Box<dyn Presenter>,
        scanout_ref: SharedBufferRef,
        cursor_ref: SharedBufferRef,
    ) -> Self {
        Self {
            link,
            parker: WorkerParker::new(),
            presenter,
            pause: PauseCoordinator::new(),
            shared: Arc::new(SharedStateRegistry::new()),
            scanout_ref,
            cursor_ref,
            queued_submits: VecDeque::new(),
            config: ConfigState::default(),
            telemetry_period: None,
            last_telemetry: Instant::now(),
            initialized: false,
            stopping: false,
        }
    }

    pub fn wake_handle(&self) -> WakeHandle {
        self.parker.wake_handle()
    }

    /// The worker's published shared-state view, for in-worker readers
    /// and host-side observers.
    pub fn shared_state(&self) -> Arc<SharedStateRegistry> {
        self.shared.clone()
    }

    pub fn set_telemetry_period(&mut self, period: Duration) {
        self.telemetry_period = Some(period);
    }

    pub fn run(&mut self) {
        loop {
            let mut did_work = false;
            while let Ok(bytes) = self.link.cmd.try_pop() {
                did_work = true;
                match decode_command(&bytes) {
                    Ok(cmd) => self.handle_command(cmd),
                    Err(err) => self.link.emit(&Event::Error {
                        message: format!("bad command: {err}"),
                    }),
                }
                if self.stopping {
                    break;
                }
            }
            did_work |= self.poll();
            if self.stopping || self.link.status.stop_requested() {
                break;
            }
            if !did_work {
                self.parker.park();
            }
        }
        self.link.status.clear_ready(WorkerRole::Gpu);
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Init { role } => {
                // A role mismatch means the coordinator wired the wrong
                // buffer to this worker. That is fatal.
                if role != WorkerRole::Gpu {
                    self.link.emit(&Event::Error {
                        message: format!("init role mismatch: got {}", role.name()),
                    });
                    self.link.status.clear_ready(WorkerRole::Gpu);
                    self.stopping = true;
                    return;
                }
                self.initialized = true;
                // A pause honored before init keeps the globals withheld
                // until the matching resume.
                if !self.pause.pause_flag() {
                    self.shared.publish_scanout(self.scanout_ref);
                    self.shared.publish_cursor(self.cursor_ref);
                }
                self.link.status.set_ready(WorkerRole::Gpu);
                self.link.emit(&Event::Ready {
                    role: WorkerRole::Gpu,
                });
            }
            Command::ConfigUpdate { version, json } => match self.config.apply_update(version, &json)
            {
                Ok(version) => self.link.emit(&Event::ConfigAck { version }),
                Err(message) => self.link.emit(&Event::Error { message }),
            },
            Command::Tick { frame_id } => {
                // Accepted while pausing, but no present pass starts.
                if self.initialized && !self.pause.pause_flag() {
                    self.presenter.present(frame_id);
                }
            }
            Command::SubmitGpu { fence, data } => {
                if self.pause.pause_flag() {
                    self.queued_submits.push_back((fence, data));
                } else {
                    self.presenter.submit(&data);
                    self.link.emit(&Event::SubmitComplete { fence });
                }
            }
            Command::Screenshot { request_id } => {
                if validate_request_id(request_id).is_err() {
                    self.link.emit(&Event::ScreenshotDone {
                        request_id,
                        ok: false,
                    });
                    return;
                }
                let ok = self.presenter.screenshot(request_id);
                self.link.emit(&Event::ScreenshotDone { request_id, ok });
            }
            Command::VmPause { request_id } => {
                if let Err(error) = validate_request_id(request_id) {
                    self.link.emit(&Event::VmPaused {
                        request_id,
                        ok: false,
                        error: Some(error),
                    });
                    return;
                }
                debug!(request_id, "gpu pause requested");
                self.pause.request_pause(request_id);
            }
            Command::VmResume { request_id } => {
                if let Err(error) = validate_request_id(request_id) {
                    self.link.emit(&Event::VmResumed {
                        request_id,
                        ok: false,
                        error: Some(error),
                    });
                    return;
                }
                self.pause.apply_resume();
                if self.initialized {
                    self.shared.publish_scanout(self.scanout_ref);
                    self.shared.publish_cursor(self.cursor_ref);
                }
                self.pause.resume_complete();
                while let Some((fence, data)) = self.queued_submits.pop_front() {
                    self.presenter.submit(&data);
                    self.link.emit(&Event::SubmitComplete { fence });
                }
                self.link.emit(&Event::VmResumed {
                    request_id,
                    ok: true,
                    error: None,
                });
            }
            // The GPU worker owns no VM runtime; snapshot I/O lives on
            // the CPU/IO workers.
            Command::VmSave { request_id, .. } => {
                self.link.emit(&Event::VmSaved {
                    request_id,
                    ok: false,
                    error: Some(failure_from_snapshot_error(
                        &nimbus_snapshot::SnapshotError::MissingRuntime,
                    )),
                });
            }
            Command::VmRestore { request_id, .. } => {
                self.link.emit(&Event::VmRestored {
                    request_id,
                    ok: false,
                    error: Some(failure_from_snapshot_error(
                        &nimbus_snapshot::SnapshotError::MissingRuntime,
                    )),
                    cpu: Vec::new(),
                    mmu: Vec::new(),
                    devices: Vec::new(),
                });
            }
            Command::Nop { .. } | Command::InputBatch { .. } => {}
            Command::Shutdown => self.stopping = true,
        }
    }

    fn poll(&mut self) -> bool {
        let mut did_work = false;

        if let Some(period) = self.telemetry_period {
            if self.initialized
                && !self.pause.pause_flag()
                && self.last_telemetry.elapsed() >= period
            {
                self.presenter.telemetry();
                self.last_telemetry = Instant::now();
                did_work = true;
            }
        }

        // Presenter hooks run inline on this loop, so by the time we poll
        // there is no in-flight present/screenshot/telemetry call left.
        if let Some(completion) = self.pause.poll_acks(true) {
            if completion.withdraw_globals {
                // Recheck the flag before each withdraw so a racing
                // resume is never overwritten.
                if self.pause.pause_flag() {
                    self.shared.withdraw_scanout();
                }
                if self.pause.pause_flag() {
                    self.shared.withdraw_cursor();
                }
            }
            for request_id in completion.request_ids {
                self.link.emit(&Event::VmPaused {
                    request_id,
                    ok: true,
                    error: None,
                });
            }
            did_work = true;
        }

        did_work
    }
}
