//! IO worker: device queues, the disk-I/O chain, and the device-state
//! snapshot orchestration.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::mpsc;
use std::sync::Arc;

use tracing::debug;

use nimbus_devices_input::{decode_batch, InputEvent};
use nimbus_ipc::protocol::{decode_command, Command, Event, WorkerRole};
use nimbus_ipc::wake::{WakeHandle, WorkerParker};
use nimbus_storage::BlobStore;

use crate::config::ConfigState;
use crate::op_chain::{SnapshotOp, SnapshotOpChain};
use crate::orchestrator::{execute_snapshot_op, SnapshotEngine};
use crate::pause::PauseCoordinator;
use crate::rpc::{validate_path, validate_request_id};
use crate::worker::WorkerLink;

/// One outstanding disk operation. An op may enqueue follow-up work (a
/// completion continuing the chain), which is why the pause drain below
/// runs to a fixed point rather than a snapshot of the queue length.
pub type DiskOp = Box<dyn FnOnce(&mut DiskIoChain) + Send>;

/// The linearizable queue of outstanding disk operations.
#[derive(Default)]
pub struct DiskIoChain {
    pending: VecDeque<DiskOp>,
    generation: u64,
}

impl DiskIoChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, op: DiskOp) {
        self.generation += 1;
        self.pending.push_back(op);
    }

    /// The chain tail observation used by the fixed-point drain: grows
    /// whenever any op is enqueued.
    pub fn observed_tail(&self) -> u64 {
        self.generation
    }

    pub fn is_quiescent(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn run_one(&mut self) -> bool {
        match self.pending.pop_front() {
            Some(op) => {
                op(self);
                true
            }
            None => false,
        }
    }

    /// Runs ops until the tail is unchanged across one full pass.
    pub fn drain_to_fixed_point(&mut self) {
        loop {
            let tail = self.observed_tail();
            while self.run_one() {}
            if self.observed_tail() == tail {
                break;
            }
        }
    }
}

/// Producer handle for injecting disk operations into a running worker.
#[derive(Clone)]
pub struct DiskOpSender {
    tx: mpsc::Sender<DiskOp>,
    wake: WakeHandle,
}

impl DiskOpSender {
    pub fn send(&self, op: DiskOp) {
        let _ = self.tx.send(op);
        self.wake.wake();
    }
}

pub type InputSink = Box<dyn FnMut(Vec<InputEvent>) + Send>;

pub struct IoWorker {
    link: WorkerLink,
    parker: WorkerParker,
    engine: SnapshotEngine,
    disk_chain: DiskIoChain,
    disk_rx: mpsc::Receiver<DiskOp>,
    disk_tx: mpsc::Sender<DiskOp>,
    /// New disk ops arriving while the pause flag is up; admitted on
    /// resume.
    deferred_disk_ops: VecDeque<DiskOp>,
    /// Gate on USB proxy completion-ring dispatch: completions touch
    /// guest memory and must not run while snapshot-paused.
    usb_completions_paused: Arc<AtomicBool>,
    pause: PauseCoordinator,
    op_chain: SnapshotOpChain,
    input_sink: Option<InputSink>,
    deferred_input: VecDeque<Vec<u8>>,
    config: ConfigState,
    initialized: bool,
    stopping: bool,
}

impl IoWorker {
    pub fn new(link: WorkerLink, store: Arc<dyn BlobStore>) -> Self {
        let (disk_tx, disk_rx) = mpsc::channel();
        Self {
            link,
            parker: WorkerParker::new(),
            engine: SnapshotEngine::new(store),
            disk_chain: DiskIoChain::new(),
            disk_rx,
            disk_tx,
            deferred_disk_ops: VecDeque::new(),
            usb_completions_paused: Arc::new(AtomicBool::new(false)),
            pause: PauseCoordinator::new(),
            op_chain: SnapshotOpChain::new(),
            input_sink: None,
            deferred_input: VecDeque::new(),
            config: ConfigState::default(),
            initialized: false,
            stopping: false,
        }
    }

    pub fn wake_handle(&self) -> WakeHandle {
        self.parker.wake_handle()
    }

    /// Host wiring: registry, runtime, coordinator blobs, reattach hook.
    pub fn engine_mut(&mut self) -> &mut SnapshotEngine {
        &mut self.engine
    }

    pub fn disk_op_sender(&self) -> DiskOpSender {
        DiskOpSender {
            tx: self.disk_tx.clone(),
            wake: self.parker.wake_handle(),
        }
    }

    /// Observable pause gate for the USB proxy completion path.
    pub fn usb_completions_paused(&self) -> Arc<AtomicBool> {
        self.usb_completions_paused.clone()
    }

    pub fn set_input_sink(&mut self, sink: InputSink) {
        self.input_sink = Some(sink);
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
                // Accepted snapshot ops run to completion before exit.
                self.drain_snapshot_ops();
                break;
            }
            if !did_work {
                self.parker.park();
            }
        }
        self.link.status.clear_ready(WorkerRole::Io);
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Init { role } => {
                if role != WorkerRole::Io {
                    self.link.emit(&Event::Error {
                        message: format!("init role mismatch: got {}", role.name()),
                    });
                    self.link.status.clear_ready(WorkerRole::Io);
                    self.stopping = true;
                    return;
                }
                self.initialized = true;
                self.link.status.set_ready(WorkerRole::Io);
                self.link.emit(&Event::Ready {
                    role: WorkerRole::Io,
                });
            }
            Command::ConfigUpdate { version, json } => match self.config.apply_update(version, &json)
            {
                Ok(version) => self.link.emit(&Event::ConfigAck { version }),
                Err(message) => self.link.emit(&Event::Error { message }),
            },
            Command::InputBatch { data } => {
                if !self.initialized {
                    debug!("dropping input batch received before init");
                } else if self.pause.pause_flag() {
                    self.deferred_input.push_back(data);
                } else {
                    self.deliver_input(&data);
                }
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
                debug!(request_id, "io pause requested");
                // Synchronous part of the pause: block new IO and the USB
                // completion dispatch path.
                self.pause.request_pause(request_id);
                self.usb_completions_paused.store(true, SeqCst);
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
                self.usb_completions_paused.store(false, SeqCst);
                self.pause.resume_complete();
                while let Some(op) = self.deferred_disk_ops.pop_front() {
                    self.disk_chain.enqueue(op);
                }
                while let Some(data) = self.deferred_input.pop_front() {
                    self.deliver_input(&data);
                }
                self.link.emit(&Event::VmResumed {
                    request_id,
                    ok: true,
                    error: None,
                });
            }
            Command::VmSave { request_id, path } => {
                if let Some(error) = validate_request_id(request_id)
                    .err()
                    .or_else(|| validate_path(&path).err())
                {
                    self.link.emit(&Event::VmSaved {
                        request_id,
                        ok: false,
                        error: Some(error),
                    });
                    return;
                }
                self.op_chain.enqueue(SnapshotOp::Save { request_id, path });
            }
            Command::VmRestore { request_id, path } => {
                if let Some(error) = validate_request_id(request_id)
                    .err()
                    .or_else(|| validate_path(&path).err())
                {
                    self.link.emit(&Event::VmRestored {
                        request_id,
                        ok: false,
                        error: Some(error),
                        cpu: Vec::new(),
                        mmu: Vec::new(),
                        devices: Vec::new(),
                    });
                    return;
                }
                self.op_chain
                    .enqueue(SnapshotOp::Restore { request_id, path });
            }
            Command::Nop { .. }
            | Command::Tick { .. }
            | Command::SubmitGpu { .. }
            | Command::Screenshot { .. } => {}
            Command::Shutdown => self.stopping = true,
        }
    }

    fn deliver_input(&mut self, data: &[u8]) {
        match decode_batch(data) {
            Ok(events) => {
                if let Some(sink) = self.input_sink.as_mut() {
                    sink(events);
                }
            }
            Err(err) => self.link.emit(&Event::Error {
                message: format!("bad input batch: {err}"),
            }),
        }
    }

    fn drain_snapshot_ops(&mut self) {
        while let Some(op) = self.op_chain.pop() {
            execute_snapshot_op(&mut self.engine, &self.link, op);
        }
    }

    fn poll(&mut self) -> bool {
        let mut did_work = false;

        // Admit newly injected disk ops; while the pause flag is up they
        // count as new IO and wait for the resume.
        while let Ok(op) = self.disk_rx.try_recv() {
            if self.pause.pause_flag() {
                self.deferred_disk_ops.push_back(op);
            } else {
                self.disk_chain.enqueue(op);
            }
            did_work = true;
        }

        // In-flight disk work always runs to its fixed point, paused or
        // not: a pause must wait for it, and completions may extend it.
        if !self.disk_chain.is_quiescent() {
            self.disk_chain.drain_to_fixed_point();
            did_work = true;
        }

        while let Some(op) = self.op_chain.pop() {
            execute_snapshot_op(&mut self.engine, &self.link, op);
            did_work = true;
        }

        let quiescent = self.disk_chain.is_quiescent() && self.op_chain.is_empty();
        if let Some(completion) = self.pause.poll_acks(quiescent) {
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
