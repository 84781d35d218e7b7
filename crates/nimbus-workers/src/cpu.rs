//! CPU worker: owns the VM runtime module lifecycle and serializes
//! snapshot save/restore RPCs on its snapshot-op chain.

use std::sync::Arc;

use tracing::debug;

use nimbus_ipc::protocol::{decode_command, Command, Event, WorkerRole};
use nimbus_ipc::wake::{WakeHandle, WorkerParker};
use nimbus_storage::BlobStore;

use crate::config::ConfigState;
use crate::op_chain::{SnapshotOp, SnapshotOpChain};
use crate::orchestrator::{execute_snapshot_op, SnapshotEngine};
use crate::pause::PauseCoordinator;
use crate::rpc::{validate_path, validate_request_id};
use crate::worker::WorkerLink;

pub struct CpuWorker {
    link: WorkerLink,
    parker: WorkerParker,
    engine: SnapshotEngine,
    op_chain: SnapshotOpChain,
    pause: PauseCoordinator,
    config: ConfigState,
    stopping: bool,
}

impl CpuWorker {
    pub fn new(link: WorkerLink, store: Arc<dyn BlobStore>) -> Self {
        Self {
            link,
            parker: WorkerParker::new(),
            engine: SnapshotEngine::new(store),
            op_chain: SnapshotOpChain::new(),
            pause: PauseCoordinator::new(),
            config: ConfigState::default(),
            stopping: false,
        }
    }

    pub fn wake_handle(&self) -> WakeHandle {
        self.parker.wake_handle()
    }

    /// Host wiring: the VM runtime module and its capture surface.
    pub fn engine_mut(&mut self) -> &mut SnapshotEngine {
        &mut self.engine
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
                // In-flight snapshot ops complete before the worker exits.
                while let Some(op) = self.op_chain.pop() {
                    execute_snapshot_op(&mut self.engine, &self.link, op);
                }
                break;
            }
            if !did_work {
                self.parker.park();
            }
        }
        self.link.status.clear_ready(WorkerRole::Cpu);
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Init { role } => {
                if role != WorkerRole::Cpu {
                    self.link.emit(&Event::Error {
                        message: format!("init role mismatch: got {}", role.name()),
                    });
                    self.link.status.clear_ready(WorkerRole::Cpu);
                    self.stopping = true;
                    return;
                }
                self.link.status.set_ready(WorkerRole::Cpu);
                self.link.emit(&Event::Ready {
                    role: WorkerRole::Cpu,
                });
            }
            Command::ConfigUpdate { version, json } => match self.config.apply_update(version, &json)
            {
                Ok(version) => self.link.emit(&Event::ConfigAck { version }),
                Err(message) => self.link.emit(&Event::Error { message }),
            },
            Command::VmPause { request_id } => {
                if let Err(error) = validate_request_id(request_id) {
                    self.link.emit(&Event::VmPaused {
                        request_id,
                        ok: false,
                        error: Some(error),
                    });
                    return;
                }
                debug!(request_id, "cpu pause requested");
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
                self.pause.resume_complete();
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
            | Command::Screenshot { .. }
            | Command::InputBatch { .. } => {}
            Command::Shutdown => self.stopping = true,
        }
    }

    fn poll(&mut self) -> bool {
        let mut did_work = false;

        // The snapshot-op chain: one op at a time, run to completion.
        while let Some(op) = self.op_chain.pop() {
            execute_snapshot_op(&mut self.engine, &self.link, op);
            did_work = true;
        }

        let quiescent = self.op_chain.is_empty();
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
