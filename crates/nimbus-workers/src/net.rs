//! NET worker core: only the park/wake discipline is part of the
//! control plane. The worker parks on its command ring and the
//! pending-RX condition simultaneously, so a shutdown arriving while RX
//! is blocked still wakes it within one bounded park interval.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::SeqCst};
use std::sync::Arc;

use nimbus_ipc::protocol::{decode_command, Command, Event, WorkerRole};
use nimbus_ipc::wake::{WakeHandle, WorkerParker};

use crate::config::ConfigState;
use crate::worker::WorkerLink;

/// Producer side of the pending-RX condition: the tunnel client signals
/// it when frames are queued for the guest.
#[derive(Clone)]
pub struct PendingRxHandle {
    flag: Arc<AtomicBool>,
    wake: WakeHandle,
}

impl PendingRxHandle {
    pub fn signal(&self) {
        self.flag.store(true, SeqCst);
        self.wake.wake();
    }
}

pub struct NetWorker {
    link: WorkerLink,
    parker: WorkerParker,
    pending_rx: Arc<AtomicBool>,
    rx_flushes: Arc<AtomicU64>,
    config: ConfigState,
    stopping: bool,
}

impl NetWorker {
    pub fn new(link: WorkerLink) -> Self {
        Self {
            link,
            parker: WorkerParker::new(),
            pending_rx: Arc::new(AtomicBool::new(false)),
            rx_flushes: Arc::new(AtomicU64::new(0)),
            config: ConfigState::default(),
            stopping: false,
        }
    }

    pub fn wake_handle(&self) -> WakeHandle {
        self.parker.wake_handle()
    }

    pub fn pending_rx_handle(&self) -> PendingRxHandle {
        PendingRxHandle {
            flag: self.pending_rx.clone(),
            wake: self.parker.wake_handle(),
        }
    }

    /// Number of pending-RX flushes performed, for observers.
    pub fn rx_flush_counter(&self) -> Arc<AtomicU64> {
        self.rx_flushes.clone()
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

            if self.pending_rx.swap(false, SeqCst) {
                // Forward queued RX frames to the guest rings.
                self.rx_flushes.fetch_add(1, SeqCst);
                did_work = true;
            }

            if self.stopping || self.link.status.stop_requested() {
                break;
            }
            if !did_work {
                // Parked on both the command ring and the pending-RX
                // condition: either producer wakes us, and the bounded
                // timeout caps the worst case.
                self.parker.park();
            }
        }
        self.link.status.clear_ready(WorkerRole::Net);
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Init { role } => {
                if role != WorkerRole::Net {
                    self.link.emit(&Event::Error {
                        message: format!("init role mismatch: got {}", role.name()),
                    });
                    self.link.status.clear_ready(WorkerRole::Net);
                    self.stopping = true;
                    return;
                }
                self.link.status.set_ready(WorkerRole::Net);
                self.link.emit(&Event::Ready {
                    role: WorkerRole::Net,
                });
            }
            Command::ConfigUpdate { version, json } => match self.config.apply_update(version, &json)
            {
                Ok(version) => self.link.emit(&Event::ConfigAck { version }),
                Err(message) => self.link.emit(&Event::Error { message }),
            },
            Command::Shutdown => self.stopping = true,
            _ => {}
        }
    }
}
