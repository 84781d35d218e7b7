//! Device-state save/restore orchestration.
//!
//! `SnapshotEngine` composes the per-device hooks from the registry with
//! the VM runtime's snapshot export. On save it aggregates controller
//! blobs into their containers, merges the three blob tiers and hands the
//! frame to the runtime; on restore it normalizes kinds, dispatches blobs
//! to load hooks, applies the TCP restore policy and retains the
//! canonical blob list for forward-compatible round trips.

use std::sync::Arc;

use tracing::warn;

use nimbus_io_snapshot::io::input::state::VirtioInputContainer;
use nimbus_io_snapshot::io::kind::{
    merge_blob_tiers, normalize_kind, numeric_kind_name, parse_numeric_kind, CanonicalKind,
    DeviceBlob, NormalizedKind,
};
use nimbus_io_snapshot::io::network::state::TcpRestorePolicy;
use nimbus_io_snapshot::io::state::peek_device_id;
use nimbus_io_snapshot::io::usb::container::UsbContainer;
use nimbus_snapshot::{DeviceId, DeviceState, SnapshotError, SnapshotFrame, VmRuntimeModule};
use nimbus_storage::BlobStore;

use nimbus_ipc::protocol::{Event, RestoredBlob};

use crate::op_chain::SnapshotOp;
use crate::registry::{DeviceRegistry, InputSubDevice, UsbController};
use crate::rpc::failure_from_snapshot_error;
use crate::worker::WorkerLink;

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Capture surface of the VM runtime: raw CPU and MMU byte ranges.
pub trait GuestStateCapture: Send {
    fn cpu_state(&self) -> Vec<u8>;
    fn mmu_state(&self) -> Vec<u8>;
}

/// A loaded VM runtime: state capture plus the snapshot export surface.
pub struct RuntimeHandle {
    pub capture: Box<dyn GuestStateCapture>,
    pub module: VmRuntimeModule,
}

/// What a restore hands back to the RPC reply: guest state plus the
/// canonical-form device list (including blobs this build cannot
/// interpret).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub cpu: Vec<u8>,
    pub mmu: Vec<u8>,
    pub devices: Vec<DeviceBlob>,
}

/// Invoked after a restore, before the RPC reply: snapshot restore drops
/// host storage handles by design, and the device layer re-attaches them
/// here.
pub type ReattachDisksHook = Box<dyn FnMut(&RestoreOutcome) + Send>;

pub struct SnapshotEngine {
    pub registry: DeviceRegistry,
    runtime: Option<RuntimeHandle>,
    store: Arc<dyn BlobStore>,
    /// Blobs retained from a prior restore (forward compatibility).
    cached: Vec<DeviceBlob>,
    /// Blobs supplied by the coordinator for the next save.
    coordinator: Vec<DeviceBlob>,
    reattach_disks: Option<ReattachDisksHook>,
    strict_containers: bool,
}

impl SnapshotEngine {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            runtime: None,
            store,
            cached: Vec::new(),
            coordinator: Vec::new(),
            reattach_disks: None,
            strict_containers: false,
        }
    }

    pub fn set_runtime(&mut self, runtime: Option<RuntimeHandle>) {
        self.runtime = runtime;
    }

    pub fn has_runtime(&self) -> bool {
        self.runtime.is_some()
    }

    pub fn set_coordinator_blobs(&mut self, blobs: Vec<DeviceBlob>) {
        self.coordinator = blobs;
    }

    pub fn set_reattach_disks(&mut self, hook: ReattachDisksHook) {
        self.reattach_disks = Some(hook);
    }

    /// Fail a restore on an undecodable container instead of skipping it.
    pub fn set_strict_containers(&mut self, strict: bool) {
        self.strict_containers = strict;
    }

    pub fn cached_blobs(&self) -> &[DeviceBlob] {
        &self.cached
    }

    pub fn save(&mut self, path: &str) -> Result<()> {
        let runtime = self.runtime.as_mut().ok_or(SnapshotError::MissingRuntime)?;

        let fresh = collect_fresh_blobs(&mut self.registry);
        let cached = sanitize_usb_blobs(&self.cached);
        let coordinator = sanitize_usb_blobs(&self.coordinator);
        let merged = merge_blob_tiers(&cached, &fresh, &coordinator);

        let frame = SnapshotFrame {
            cpu: runtime.capture.cpu_state(),
            mmu: runtime.capture.mmu_state(),
            devices: blobs_to_device_states(&merged),
        };
        runtime.module.save_frame(self.store.as_ref(), path, &frame)
    }

    pub fn restore(&mut self, path: &str) -> Result<RestoreOutcome> {
        let runtime = self.runtime.as_mut().ok_or(SnapshotError::MissingRuntime)?;
        let frame = runtime.module.restore_frame(self.store.as_ref(), path)?;

        let blobs: Vec<DeviceBlob> = frame
            .devices
            .iter()
            .map(|dev| DeviceBlob::new(device_id_to_kind(dev.id), dev.data.clone()))
            .collect();
        let collapsed = nimbus_io_snapshot::io::kind::collapse_for_restore(&blobs);

        let mut kept = Vec::new();
        for blob in collapsed {
            if self.dispatch_restore_blob(&blob)? {
                kept.push(blob);
            }
        }

        self.cached = kept.clone();

        let outcome = RestoreOutcome {
            cpu: frame.cpu,
            mmu: frame.mmu,
            devices: kept,
        };
        if let Some(hook) = self.reattach_disks.as_mut() {
            hook(&outcome);
        }
        Ok(outcome)
    }

    /// Dispatches one normalized blob to its load hook. Returns whether
    /// the blob is retained for the forward-compatibility cache.
    fn dispatch_restore_blob(&mut self, blob: &DeviceBlob) -> Result<bool> {
        let Some(kind) = CanonicalKind::from_name(&blob.kind) else {
            // Unknown kinds survive untouched.
            return Ok(true);
        };

        match kind {
            CanonicalKind::Usb => self.dispatch_usb(&blob.data),
            CanonicalKind::InputVirtio => self.dispatch_virtio_input(&blob.data),
            _ => {
                let Some(hooks) = self.registry.device_hooks_mut(kind) else {
                    warn!(kind = blob.kind, "dropping blob for unavailable device");
                    return Ok(false);
                };
                let Some(load) = hooks.load.as_mut() else {
                    warn!(kind = blob.kind, "device has no load hook, dropping blob");
                    return Ok(false);
                };
                if let Err(err) = load(&blob.data) {
                    warn!(kind = blob.kind, error = %err, "device rejected blob, skipping");
                    return Ok(false);
                }
                if kind == CanonicalKind::NetStack {
                    self.registry
                        .apply_tcp_restore_policy(TcpRestorePolicy::Drop);
                }
                Ok(true)
            }
        }
    }

    fn dispatch_usb(&mut self, data: &[u8]) -> Result<bool> {
        if UsbContainer::is_container(data) {
            let container = match UsbContainer::decode(data) {
                Ok(container) => container,
                Err(err) => {
                    if self.strict_containers {
                        return Err(SnapshotError::Corrupt("AUSB container decode failed"));
                    }
                    warn!(error = %err, "skipping undecodable AUSB usb container");
                    return Ok(false);
                }
            };
            for (controller, bytes) in [
                (UsbController::Uhci, &container.uhci),
                (UsbController::Ehci, &container.ehci),
                (UsbController::Xhci, &container.xhci),
            ] {
                if let Some(bytes) = bytes {
                    self.load_usb_controller(controller, bytes);
                }
            }
            return Ok(true);
        }

        // Legacy single-controller blob: the embedded device id says
        // which controller it belongs to.
        match peek_device_id(data).and_then(UsbController::from_legacy_device_id) {
            Some(controller) => {
                self.load_usb_controller(controller, data);
                Ok(true)
            }
            None => {
                if self.strict_containers {
                    return Err(SnapshotError::Corrupt("unrecognized usb blob"));
                }
                warn!("skipping usb blob with neither AUSB framing nor a known controller id");
                Ok(false)
            }
        }
    }

    fn load_usb_controller(&mut self, controller: UsbController, bytes: &[u8]) {
        let Some(hooks) = self.registry.usb_hooks_mut(controller) else {
            warn!(
                controller = controller.name(),
                "usb snapshot references an unavailable controller, ignoring"
            );
            return;
        };
        let Some(load) = hooks.load.as_mut() else {
            warn!(
                controller = controller.name(),
                "usb controller has no load hook, ignoring"
            );
            return;
        };
        if let Err(err) = load(bytes) {
            warn!(
                controller = controller.name(),
                error = %err,
                "usb controller rejected snapshot, ignoring"
            );
        }
    }

    fn dispatch_virtio_input(&mut self, data: &[u8]) -> Result<bool> {
        let container = match VirtioInputContainer::decode(data) {
            Ok(container) => container,
            Err(err) => {
                if self.strict_containers {
                    return Err(SnapshotError::Corrupt("VINP container decode failed"));
                }
                warn!(error = %err, "skipping undecodable VINP virtio-input container");
                return Ok(false);
            }
        };
        for (sub, bytes) in [
            (InputSubDevice::Keyboard, &container.keyboard),
            (InputSubDevice::Mouse, &container.mouse),
        ] {
            let Some(bytes) = bytes else { continue };
            let Some(load) = self
                .registry
                .virtio_input_hooks_mut(sub)
                .and_then(|h| h.load.as_mut())
            else {
                warn!("virtio-input snapshot references an unavailable sub-device, ignoring");
                continue;
            };
            if let Err(err) = load(bytes) {
                warn!(error = %err, "virtio-input sub-device rejected snapshot, ignoring");
            }
        }
        Ok(true)
    }
}

/// Runs the registered save hooks and aggregates the container kinds.
/// Devices without a save hook are skipped silently.
fn collect_fresh_blobs(registry: &mut DeviceRegistry) -> Vec<DeviceBlob> {
    let mut fresh = Vec::new();

    let mut usb = UsbContainer::default();
    for controller in UsbController::ALL {
        let Some(save) = registry
            .usb_hooks_mut(controller)
            .and_then(|h| h.save.as_mut())
        else {
            continue;
        };
        let bytes = save();
        match controller {
            UsbController::Uhci => usb.uhci = Some(bytes),
            UsbController::Ehci => usb.ehci = Some(bytes),
            UsbController::Xhci => usb.xhci = Some(bytes),
        }
    }
    if !usb.is_empty() {
        fresh.push(DeviceBlob::new(CanonicalKind::Usb.name(), usb.encode()));
    }

    let mut input = VirtioInputContainer::default();
    for (sub, slot) in [
        (InputSubDevice::Keyboard, 0usize),
        (InputSubDevice::Mouse, 1),
    ] {
        let Some(save) = registry
            .virtio_input_hooks_mut(sub)
            .and_then(|h| h.save.as_mut())
        else {
            continue;
        };
        let bytes = save();
        if slot == 0 {
            input.keyboard = Some(bytes);
        } else {
            input.mouse = Some(bytes);
        }
    }
    if !input.is_empty() {
        fresh.push(DeviceBlob::new(
            CanonicalKind::InputVirtio.name(),
            input.encode(),
        ));
    }

    for kind in CanonicalKind::REGISTRY {
        if matches!(kind, CanonicalKind::Usb | CanonicalKind::InputVirtio) {
            continue;
        }
        let Some(save) = registry
            .device_hooks_mut(kind)
            .and_then(|h| h.save.as_mut())
        else {
            continue;
        };
        fresh.push(DeviceBlob::new(kind.name(), save()));
    }

    fresh
}

/// Drops cached/coordinator USB blobs whose AUSB framing no longer
/// decodes, so a stale container cannot shadow the fresh one.
fn sanitize_usb_blobs(blobs: &[DeviceBlob]) -> Vec<DeviceBlob> {
    blobs
        .iter()
        .filter(|blob| {
            let is_usb = matches!(
                normalize_kind(&blob.kind, &blob.data),
                NormalizedKind::Canonical(CanonicalKind::Usb)
            );
            if is_usb
                && UsbContainer::is_container(&blob.data)
                && UsbContainer::decode(&blob.data).is_err()
            {
                warn!(kind = blob.kind, "ignoring undecodable cached AUSB usb blob");
                return false;
            }
            true
        })
        .cloned()
        .collect()
}

/// Maps merged blobs into frame device entries. Kinds that fit neither
/// the canonical table nor the numeric form cannot cross the frame
/// boundary and are dropped with a warning.
fn blobs_to_device_states(blobs: &[DeviceBlob]) -> Vec<DeviceState> {
    let mut devices = Vec::with_capacity(blobs.len());
    for blob in blobs {
        let id = match CanonicalKind::from_name(&blob.kind) {
            Some(kind) => DeviceId(kind.numeric_id()),
            None => match parse_numeric_kind(&blob.kind) {
                Some(id) => DeviceId(id),
                None => {
                    warn!(kind = blob.kind, "blob kind has no device id, dropping");
                    continue;
                }
            },
        };
        devices.push(DeviceState {
            id,
            version: 1,
            flags: 0,
            data: blob.data.clone(),
        });
    }
    devices
}

/// Spells a frame device id as a blob kind: canonical when known, the
/// numeric form otherwise.
fn device_id_to_kind(id: DeviceId) -> String {
    match CanonicalKind::from_numeric(id.0) {
        Some(kind) => kind.name().to_string(),
        None => numeric_kind_name(id.0),
    }
}

/// Runs one queued snapshot op to completion and reports its result.
/// Errors are local to the request; the chain continues either way.
pub fn execute_snapshot_op(engine: &mut SnapshotEngine, link: &WorkerLink, op: SnapshotOp) {
    match op {
        SnapshotOp::Save { request_id, path } => match engine.save(&path) {
            Ok(()) => link.emit(&Event::VmSaved {
                request_id,
                ok: true,
                error: None,
            }),
            Err(err) => link.emit(&Event::VmSaved {
                request_id,
                ok: false,
                error: Some(failure_from_snapshot_error(&err)),
            }),
        },
        SnapshotOp::Restore { request_id, path } => match engine.restore(&path) {
            Ok(outcome) => link.emit(&Event::VmRestored {
                request_id,
                ok: true,
                error: None,
                cpu: outcome.cpu,
                mmu: outcome.mmu,
                devices: outcome
                    .devices
                    .into_iter()
                    .map(|blob| RestoredBlob {
                        kind: blob.kind,
                        data: blob.data,
                    })
                    .collect(),
            }),
            Err(err) => link.emit(&Event::VmRestored {
                request_id,
                ok: false,
                error: Some(failure_from_snapshot_error(&err)),
                cpu: Vec::new(),
                mmu: Vec::new(),
                devices: Vec::new(),
            }),
        },
    }
}
