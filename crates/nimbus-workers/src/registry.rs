//! The IO worker's device registry.
//!
//! Each canonical blob kind maps to explicit save/load hooks assigned at
//! registration time. USB and virtio-input register per-sub-device hooks;
//! their blobs are aggregated into the AUSB / VINP containers by the
//! orchestrator. A registered device may omit either hook: a missing save
//! hook skips the device silently on save, a missing load hook drops the
//! blob with a warning on restore.

use std::collections::HashMap;

use nimbus_io_snapshot::io::kind::CanonicalKind;
use nimbus_io_snapshot::io::network::state::TcpRestorePolicy;
use nimbus_io_snapshot::io::state::SnapshotError;

pub type SaveHook = Box<dyn FnMut() -> Vec<u8> + Send>;
pub type LoadHook = Box<dyn FnMut(&[u8]) -> Result<(), SnapshotError> + Send>;
pub type TcpPolicyHook = Box<dyn FnMut(TcpRestorePolicy) + Send>;

#[derive(Default)]
pub struct DeviceHooks {
    pub save: Option<SaveHook>,
    pub load: Option<LoadHook>,
}

impl DeviceHooks {
    pub fn new(save: SaveHook, load: LoadHook) -> Self {
        Self {
            save: Some(save),
            load: Some(load),
        }
    }

    pub fn save_only(save: SaveHook) -> Self {
        Self {
            save: Some(save),
            load: None,
        }
    }

    pub fn load_only(load: LoadHook) -> Self {
        Self {
            save: None,
            load: Some(load),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsbController {
    Uhci,
    Ehci,
    Xhci,
}

impl UsbController {
    pub const ALL: [UsbController; 3] =
        [UsbController::Uhci, UsbController::Ehci, UsbController::Xhci];

    pub fn name(self) -> &'static str {
        match self {
            UsbController::Uhci => "uhci",
            UsbController::Ehci => "ehci",
            UsbController::Xhci => "xhci",
        }
    }

    /// Device ids seen in legacy single-controller USB blobs.
    pub fn from_legacy_device_id(id: [u8; 4]) -> Option<Self> {
        match &id {
            b"UHRT" | b"UHCB" => Some(UsbController::Uhci),
            b"EHCB" => Some(UsbController::Ehci),
            b"XHCB" => Some(UsbController::Xhci),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputSubDevice {
    Keyboard,
    Mouse,
}

#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<CanonicalKind, DeviceHooks>,
    usb: HashMap<UsbController, DeviceHooks>,
    virtio_input: HashMap<InputSubDevice, DeviceHooks>,
    tcp_policy: Option<TcpPolicyHook>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers hooks for a simple (non-aggregated) device kind. USB and
    /// virtio-input use the per-sub-device registration instead.
    pub fn register(&mut self, kind: CanonicalKind, hooks: DeviceHooks) {
        assert!(
            !matches!(kind, CanonicalKind::Usb | CanonicalKind::InputVirtio),
            "aggregate kinds register per sub-device"
        );
        self.devices.insert(kind, hooks);
    }

    pub fn register_usb_controller(&mut self, controller: UsbController, hooks: DeviceHooks) {
        self.usb.insert(controller, hooks);
    }

    pub fn register_virtio_input(&mut self, sub: InputSubDevice, hooks: DeviceHooks) {
        self.virtio_input.insert(sub, hooks);
    }

    /// Hook invoked with the TCP restore policy after a `net.stack` load.
    pub fn set_tcp_policy_hook(&mut self, hook: TcpPolicyHook) {
        self.tcp_policy = Some(hook);
    }

    pub fn device_hooks_mut(&mut self, kind: CanonicalKind) -> Option<&mut DeviceHooks> {
        self.devices.get_mut(&kind)
    }

    pub fn has_device(&self, kind: CanonicalKind) -> bool {
        self.devices.contains_key(&kind)
    }

    pub fn usb_hooks_mut(&mut self, controller: UsbController) -> Option<&mut DeviceHooks> {
        self.usb.get_mut(&controller)
    }

    pub fn has_usb_controller(&self, controller: UsbController) -> bool {
        self.usb.contains_key(&controller)
    }

    pub fn virtio_input_hooks_mut(&mut self, sub: InputSubDevice) -> Option<&mut DeviceHooks> {
        self.virtio_input.get_mut(&sub)
    }

    pub fn apply_tcp_restore_policy(&mut self, policy: TcpRestorePolicy) {
        if let Some(hook) = self.tcp_policy.as_mut() {
            hook(policy);
        }
    }
}
