//! Device identifiers and per-device frame entries.

use std::fmt;
use std::io::{Read, Write};

use crate::error::{Result, SnapshotError};

/// Size/count caps applied to untrusted frame input.
pub mod limits {
    pub const MAX_DEVICE_COUNT: u32 = 1024;
    pub const MAX_DEVICE_ENTRY_LEN: u64 = 16 * 1024 * 1024;
    pub const MAX_CPU_BYTES: u64 = 16 * 1024 * 1024;
    pub const MAX_MMU_BYTES: u64 = 16 * 1024 * 1024;
    /// Cap for any single section payload, known or unknown. Bounds the
    /// allocation a corrupted length prefix can demand.
    pub const MAX_SECTION_BYTES: u64 = 256 * 1024 * 1024;
}

/// Device-class identifier in the runtime's `device.<id>` space.
///
/// Numbers are wire-stable: they appear in persisted snapshots and in the
/// numeric blob-kind spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub const USB: DeviceId = DeviceId(1);
    pub const I8042: DeviceId = DeviceId(2);
    pub const HDA: DeviceId = DeviceId(3);
    pub const VIRTIO_SND: DeviceId = DeviceId(4);
    pub const PCI_LEGACY: DeviceId = DeviceId(5);
    pub const E1000: DeviceId = DeviceId(6);
    pub const NET_STACK: DeviceId = DeviceId(7);
    pub const CPU_INTERNAL: DeviceId = DeviceId(9);
    pub const PCI_CFG: DeviceId = DeviceId(14);
    pub const VIRTIO_INPUT: DeviceId = DeviceId(24);

    pub fn name(self) -> Option<&'static str> {
        match self {
            DeviceId::USB => Some("USB"),
            DeviceId::I8042 => Some("I8042"),
            DeviceId::HDA => Some("HDA"),
            DeviceId::VIRTIO_SND => Some("VIRTIO_SND"),
            DeviceId::PCI_LEGACY => Some("PCI_LEGACY"),
            DeviceId::E1000 => Some("E1000"),
            DeviceId::NET_STACK => Some("NET_STACK"),
            DeviceId::CPU_INTERNAL => Some("CPU_INTERNAL"),
            DeviceId::PCI_CFG => Some("PCI_CFG"),
            DeviceId::VIRTIO_INPUT => Some("VIRTIO_INPUT"),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.0),
            None => write!(f, "DEVICE({})", self.0),
        }
    }
}

/// The CPU-internal device entry is written at this version by current
/// builds.
pub const CPU_INTERNAL_VERSION: u16 = 2;

/// One device entry in a snapshot frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub id: DeviceId,
    pub version: u16,
    pub flags: u16,
    pub data: Vec<u8>,
}

impl DeviceState {
    /// Sort/uniqueness key inside the DEVICES section.
    pub fn key(&self) -> (u32, u16, u16) {
        (self.id.0, self.version, self.flags)
    }

    pub fn encode(&self, out: &mut impl Write) -> Result<()> {
        out.write_all(&self.id.0.to_le_bytes())?;
        out.write_all(&self.version.to_le_bytes())?;
        out.write_all(&self.flags.to_le_bytes())?;
        out.write_all(&(self.data.len() as u64).to_le_bytes())?;
        out.write_all(&self.data)?;
        Ok(())
    }

    pub fn decode(r: &mut impl Read, max_len: u64) -> Result<Self> {
        let mut id = [0u8; 4];
        r.read_exact(&mut id)?;
        let mut version = [0u8; 2];
        r.read_exact(&mut version)?;
        let mut flags = [0u8; 2];
        r.read_exact(&mut flags)?;
        let mut len = [0u8; 8];
        r.read_exact(&mut len)?;
        let len = u64::from_le_bytes(len);
        if len > max_len {
            return Err(SnapshotError::Corrupt("device entry too large"));
        }
        let mut data = vec![0u8; len as usize];
        r.read_exact(&mut data)
            .map_err(|_| SnapshotError::Corrupt("device entry truncated"))?;
        Ok(Self {
            id: DeviceId(u32::from_le_bytes(id)),
            version: u16::from_le_bytes(version),
            flags: u16::from_le_bytes(flags),
            data,
        })
    }
}
