//! The persisted snapshot container.
//!
//! ```text
//! header  = "NSNP" | version: u32 | endianness: u8 | 0 | reserved: u32
//! section = id: u32 | version: u16 | flags: u16 | len: u64 | payload[len]
//! ```
//!
//! Sections repeat until end of stream. Unknown section ids are skipped
//! so newer writers stay readable; the known sections must each appear at
//! most once. The DEVICES payload is a u32 entry count followed by
//! [`DeviceState`] entries sorted by (id, version, flags).

use std::fmt;
use std::io::{Read, Write};

use nimbus_storage::BlobStore;

use crate::device::{limits, DeviceState};
use crate::error::{Result, SnapshotError};
use crate::SnapshotFrame;

pub const SNAPSHOT_MAGIC: &[u8; 4] = b"NSNP";
pub const SNAPSHOT_VERSION_V1: u32 = 1;
pub const SNAPSHOT_ENDIANNESS_LITTLE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionId(pub u32);

impl SectionId {
    pub const CPU: SectionId = SectionId(1);
    pub const MMU: SectionId = SectionId(2);
    pub const DEVICES: SectionId = SectionId(3);

    pub fn name(self) -> Option<&'static str> {
        match self {
            SectionId::CPU => Some("CPU"),
            SectionId::MMU => Some("MMU"),
            SectionId::DEVICES => Some("DEVICES"),
            _ => None,
        }
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.0),
            None => write!(f, "SECTION({})", self.0),
        }
    }
}

fn push_section(out: &mut impl Write, id: SectionId, version: u16, payload: &[u8]) -> Result<()> {
    out.write_all(&id.0.to_le_bytes())?;
    out.write_all(&version.to_le_bytes())?;
    out.write_all(&0u16.to_le_bytes())?;
    out.write_all(&(payload.len() as u64).to_le_bytes())?;
    out.write_all(payload)?;
    Ok(())
}

fn validate_devices(devices: &[DeviceState]) -> Result<()> {
    if devices.len() as u32 > limits::MAX_DEVICE_COUNT {
        return Err(SnapshotError::Corrupt("too many devices"));
    }
    for dev in devices {
        if dev.data.len() as u64 > limits::MAX_DEVICE_ENTRY_LEN {
            return Err(SnapshotError::Corrupt("device entry too large"));
        }
    }
    let mut keys: Vec<_> = devices.iter().map(DeviceState::key).collect();
    keys.sort_unstable();
    if keys.windows(2).any(|w| w[0] == w[1]) {
        return Err(SnapshotError::Corrupt(
            "duplicate device entry (id/version/flags must be unique)",
        ));
    }
    Ok(())
}

/// Writes a frame as an NSNP container.
pub fn save_frame(out: &mut impl Write, frame: &SnapshotFrame) -> Result<()> {
    if frame.cpu.len() as u64 > limits::MAX_CPU_BYTES {
        return Err(SnapshotError::Corrupt("cpu state too large"));
    }
    if frame.mmu.len() as u64 > limits::MAX_MMU_BYTES {
        return Err(SnapshotError::Corrupt("mmu state too large"));
    }
    validate_devices(&frame.devices)?;

    out.write_all(SNAPSHOT_MAGIC)?;
    out.write_all(&SNAPSHOT_VERSION_V1.to_le_bytes())?;
    out.write_all(&[SNAPSHOT_ENDIANNESS_LITTLE, 0])?;
    out.write_all(&0u32.to_le_bytes())?;

    push_section(out, SectionId::CPU, 1, &frame.cpu)?;
    push_section(out, SectionId::MMU, 1, &frame.mmu)?;

    let mut sorted: Vec<&DeviceState> = frame.devices.iter().collect();
    sorted.sort_unstable_by_key(|d| d.key());
    let mut devices_payload = Vec::new();
    devices_payload.extend_from_slice(&(sorted.len() as u32).to_le_bytes());
    for dev in sorted {
        dev.encode(&mut devices_payload)?;
    }
    push_section(out, SectionId::DEVICES, 1, &devices_payload)?;
    Ok(())
}

fn read_exact_or_eof(r: &mut impl Read, buf: &mut [u8]) -> Result<Option<()>> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(SnapshotError::Corrupt("truncated section header"));
        }
        filled += n;
    }
    Ok(Some(()))
}

fn decode_devices(payload: &[u8]) -> Result<Vec<DeviceState>> {
    let mut cursor = std::io::Cursor::new(payload);
    let mut count = [0u8; 4];
    cursor
        .read_exact(&mut count)
        .map_err(|_| SnapshotError::Corrupt("truncated DEVICES section"))?;
    let count = u32::from_le_bytes(count);
    if count > limits::MAX_DEVICE_COUNT {
        return Err(SnapshotError::Corrupt("too many devices"));
    }

    let mut devices = Vec::with_capacity(count as usize);
    for _ in 0..count {
        devices.push(DeviceState::decode(
            &mut cursor,
            limits::MAX_DEVICE_ENTRY_LEN,
        )?);
    }
    if cursor.position() != payload.len() as u64 {
        return Err(SnapshotError::Corrupt("trailing bytes in DEVICES section"));
    }
    validate_devices(&devices)?;
    devices.sort_unstable_by_key(DeviceState::key);
    Ok(devices)
}

/// Reads an NSNP container back into a frame. Restored devices come back
/// sorted by (id, version, flags).
pub fn restore_frame(r: &mut impl Read) -> Result<SnapshotFrame> {
    let mut header = [0u8; 14];
    r.read_exact(&mut header)?;
    if &header[..4] != SNAPSHOT_MAGIC {
        return Err(SnapshotError::Corrupt("bad snapshot magic"));
    }
    let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
    if version != SNAPSHOT_VERSION_V1 {
        return Err(SnapshotError::Corrupt("unsupported snapshot version"));
    }
    if header[8] != SNAPSHOT_ENDIANNESS_LITTLE {
        return Err(SnapshotError::Corrupt("unsupported endianness"));
    }

    let mut cpu: Option<Vec<u8>> = None;
    let mut mmu: Option<Vec<u8>> = None;
    let mut devices: Option<Vec<DeviceState>> = None;

    loop {
        let mut section_header = [0u8; 16];
        if read_exact_or_eof(r, &mut section_header)?.is_none() {
            break;
        }
        let id = SectionId(u32::from_le_bytes(section_header[..4].try_into().unwrap()));
        let len = u64::from_le_bytes(section_header[8..16].try_into().unwrap());

        let max = match id {
            SectionId::CPU => limits::MAX_CPU_BYTES,
            SectionId::MMU => limits::MAX_MMU_BYTES,
            _ => limits::MAX_SECTION_BYTES,
        };
        if len > max {
            return Err(SnapshotError::Corrupt("section too large"));
        }
        let mut payload = vec![0u8; len as usize];
        r.read_exact(&mut payload)?;

        match id {
            SectionId::CPU => {
                if cpu.replace(payload).is_some() {
                    return Err(SnapshotError::Corrupt("duplicate CPU section"));
                }
            }
            SectionId::MMU => {
                if mmu.replace(payload).is_some() {
                    return Err(SnapshotError::Corrupt("duplicate MMU section"));
                }
            }
            SectionId::DEVICES => {
                if devices.replace(decode_devices(&payload)?).is_some() {
                    return Err(SnapshotError::Corrupt("duplicate DEVICES section"));
                }
            }
            // Sections from newer writers are skipped.
            _ => {}
        }
    }

    Ok(SnapshotFrame {
        cpu: cpu.ok_or(SnapshotError::Corrupt("missing CPU section"))?,
        mmu: mmu.unwrap_or_default(),
        devices: devices.unwrap_or_default(),
    })
}

/// [`save_frame`] against a blob store path.
pub fn save_frame_to_store(
    store: &dyn BlobStore,
    path: &str,
    frame: &SnapshotFrame,
) -> Result<()> {
    let mut bytes = Vec::new();
    save_frame(&mut bytes, frame)?;
    store.write(path, &bytes)?;
    Ok(())
}

/// [`restore_frame`] against a blob store path.
pub fn restore_frame_from_store(store: &dyn BlobStore, path: &str) -> Result<SnapshotFrame> {
    let bytes = store.read(path)?;
    restore_frame(&mut std::io::Cursor::new(bytes))
}
