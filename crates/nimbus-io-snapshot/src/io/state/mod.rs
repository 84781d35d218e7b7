//! Tagged per-device snapshot framing.
//!
//! Every device blob starts with a 16-byte header:
//!
//! ```text
//! "AERO" | format_version: u32 | device_id: [u8; 4] | device_version: u32
//! ```
//!
//! followed by `(tag: u16 | len: u32 | data[len])` records sorted
//! ascending by tag, tags unique. All integers are little-endian.
//!
//! Early builds wrote an 8-byte header without the device id/version
//! words. The parser detects that form by probing `bytes[8..12]` for
//! printable ASCII and falls back to reading records from offset 8.

pub mod codec;

use std::collections::BTreeMap;

use thiserror::Error;

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"AERO";
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Full header: magic + format version + device id + device version.
pub const HEADER_BYTES: usize = 16;
/// Early header: magic + format version only.
pub const LEGACY_HEADER_BYTES: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("bad snapshot magic")]
    BadMagic,
    #[error("snapshot device id mismatch (expected {expected:?}, found {found:?})")]
    DeviceIdMismatch { expected: [u8; 4], found: [u8; 4] },
    #[error("unsupported snapshot format version {0}")]
    UnsupportedVersion(u32),
    #[error("unexpected end of snapshot data")]
    UnexpectedEof,
    #[error("invalid field encoding: {0}")]
    InvalidFieldEncoding(&'static str),
    #[error("corrupt snapshot: {0}")]
    Corrupt(&'static str),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotVersion {
    pub major: u16,
    pub minor: u16,
}

impl SnapshotVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    fn to_u32(self) -> u32 {
        (self.major as u32) << 16 | self.minor as u32
    }

    fn from_u32(v: u32) -> Self {
        Self {
            major: (v >> 16) as u16,
            minor: v as u16,
        }
    }
}

/// Devices that participate in snapshots implement this pair.
pub trait IoSnapshot {
    fn save_state(&self) -> Vec<u8>;
    fn load_state(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Returns the device id embedded in a blob, if the blob carries the full
/// header form. Used to dispatch legacy single-controller blobs.
pub fn peek_device_id(bytes: &[u8]) -> Option<[u8; 4]> {
    if bytes.len() < HEADER_BYTES || bytes[..4] != SNAPSHOT_MAGIC {
        return None;
    }
    let id: [u8; 4] = bytes[8..12].try_into().unwrap();
    if id.iter().all(|b| b.is_ascii_graphic()) {
        Some(id)
    } else {
        None
    }
}

pub struct SnapshotWriter {
    device_id: [u8; 4],
    version: SnapshotVersion,
    fields: BTreeMap<u16, Vec<u8>>,
}

impl SnapshotWriter {
    pub fn new(device_id: [u8; 4], version: SnapshotVersion) -> Self {
        Self {
            device_id,
            version,
            fields: BTreeMap::new(),
        }
    }

    /// Adds one record. Tags must be unique within a blob; reuse is a
    /// programmer error.
    pub fn field_bytes(&mut self, tag: u16, bytes: Vec<u8>) -> &mut Self {
        let prev = self.fields.insert(tag, bytes);
        assert!(prev.is_none(), "duplicate snapshot field tag {tag}");
        self
    }

    pub fn finish(self) -> Vec<u8> {
        let body_len: usize = self
            .fields
            .values()
            .map(|b| 6 + b.len())
            .sum();
        let mut out = Vec::with_capacity(HEADER_BYTES + body_len);
        out.extend_from_slice(&SNAPSHOT_MAGIC);
        out.extend_from_slice(&SNAPSHOT_FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&self.device_id);
        out.extend_from_slice(&self.version.to_u32().to_le_bytes());
        for (tag, bytes) in &self.fields {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(bytes);
        }
        out
    }
}

#[derive(Debug)]
pub struct SnapshotReader<'a> {
    device_id: Option<[u8; 4]>,
    format_version: u32,
    version: SnapshotVersion,
    fields: BTreeMap<u16, &'a [u8]>,
}

impl<'a> SnapshotReader<'a> {
    /// Parses a blob and verifies it targets `expected_device_id`.
    ///
    /// Blobs in the early 8-byte header form carry no device id; they
    /// parse successfully and the id check is skipped.
    pub fn parse(bytes: &'a [u8], expected_device_id: [u8; 4]) -> Result<Self> {
        let reader = Self::parse_any(bytes)?;
        if let Some(found) = reader.device_id {
            if found != expected_device_id {
                return Err(SnapshotError::DeviceIdMismatch {
                    expected: expected_device_id,
                    found,
                });
            }
        }
        Ok(reader)
    }

    /// Parses a blob without a device-id expectation.
    pub fn parse_any(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < LEGACY_HEADER_BYTES {
            return Err(SnapshotError::UnexpectedEof);
        }
        if bytes[..4] != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let format_version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(format_version));
        }

        let (device_id, version, mut off) = match peek_device_id(bytes) {
            Some(id) => {
                let version = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
                (Some(id), SnapshotVersion::from_u32(version), HEADER_BYTES)
            }
            None => (None, SnapshotVersion::new(0, 0), LEGACY_HEADER_BYTES),
        };

        let mut fields = BTreeMap::new();
        let mut last_tag: Option<u16> = None;
        while off < bytes.len() {
            if bytes.len() - off < 6 {
                return Err(SnapshotError::UnexpectedEof);
            }
            let tag = u16::from_le_bytes(bytes[off..off + 2].try_into().unwrap());
            let len = u32::from_le_bytes(bytes[off + 2..off + 6].try_into().unwrap()) as usize;
            off += 6;
            if bytes.len() - off < len {
                return Err(SnapshotError::UnexpectedEof);
            }
            match last_tag {
                Some(prev) if prev >= tag => {
                    return Err(SnapshotError::InvalidFieldEncoding(
                        "field tags must be unique and ascending",
                    ));
                }
                _ => last_tag = Some(tag),
            }
            fields.insert(tag, &bytes[off..off + len]);
            off += len;
        }

        Ok(Self {
            device_id,
            format_version,
            version,
            fields,
        })
    }

    pub fn device_id(&self) -> Option<[u8; 4]> {
        self.device_id
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn version(&self) -> SnapshotVersion {
        self.version
    }

    pub fn bytes(&self, tag: u16) -> Option<&'a [u8]> {
        self.fields.get(&tag).copied()
    }

    pub fn tags(&self) -> impl Iterator<Item = u16> + '_ {
        self.fields.keys().copied()
    }
}
