//! The USB aggregate container.
//!
//! A snapshot carries exactly one USB blob no matter how many host
//! controllers are live. The container framing:
//!
//! ```text
//! "AUSB" | major: u16 | minor: u16 | records...
//! record = tag: u16 | len: u32 | data[len]
//! ```
//!
//! Tags identify controllers; at most one record per tag and records end
//! exactly at the end of the blob. Unknown tags are skipped so newer
//! builds can add controllers without breaking old readers.

use super::super::state::{Result, SnapshotError};

pub const USB_CONTAINER_MAGIC: [u8; 4] = *b"AUSB";
pub const USB_CONTAINER_VERSION_MAJOR: u16 = 1;
pub const USB_CONTAINER_VERSION_MINOR: u16 = 0;

pub const TAG_UHCI: u16 = 1;
pub const TAG_EHCI: u16 = 2;
pub const TAG_XHCI: u16 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbContainer {
    pub uhci: Option<Vec<u8>>,
    pub ehci: Option<Vec<u8>>,
    pub xhci: Option<Vec<u8>>,
}

impl UsbContainer {
    pub fn is_empty(&self) -> bool {
        self.uhci.is_none() && self.ehci.is_none() && self.xhci.is_none()
    }

    /// True when the blob leads with the container magic. Blobs that fail
    /// this probe are either legacy single-controller snapshots or
    /// garbage; [`decode`](Self::decode) distinguishes the two.
    pub fn is_container(bytes: &[u8]) -> bool {
        bytes.len() >= 4 && bytes[..4] == USB_CONTAINER_MAGIC
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&USB_CONTAINER_MAGIC);
        out.extend_from_slice(&USB_CONTAINER_VERSION_MAJOR.to_le_bytes());
        out.extend_from_slice(&USB_CONTAINER_VERSION_MINOR.to_le_bytes());
        for (tag, data) in [
            (TAG_UHCI, &self.uhci),
            (TAG_EHCI, &self.ehci),
            (TAG_XHCI, &self.xhci),
        ] {
            if let Some(data) = data {
                out.extend_from_slice(&tag.to_le_bytes());
                out.extend_from_slice(&(data.len() as u32).to_le_bytes());
                out.extend_from_slice(data);
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(SnapshotError::UnexpectedEof);
        }
        if bytes[..4] != USB_CONTAINER_MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let major = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        if major != USB_CONTAINER_VERSION_MAJOR {
            return Err(SnapshotError::UnsupportedVersion(major as u32));
        }

        let mut container = Self::default();
        let mut off = 8;
        let end = bytes.len();
        while off < end {
            if end - off < 6 {
                return Err(SnapshotError::UnexpectedEof);
            }
            let tag = u16::from_le_bytes(bytes[off..off + 2].try_into().unwrap());
            let len = u32::from_le_bytes(bytes[off + 2..off + 6].try_into().unwrap()) as usize;
            off += 6;
            if end - off < len {
                return Err(SnapshotError::UnexpectedEof);
            }
            let data = bytes[off..off + len].to_vec();
            off += len;

            let slot = match tag {
                TAG_UHCI => &mut container.uhci,
                TAG_EHCI => &mut container.ehci,
                TAG_XHCI => &mut container.xhci,
                // Unknown controller tags from newer builds are skipped.
                _ => continue,
            };
            if slot.is_some() {
                return Err(SnapshotError::Corrupt("duplicate usb container record"));
            }
            *slot = Some(data);
        }
        Ok(container)
    }
}
