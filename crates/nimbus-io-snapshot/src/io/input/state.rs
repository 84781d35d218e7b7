//! The virtio-input aggregate blob.
//!
//! Keyboard and mouse sub-device snapshots travel as one `VINP` blob in
//! the standard tagged framing (see [`crate::io::state`]).

use super::super::state::{
    Result, SnapshotReader, SnapshotVersion, SnapshotWriter,
};

pub const VIRTIO_INPUT_DEVICE_ID: [u8; 4] = *b"VINP";
pub const VIRTIO_INPUT_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

pub const TAG_KEYBOARD: u16 = 1;
pub const TAG_MOUSE: u16 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtioInputContainer {
    pub keyboard: Option<Vec<u8>>,
    pub mouse: Option<Vec<u8>>,
}

impl VirtioInputContainer {
    pub fn is_empty(&self) -> bool {
        self.keyboard.is_none() && self.mouse.is_none()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = SnapshotWriter::new(VIRTIO_INPUT_DEVICE_ID, VIRTIO_INPUT_VERSION);
        if let Some(keyboard) = &self.keyboard {
            w.field_bytes(TAG_KEYBOARD, keyboard.clone());
        }
        if let Some(mouse) = &self.mouse {
            w.field_bytes(TAG_MOUSE, mouse.clone());
        }
        w.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let r = SnapshotReader::parse(bytes, VIRTIO_INPUT_DEVICE_ID)?;
        Ok(Self {
            keyboard: r.bytes(TAG_KEYBOARD).map(<[u8]>::to_vec),
            mouse: r.bytes(TAG_MOUSE).map(<[u8]>::to_vec),
        })
    }
}
