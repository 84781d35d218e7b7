//! Input batch wire format.
//!
//! ```text
//! header = "INPB" | version: u16 | count: u16
//! record = type: u8 | payload[7]          (8 bytes, fixed width)
//! ```
//!
//! Payload layout by type:
//!
//! - `KeyScancode`: byte 1 = scancode length (1..=6), bytes 2.. = packed
//!   Set-1/Set-2 scancode bytes.
//! - `MouseMove`: bytes 2..4 = dx (i16), bytes 4..6 = dy (i16).
//! - `MouseWheel`: bytes 2..4 = delta (i16).
//! - `MouseButtons`: byte 1 = 5-bit button mask; upper bits must be zero.

use thiserror::Error;

pub const BATCH_MAGIC: [u8; 4] = *b"INPB";
pub const BATCH_VERSION: u16 = 1;
pub const HEADER_BYTES: usize = 8;
pub const RECORD_BYTES: usize = 8;

pub const MAX_SCANCODE_BYTES: usize = 6;
pub const BUTTON_MASK_BITS: u8 = 0x1F;

const TYPE_KEY_SCANCODE: u8 = 1;
const TYPE_MOUSE_MOVE: u8 = 2;
const TYPE_MOUSE_WHEEL: u8 = 3;
const TYPE_MOUSE_BUTTONS: u8 = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("bad input batch magic")]
    BadMagic,
    #[error("unsupported input batch version {0}")]
    UnsupportedVersion(u16),
    #[error("truncated input batch")]
    Truncated,
    #[error("invalid input event: {0}")]
    InvalidEvent(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// Packed scancode bytes, make or break, up to six bytes.
    KeyScancode { bytes: Vec<u8> },
    MouseMove { dx: i16, dy: i16 },
    MouseWheel { delta: i16 },
    /// 5-bit button mask: L, R, M, back, forward.
    MouseButtons { mask: u8 },
}

pub fn encode_batch(events: &[InputEvent]) -> Result<Vec<u8>, BatchError> {
    if events.len() > u16::MAX as usize {
        return Err(BatchError::InvalidEvent("too many events"));
    }
    let mut out = Vec::with_capacity(HEADER_BYTES + events.len() * RECORD_BYTES);
    out.extend_from_slice(&BATCH_MAGIC);
    out.extend_from_slice(&BATCH_VERSION.to_le_bytes());
    out.extend_from_slice(&(events.len() as u16).to_le_bytes());

    for event in events {
        let mut record = [0u8; RECORD_BYTES];
        match event {
            InputEvent::KeyScancode { bytes } => {
                if bytes.is_empty() || bytes.len() > MAX_SCANCODE_BYTES {
                    return Err(BatchError::InvalidEvent("scancode length out of range"));
                }
                record[0] = TYPE_KEY_SCANCODE;
                record[1] = bytes.len() as u8;
                record[2..2 + bytes.len()].copy_from_slice(bytes);
            }
            InputEvent::MouseMove { dx, dy } => {
                record[0] = TYPE_MOUSE_MOVE;
                record[2..4].copy_from_slice(&dx.to_le_bytes());
                record[4..6].copy_from_slice(&dy.to_le_bytes());
            }
            InputEvent::MouseWheel { delta } => {
                record[0] = TYPE_MOUSE_WHEEL;
                record[2..4].copy_from_slice(&delta.to_le_bytes());
            }
            InputEvent::MouseButtons { mask } => {
                if mask & !BUTTON_MASK_BITS != 0 {
                    return Err(BatchError::InvalidEvent("button mask out of range"));
                }
                record[0] = TYPE_MOUSE_BUTTONS;
                record[1] = *mask;
            }
        }
        out.extend_from_slice(&record);
    }
    Ok(out)
}

pub fn decode_batch(bytes: &[u8]) -> Result<Vec<InputEvent>, BatchError> {
    if bytes.len() < HEADER_BYTES {
        return Err(BatchError::Truncated);
    }
    if bytes[..4] != BATCH_MAGIC {
        return Err(BatchError::BadMagic);
    }
    let version = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    if version != BATCH_VERSION {
        return Err(BatchError::UnsupportedVersion(version));
    }
    let count = u16::from_le_bytes(bytes[6..8].try_into().unwrap()) as usize;
    if bytes.len() != HEADER_BYTES + count * RECORD_BYTES {
        return Err(BatchError::Truncated);
    }

    let mut events = Vec::with_capacity(count);
    for record in bytes[HEADER_BYTES..].chunks_exact(RECORD_BYTES) {
        let event = match record[0] {
            TYPE_KEY_SCANCODE => {
                let len = record[1] as usize;
                if len == 0 || len > MAX_SCANCODE_BYTES {
                    return Err(BatchError::InvalidEvent("scancode length out of range"));
                }
                InputEvent::KeyScancode {
                    bytes: record[2..2 + len].to_vec(),
                }
            }
            TYPE_MOUSE_MOVE => InputEvent::MouseMove {
                dx: i16::from_le_bytes(record[2..4].try_into().unwrap()),
                dy: i16::from_le_bytes(record[4..6].try_into().unwrap()),
            },
            TYPE_MOUSE_WHEEL => InputEvent::MouseWheel {
                delta: i16::from_le_bytes(record[2..4].try_into().unwrap()),
            },
            TYPE_MOUSE_BUTTONS => {
                let mask = record[1];
                if mask & !BUTTON_MASK_BITS != 0 {
                    return Err(BatchError::InvalidEvent("button mask out of range"));
                }
                InputEvent::MouseButtons { mask }
            }
            _ => return Err(BatchError::InvalidEvent("unknown event type")),
        };
        events.push(event);
    }
    Ok(events)
}
