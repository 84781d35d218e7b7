//! IPC buffer construction and validation.
//!
//! The coordinator allocates one shared buffer per worker and describes
//! the rings it carved out of it with the fixed layout in [`crate::layout`].
//! Workers re-parse the buffer on init and refuse to run on anything that
//! fails validation.

use thiserror::Error;

use crate::layout::{ipc_header, queue_desc, ring_ctrl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcQueueSpec {
    pub kind: u32,
    pub capacity_bytes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcQueueDesc {
    pub kind: u32,
    pub offset_bytes: usize,
    pub capacity_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcLayout {
    pub total_bytes: usize,
    pub queues: Vec<IpcQueueDesc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IpcLayoutError {
    #[error("bad IPC magic: {found:#010x}")]
    BadMagic { found: u32 },
    #[error("unsupported IPC layout version: {found}")]
    UnsupportedVersion { found: u32 },
    #[error("IPC buffer truncated")]
    Truncated,
    #[error("queue {index} reserved field not zero: {found:#010x}")]
    QueueReservedNotZero { index: usize, found: u32 },
    #[error("queue {index} data area out of bounds")]
    QueueOutOfBounds { index: usize },
    #[error("queue {index} ring header capacity {found} != descriptor capacity {expected}")]
    RingHeaderCapacityMismatch {
        index: usize,
        expected: u32,
        found: u32,
    },
}

fn read_u32(buf: &[u8], byte_off: usize) -> Result<u32, IpcLayoutError> {
    let end = byte_off.checked_add(4).ok_or(IpcLayoutError::Truncated)?;
    let bytes = buf.get(byte_off..end).ok_or(IpcLayoutError::Truncated)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn write_u32(buf: &mut [u8], byte_off: usize, v: u32) {
    buf[byte_off..byte_off + 4].copy_from_slice(&v.to_le_bytes());
}

/// Builds an IPC buffer image: header, queue descriptors, then each
/// queue's ring control words followed by its data area.
pub fn create_ipc_buffer(specs: &[IpcQueueSpec]) -> Vec<u8> {
    let desc_area = specs.len() * queue_desc::BYTES;
    let mut total = ipc_header::BYTES + desc_area;
    let mut offsets = Vec::with_capacity(specs.len());
    for spec in specs {
        offsets.push(total);
        total += ring_ctrl::BYTES + spec.capacity_bytes as usize;
    }

    let mut buf = vec![0u8; total];
    write_u32(&mut buf, ipc_header::MAGIC * 4, ipc_header::MAGIC_VALUE);
    write_u32(&mut buf, ipc_header::VERSION * 4, ipc_header::VERSION_VALUE);
    write_u32(&mut buf, ipc_header::QUEUE_COUNT * 4, specs.len() as u32);

    for (i, (spec, offset)) in specs.iter().zip(&offsets).enumerate() {
        let base = ipc_header::BYTES + i * queue_desc::BYTES;
        write_u32(&mut buf, base + queue_desc::KIND * 4, spec.kind);
        write_u32(&mut buf, base + queue_desc::OFFSET_BYTES * 4, *offset as u32);
        write_u32(
            &mut buf,
            base + queue_desc::CAPACITY_BYTES * 4,
            spec.capacity_bytes,
        );
        write_u32(
            &mut buf,
            offset + ring_ctrl::CAPACITY * 4,
            spec.capacity_bytes,
        );
    }
    buf
}

/// Validates an IPC buffer image and returns its queue table.
pub fn parse_ipc_buffer(buf: &[u8]) -> Result<IpcLayout, IpcLayoutError> {
    let magic = read_u32(buf, ipc_header::MAGIC * 4)?;
    if magic != ipc_header::MAGIC_VALUE {
        return Err(IpcLayoutError::BadMagic { found: magic });
    }
    let version = read_u32(buf, ipc_header::VERSION * 4)?;
    if version != ipc_header::VERSION_VALUE {
        return Err(IpcLayoutError::UnsupportedVersion { found: version });
    }
    let queue_count = read_u32(buf, ipc_header::QUEUE_COUNT * 4)? as usize;

    let mut queues = Vec::with_capacity(queue_count.min(64));
    for index in 0..queue_count {
        let base = ipc_header::BYTES + index * queue_desc::BYTES;
        let kind = read_u32(buf, base + queue_desc::KIND * 4)?;
        let offset_bytes = read_u32(buf, base + queue_desc::OFFSET_BYTES * 4)? as usize;
        let capacity_bytes = read_u32(buf, base + queue_desc::CAPACITY_BYTES * 4)?;
        let reserved = read_u32(buf, base + queue_desc::RESERVED * 4)?;
        if reserved != 0 {
            return Err(IpcLayoutError::QueueReservedNotZero {
                index,
                found: reserved,
            });
        }

        let data_end = offset_bytes
            .checked_add(ring_ctrl::BYTES)
            .and_then(|o| o.checked_add(capacity_bytes as usize))
            .ok_or(IpcLayoutError::QueueOutOfBounds { index })?;
        if data_end > buf.len() {
            return Err(IpcLayoutError::QueueOutOfBounds { index });
        }

        let ring_capacity = read_u32(buf, offset_bytes + ring_ctrl::CAPACITY * 4)?;
        if ring_capacity != capacity_bytes {
            return Err(IpcLayoutError::RingHeaderCapacityMismatch {
                index,
                expected: capacity_bytes,
                found: ring_capacity,
            });
        }

        queues.push(IpcQueueDesc {
            kind,
            offset_bytes,
            capacity_bytes: capacity_bytes as usize,
        });
    }

    Ok(IpcLayout {
        total_bytes: buf.len(),
        queues,
    })
}

/// Returns the `nth` queue of the given kind, if present.
pub fn find_queue_by_kind(layout: &IpcLayout, kind: u32, nth: usize) -> Option<&IpcQueueDesc> {
    layout.queues.iter().filter(|q| q.kind == kind).nth(nth)
}
