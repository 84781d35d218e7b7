//! Virtqueue ring layout.
//!
//! A virtqueue occupies three contiguous regions of guest memory:
//! the descriptor table (16 bytes per entry, 16-byte aligned), the
//! available ring (2-byte aligned) and the used ring (aligned to the
//! negotiated ring alignment). When VIRTIO_F_EVENT_IDX is negotiated each
//! ring grows a trailing u16 (`used_event` / `avail_event`).

use thiserror::Error;

pub const DESC_ENTRY_BYTES: usize = 16;
pub const MAX_QUEUE_SIZE: u16 = 32768;

/// Fallback used-ring alignment when the host allocator rejects the
/// page-sized preference.
pub const FALLBACK_RING_ALIGNMENT: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("ring alignment {0} is not a power of two >= 4")]
    InvalidAlignment(usize),
    #[error("queue size {0} out of range 1..={max}", max = MAX_QUEUE_SIZE)]
    InvalidQueueSize(u16),
    #[error("ring layout size overflow")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    pub desc_off: usize,
    pub desc_size: usize,
    pub avail_off: usize,
    pub avail_size: usize,
    pub used_off: usize,
    pub used_size: usize,
    pub total: usize,
}

fn align_up(value: usize, alignment: usize) -> Result<usize, LayoutError> {
    let mask = alignment - 1;
    value
        .checked_add(mask)
        .map(|v| v & !mask)
        .ok_or(LayoutError::Overflow)
}

/// Computes the ring region offsets for a queue.
///
/// `ring_alignment` must be a power of two of at least 4; it governs the
/// used ring only. The descriptor table starts at offset 0 and the
/// regions never overlap: `desc_off + desc_size <= avail_off`,
/// `avail_off + avail_size <= used_off`, `used_off + used_size == total`.
pub fn compute_layout(
    queue_size: u16,
    event_idx: bool,
    ring_alignment: usize,
) -> Result<RingLayout, LayoutError> {
    if !ring_alignment.is_power_of_two() || ring_alignment < 4 {
        return Err(LayoutError::InvalidAlignment(ring_alignment));
    }
    if queue_size == 0 || queue_size > MAX_QUEUE_SIZE {
        return Err(LayoutError::InvalidQueueSize(queue_size));
    }

    let entries = queue_size as usize;
    let event_words = if event_idx { 2 } else { 0 };

    let desc_size = entries
        .checked_mul(DESC_ENTRY_BYTES)
        .ok_or(LayoutError::Overflow)?;
    // flags + idx + ring[entries] (+ used_event)
    let avail_size = 4 + entries.checked_mul(2).ok_or(LayoutError::Overflow)? + event_words;
    // flags + idx + ring[entries] of 8-byte elements (+ avail_event)
    let used_size = 4 + entries.checked_mul(8).ok_or(LayoutError::Overflow)? + event_words;

    let desc_off = 0usize;
    let avail_off = align_up(desc_off + desc_size, 2)?;
    let used_off = align_up(
        avail_off.checked_add(avail_size).ok_or(LayoutError::Overflow)?,
        ring_alignment,
    )?;
    let total = used_off.checked_add(used_size).ok_or(LayoutError::Overflow)?;

    Ok(RingLayout {
        desc_off,
        desc_size,
        avail_off,
        avail_size,
        used_off,
        used_size,
        total,
    })
}

/// Picks the used-ring alignment for a fresh allocation: the page size
/// when the host allocator accepts it, else the 16-byte fallback.
pub fn alloc_ring_alignment(page_size: usize, accepts: impl Fn(usize) -> bool) -> usize {
    if page_size.is_power_of_two() && page_size >= 4 && accepts(page_size) {
        page_size
    } else {
        FALLBACK_RING_ALIGNMENT
    }
}
