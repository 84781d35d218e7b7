//! Multi-producer / single-consumer byte-record ring buffer.
//!
//! Records are length-prefixed and 4-byte aligned. A record never
//! straddles the end of the buffer; when the tail region is too small the
//! producer writes a wrap marker and the record starts again at offset 0.
//! Producers reserve space with a CAS on a monotonic reservation counter
//! and publish in reservation order; the consumer only reads below the
//! publish frontier.
//!
//! The data area is a slice of atomic bytes, matching the shared-memory
//! deployment where the ring lives in a buffer shared between isolated
//! execution contexts.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering::Relaxed, Ordering::SeqCst};

/// Bytes of the per-record length header.
pub const HEADER_BYTES: usize = 4;

const WRAP_MARKER: u32 = u32::MAX;

/// Total ring bytes consumed by a record carrying `payload_len` bytes,
/// excluding any wrap padding.
pub fn record_size(payload_len: usize) -> usize {
    HEADER_BYTES + ((payload_len + 3) & !3)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// Not enough free space right now.
    Full,
    /// The record can never fit in this ring.
    TooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    Empty,
    /// The length header does not describe a committed record.
    Corrupt,
}

pub struct RingBuffer {
    buf: Box<[AtomicU8]>,
    /// Consumer position. Monotonic byte counter; offset is `% capacity`.
    head: AtomicU64,
    /// Publish frontier. Records below this are fully written.
    commit: AtomicU64,
    /// Reservation frontier. CAS target for producers.
    reserve: AtomicU64,
}

impl RingBuffer {
    /// `capacity_bytes` must be a multiple of 4 and at least two headers.
    pub fn new(capacity_bytes: usize) -> Self {
        assert!(capacity_bytes >= 2 * HEADER_BYTES, "ring too small");
        assert_eq!(capacity_bytes % 4, 0, "ring capacity must be 4-aligned");
        let mut buf = Vec::with_capacity(capacity_bytes);
        buf.resize_with(capacity_bytes, || AtomicU8::new(0));
        Self {
            buf: buf.into_boxed_slice(),
            head: AtomicU64::new(0),
            commit: AtomicU64::new(0),
            reserve: AtomicU64::new(0),
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(SeqCst) == self.commit.load(SeqCst)
    }

    pub fn try_push(&self, msg: &[u8]) -> Result<(), PushError> {
        let capacity = self.buf.len();
        let need = record_size(msg.len());
        // Keep one header of slack so a wrap marker always fits.
        if need + HEADER_BYTES > capacity {
            return Err(PushError::TooLarge);
        }

        let cap = capacity as u64;
        let mut r = self.reserve.load(SeqCst);
        loop {
            let off = (r % cap) as usize;
            let pad = if off + need <= capacity {
                0
            } else {
                capacity - off
            };
            let start = r + pad as u64;
            let end = start + need as u64;
            if end - self.head.load(SeqCst) > cap {
                return Err(PushError::Full);
            }
            match self.reserve.compare_exchange_weak(r, end, SeqCst, SeqCst) {
                Ok(_) => {
                    if pad > 0 {
                        self.store_u32(off, WRAP_MARKER);
                    }
                    let soff = (start % cap) as usize;
                    self.store_u32(soff, msg.len() as u32);
                    for (i, b) in msg.iter().enumerate() {
                        self.buf[soff + HEADER_BYTES + i].store(*b, Relaxed);
                    }
                    // Publish in reservation order.
                    while self.commit.load(SeqCst) != r {
                        std::hint::spin_loop();
                    }
                    self.commit.store(end, SeqCst);
                    return Ok(());
                }
                Err(current) => r = current,
            }
        }
    }

    pub fn try_pop(&self) -> Result<Vec<u8>, PopError> {
        let capacity = self.buf.len();
        let cap = capacity as u64;
        let mut h = self.head.load(SeqCst);
        loop {
            let c = self.commit.load(SeqCst);
            if h == c {
                return Err(PopError::Empty);
            }
            let off = (h % cap) as usize;
            let header = self.load_u32(off);
            if header == WRAP_MARKER {
                h += (capacity - off) as u64;
                self.head.store(h, SeqCst);
                continue;
            }
            let len = header as usize;
            let size = record_size(len);
            if size + HEADER_BYTES > capacity || h + size as u64 > c {
                return Err(PopError::Corrupt);
            }
            let mut out = vec![0u8; len];
            for (i, b) in out.iter_mut().enumerate() {
                *b = self.buf[off + HEADER_BYTES + i].load(Relaxed);
            }
            self.head.store(h + size as u64, SeqCst);
            return Ok(out);
        }
    }

    pub fn push_spinning(&self, msg: &[u8]) {
        loop {
            match self.try_push(msg) {
                Ok(()) => return,
                Err(PushError::Full) => std::hint::spin_loop(),
                Err(PushError::TooLarge) => panic!("record too large for ring"),
            }
        }
    }

    pub fn pop_spinning(&self) -> Vec<u8> {
        loop {
            match self.try_pop() {
                Ok(msg) => return msg,
                Err(PopError::Empty) => std::hint::spin_loop(),
                Err(PopError::Corrupt) => panic!("corrupt ring record"),
            }
        }
    }

    fn store_u32(&self, off: usize, v: u32) {
        for (i, b) in v.to_le_bytes().iter().enumerate() {
            self.buf[off + i].store(*b, Relaxed);
        }
    }

    fn load_u32(&self, off: usize) -> u32 {
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.buf[off + i].load(Relaxed);
        }
        u32::from_le_bytes(bytes)
    }
}
