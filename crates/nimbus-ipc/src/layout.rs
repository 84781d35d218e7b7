//! Word-offset constants for the shared IPC region.
//!
//! All fields are little-endian u32 words. Offsets are expressed in words
//! so they can be applied directly to a u32 view of the buffer.

/// Region header: one per IPC buffer.
pub mod ipc_header {
    pub const MAGIC: usize = 0;
    pub const VERSION: usize = 1;
    pub const QUEUE_COUNT: usize = 2;
    pub const RESERVED: usize = 3;
    pub const WORDS: usize = 4;
    pub const BYTES: usize = WORDS * 4;

    pub const MAGIC_VALUE: u32 = u32::from_le_bytes(*b"NIPC");
    pub const VERSION_VALUE: u32 = 1;
}

/// Per-queue descriptor, `queue_count` of them after the header.
pub mod queue_desc {
    pub const KIND: usize = 0;
    pub const OFFSET_BYTES: usize = 1;
    pub const CAPACITY_BYTES: usize = 2;
    pub const RESERVED: usize = 3;
    pub const WORDS: usize = 4;
    pub const BYTES: usize = WORDS * 4;
}

/// Queue kinds. Values are part of the coordinator contract and must not
/// change.
pub mod queue_kind {
    pub const CMD: u32 = 0;
    pub const EVT: u32 = 1;
    pub const NET_TX: u32 = 2;
    pub const NET_RX: u32 = 3;
    pub const DISK: u32 = 4;
    pub const USB: u32 = 5;
}

/// Ring control words at the start of each queue's data area.
pub mod ring_ctrl {
    pub const HEAD: usize = 0;
    pub const TAIL: usize = 1;
    pub const CAPACITY: usize = 2;
    pub const RESERVED: usize = 3;
    pub const WORDS: usize = 4;
    pub const BYTES: usize = WORDS * 4;
}
