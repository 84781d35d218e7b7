//! Snapshot-frame transport between the workers and the VM runtime.
//!
//! A snapshot frame is the `(cpu_bytes, mmu_bytes, devices[])` triple the
//! IO worker assembles on save and consumes on restore. The VM runtime
//! persists frames through one of two export surfaces: a free-function
//! `save`/`restore` pair, or a builder that accumulates state and commits
//! it in one call. [`VmRuntimeModule`] resolves whichever the loaded
//! runtime provides.

mod container;
mod device;
mod error;
mod exports;

pub use container::{
    restore_frame, restore_frame_from_store, save_frame, save_frame_to_store, SectionId,
    SNAPSHOT_ENDIANNESS_LITTLE, SNAPSHOT_MAGIC, SNAPSHOT_VERSION_V1,
};
pub use device::{limits, DeviceId, DeviceState, CPU_INTERNAL_VERSION};
pub use error::{Result, SnapshotError};
pub use exports::{
    BuilderExport, ContainerBuilder, ContainerRuntime, FreeFnExport, VmRuntimeModule,
};

/// The conceptual snapshot payload: guest CPU state, MMU state, and the
/// per-device blobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotFrame {
    pub cpu: Vec<u8>,
    pub mmu: Vec<u8>,
    pub devices: Vec<DeviceState>,
}
