//! VM runtime snapshot export surfaces.
//!
//! Runtime builds have shipped two shapes of snapshot entry point. Older
//! modules expose a free-function pair that takes and returns a whole
//! frame; newer modules expose a builder that accumulates CPU and device
//! state and commits it in one call. [`VmRuntimeModule`] hides the split
//! from the workers: the free-function surface wins when both exist.

use nimbus_storage::BlobStore;

use crate::container::{restore_frame_from_store, save_frame_to_store};
use crate::device::{DeviceId, DeviceState, CPU_INTERNAL_VERSION};
use crate::error::{Result, SnapshotError};
use crate::SnapshotFrame;

pub trait FreeFnExport: Send {
    fn save(&mut self, store: &dyn BlobStore, path: &str, frame: &SnapshotFrame) -> Result<()>;
    fn restore(&mut self, store: &dyn BlobStore, path: &str) -> Result<SnapshotFrame>;
}

pub trait BuilderExport: Send {
    fn set_cpu_state_v2(&mut self, cpu: Vec<u8>, mmu: Vec<u8>);
    fn add_device_state(&mut self, id: u32, version: u32, flags: u32, data: Vec<u8>)
        -> Result<()>;
    /// Commits everything added since the last commit to `path`.
    fn snapshot_full(&mut self, store: &dyn BlobStore, path: &str) -> Result<()>;
    fn restore_full(&mut self, store: &dyn BlobStore, path: &str) -> Result<SnapshotFrame>;
}

/// A loaded VM runtime module's snapshot capability.
#[derive(Default)]
pub struct VmRuntimeModule {
    free: Option<Box<dyn FreeFnExport>>,
    builder: Option<Box<dyn BuilderExport>>,
}

impl VmRuntimeModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_free_export(export: Box<dyn FreeFnExport>) -> Self {
        Self {
            free: Some(export),
            builder: None,
        }
    }

    pub fn with_builder_export(export: Box<dyn BuilderExport>) -> Self {
        Self {
            free: None,
            builder: Some(export),
        }
    }

    pub fn with_exports(
        free: Option<Box<dyn FreeFnExport>>,
        builder: Option<Box<dyn BuilderExport>>,
    ) -> Self {
        Self { free, builder }
    }

    pub fn has_export(&self) -> bool {
        self.free.is_some() || self.builder.is_some()
    }

    /// Persists a frame through whichever export the module provides.
    pub fn save_frame(
        &mut self,
        store: &dyn BlobStore,
        path: &str,
        frame: &SnapshotFrame,
    ) -> Result<()> {
        if let Some(free) = self.free.as_mut() {
            return free.save(store, path, frame);
        }
        if let Some(builder) = self.builder.as_mut() {
            builder.set_cpu_state_v2(frame.cpu.clone(), frame.mmu.clone());
            for dev in &frame.devices {
                let version = if dev.id == DeviceId::CPU_INTERNAL {
                    CPU_INTERNAL_VERSION
                } else {
                    dev.version
                };
                builder.add_device_state(
                    dev.id.0,
                    version as u32,
                    dev.flags as u32,
                    dev.data.clone(),
                )?;
            }
            return builder.snapshot_full(store, path);
        }
        Err(SnapshotError::MissingExport)
    }

    /// Reads a frame back through whichever export the module provides.
    pub fn restore_frame(&mut self, store: &dyn BlobStore, path: &str) -> Result<SnapshotFrame> {
        if let Some(free) = self.free.as_mut() {
            return free.restore(store, path);
        }
        if let Some(builder) = self.builder.as_mut() {
            return builder.restore_full(store, path);
        }
        Err(SnapshotError::MissingExport)
    }
}

/// The stock free-function export: persists frames as NSNP containers in
/// the blob store.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContainerRuntime;

impl FreeFnExport for ContainerRuntime {
    fn save(&mut self, store: &dyn BlobStore, path: &str, frame: &SnapshotFrame) -> Result<()> {
        save_frame_to_store(store, path, frame)
    }

    fn restore(&mut self, store: &dyn BlobStore, path: &str) -> Result<SnapshotFrame> {
        restore_frame_from_store(store, path)
    }
}

/// A builder export backed by the same NSNP container, for runtime
/// modules that only expose the builder shape.
#[derive(Default)]
pub struct ContainerBuilder {
    cpu: Vec<u8>,
    mmu: Vec<u8>,
    devices: Vec<DeviceState>,
}

impl BuilderExport for ContainerBuilder {
    fn set_cpu_state_v2(&mut self, cpu: Vec<u8>, mmu: Vec<u8>) {
        self.cpu = cpu;
        self.mmu = mmu;
    }

    fn add_device_state(
        &mut self,
        id: u32,
        version: u32,
        flags: u32,
        data: Vec<u8>,
    ) -> Result<()> {
        let version =
            u16::try_from(version).map_err(|_| SnapshotError::Corrupt("device version out of range"))?;
        let flags =
            u16::try_from(flags).map_err(|_| SnapshotError::Corrupt("device flags out of range"))?;
        self.devices.push(DeviceState {
            id: DeviceId(id),
            version,
            flags,
            data,
        });
        Ok(())
    }

    fn snapshot_full(&mut self, store: &dyn BlobStore, path: &str) -> Result<()> {
        let frame = SnapshotFrame {
            cpu: std::mem::take(&mut self.cpu),
            mmu: std::mem::take(&mut self.mmu),
            devices: std::mem::take(&mut self.devices),
        };
        save_frame_to_store(store, path, &frame)
    }

    fn restore_full(&mut self, store: &dyn BlobStore, path: &str) -> Result<SnapshotFrame> {
        restore_frame_from_store(store, path)
    }
}
