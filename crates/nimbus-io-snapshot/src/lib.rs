//! Device-state serialization for the IO worker.
//!
//! Everything a device blob passes through between a live device model
//! and the snapshot frame lives here: the tagged per-device state codec,
//! the USB and virtio-input aggregate containers, and the blob-kind
//! normalization rules that keep old snapshots restorable.

pub mod io;
