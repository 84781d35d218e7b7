//! Host input-event batching.
//!
//! The capture pipeline coalesces browser input into fixed-width event
//! batches and ships them to the IO worker over a ring. Fixed-width
//! records keep the consumer allocation-free and let a batch be sized
//! from its header alone.

pub mod batch;

pub use batch::{decode_batch, encode_batch, BatchError, InputEvent};
