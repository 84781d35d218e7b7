//! Worker-side control plane: the per-role event loops and the snapshot
//! pause/save/restore coordination between them.
//!
//! Each worker runs a single-threaded cooperative loop over its command
//! ring. All mutation inside a worker is serialized by that loop;
//! cross-worker coordination happens only through rings and the shared
//! status words.

pub mod config;
pub mod cpu;
pub mod gpu;
pub mod io;
pub mod net;
pub mod op_chain;
pub mod orchestrator;
pub mod pause;
pub mod registry;
pub mod rpc;
pub mod shared_state;
pub mod worker;
