//! Blob-store abstraction used by the snapshot save/restore paths.
//!
//! The coordinator hands the workers string paths into a hierarchical,
//! byte-addressable persistent store (OPFS in the browser deployment).
//! Workers only ever see this trait; the store implementation lives on
//! the other side of the worker boundary.

use std::collections::BTreeMap;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob path: {0}")]
    InvalidPath(String),
    #[error("storage io error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Hierarchical byte-addressable persistent storage keyed by `/`-separated
/// string paths.
pub trait BlobStore: Send + Sync {
    fn read(&self, path: &str) -> Result<Vec<u8>>;
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;
    fn exists(&self, path: &str) -> bool;
    fn remove(&self, path: &str) -> Result<()>;
}

/// Validates a blob path: non-empty, `/`-separated, no empty segments and
/// no `.`/`..` traversal.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
    }
    Ok(())
}

/// In-memory store for tests and host-side tooling.
#[derive(Default)]
pub struct MemBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemBlobStore {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        validate_path(path)?;
        self.blobs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        validate_path(path)?;
        self.blobs
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        validate_path(path).is_ok() && self.blobs.lock().unwrap().contains_key(path)
    }

    fn remove(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        self.blobs
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}
