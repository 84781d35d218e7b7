use nimbus_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt snapshot: {0}")]
    Corrupt(&'static str),
    #[error("vm runtime module not loaded")]
    MissingRuntime,
    #[error("vm runtime exposes no snapshot export")]
    MissingExport,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;
