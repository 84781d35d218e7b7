//! Snapshot RPC request validation and error mapping.
//!
//! Invalid requests are answered with `{ok: false, error}` and cause no
//! state change; snapshot failures are local to the request that hit
//! them.

use nimbus_ipc::protocol::RpcFailure;
use nimbus_snapshot::SnapshotError;

pub fn validate_request_id(request_id: u64) -> Result<(), RpcFailure> {
    if request_id == 0 {
        return Err(RpcFailure {
            name: "InvalidRequest".to_string(),
            message: "request_id must be nonzero".to_string(),
        });
    }
    Ok(())
}

pub fn validate_path(path: &str) -> Result<(), RpcFailure> {
    if path.is_empty() {
        return Err(RpcFailure {
            name: "InvalidRequest".to_string(),
            message: "path must be non-empty".to_string(),
        });
    }
    Ok(())
}

pub fn failure_from_snapshot_error(err: &SnapshotError) -> RpcFailure {
    let name = match err {
        SnapshotError::MissingRuntime => "MissingRuntime",
        SnapshotError::MissingExport => "MissingExport",
        SnapshotError::Corrupt(_) => "CorruptSnapshot",
        SnapshotError::Storage(_) => "StorageError",
        SnapshotError::Io(_) => "IoError",
    };
    RpcFailure {
        name: name.to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_request_ids_are_invalid() {
        assert!(validate_request_id(0).is_err());
        assert!(validate_request_id(1).is_ok());
    }

    #[test]
    fn empty_paths_are_invalid() {
        assert!(validate_path("").is_err());
        assert!(validate_path("snapshots/a").is_ok());
    }

    #[test]
    fn snapshot_errors_map_to_stable_names() {
        let f = failure_from_snapshot_error(&SnapshotError::MissingRuntime);
        assert_eq!(f.name, "MissingRuntime");
        let f = failure_from_snapshot_error(&SnapshotError::MissingExport);
        assert_eq!(f.name, "MissingExport");
    }
}
