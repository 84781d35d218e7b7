//! Network-stack restore policy.
//!
//! Snapshot restore cannot resurrect the proxy side of a TCP connection;
//! the policy decides what happens to connections found in a restored
//! network-stack blob.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpRestorePolicy {
    /// Discard in-flight connections. The guest sees resets.
    Drop,
    /// Keep connection records and re-dial the proxy.
    Reconnect,
}

impl TcpRestorePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            TcpRestorePolicy::Drop => "drop",
            TcpRestorePolicy::Reconnect => "reconnect",
        }
    }
}
