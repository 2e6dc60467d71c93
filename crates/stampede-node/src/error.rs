use thiserror::Error;

/// Errors surfaced by a single coordination node.
///
/// A timeout or transport failure during a mutating call is ambiguous: the
/// command may have been applied on the server even though the reply was
/// lost. Callers rolling back after such an error must re-read the counter
/// or hand the key to reconciliation rather than compensate blindly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    /// The operation did not complete within the per-operation budget.
    #[error("node {addr}: operation timed out after {elapsed_ms} ms")]
    Timeout { addr: String, elapsed_ms: u64 },

    /// The node could not be reached at all.
    #[error("node {addr}: unreachable: {detail}")]
    Unreachable { addr: String, detail: String },

    /// The node answered with something the client cannot interpret.
    #[error("node {addr}: protocol error: {detail}")]
    Protocol { addr: String, detail: String },
}

impl NodeError {
    /// Address of the node that produced this error.
    pub fn addr(&self) -> &str {
        match self {
            NodeError::Timeout { addr, .. }
            | NodeError::Unreachable { addr, .. }
            | NodeError::Protocol { addr, .. } => addr,
        }
    }

    /// True when the command may have been applied despite the error.
    pub fn possibly_applied(&self) -> bool {
        matches!(self, NodeError::Timeout { .. } | NodeError::Unreachable { .. })
    }
}
