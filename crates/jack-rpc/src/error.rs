//! RPC transport errors.

/// Errors from RPC sessions and framing.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The underlying stream ended unexpectedly; every pending call on the
    /// session fails with this.
    #[error("session closed")]
    SessionClosed,

    /// An oversized or malformed frame; the session aborts.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote answered with a non-empty `error` field.
    #[error("{0}")]
    Remote(String),

    /// A deadline expired while waiting for a response.
    #[error("rpc call timed out")]
    Timeout,

    /// I/O failure on the underlying stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// Whether this error came from the remote handler (as opposed to the
    /// transport itself).
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Result type for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;
