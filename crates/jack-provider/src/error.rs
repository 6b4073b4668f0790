//! Provider-side errors.

use jack_core::wire::NOT_IMPLEMENTED;
use jack_rpc::RpcError;

/// Errors a provider reports back to the daemon.
///
/// Whatever this displays as is what crosses the wire in the RPC response
/// `error` field, so variants format as the operator should read them.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The documented sentinel for an optional method the plugin does not
    /// handle. The daemon matches the message verbatim.
    #[error("{NOT_IMPLEMENTED}")]
    NotImplemented,

    /// The configuration document was rejected.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Applying configuration to the system failed.
    #[error("apply failed: {0}")]
    ApplyFailed(String),

    /// A service call through the daemon failed.
    #[error("service call failed: {0}")]
    ServiceCall(String),

    /// The RPC session to the daemon is gone; the plugin should exit.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// I/O failure inside the provider.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Anything else, surfaced verbatim.
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Wrap an arbitrary error message.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
