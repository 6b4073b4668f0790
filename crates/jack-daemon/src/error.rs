//! Daemon error taxonomy.

use std::path::PathBuf;

use jack_core::PluginId;
use jack_core::wire::NOT_IMPLEMENTED;
use jack_rpc::RpcError;

/// Errors from the plugin host core.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Missing or malformed first-line handshake; the plugin is rejected
    /// at startup.
    #[error("handshake failed for {binary}: {reason}")]
    HandshakeFailed {
        /// Path of the plugin binary.
        binary: PathBuf,
        /// What was wrong with the first line.
        reason: String,
    },

    /// The plugin process could not be started.
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        /// Path of the plugin binary.
        binary: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Metadata was unusable: the probe failed or the document was
    /// malformed.
    #[error("metadata probe failed for {label}: {reason}")]
    MetadataProbe {
        /// Binary path or handle label.
        label: String,
        /// Why the metadata was rejected.
        reason: String,
    },

    /// A plugin with this namespace is already registered.
    #[error("duplicate namespace: {0}")]
    DuplicateNamespace(PluginId),

    /// Plugin metadata claimed a service name reserved for the daemon.
    #[error("plugin {plugin} claims reserved service {service}")]
    ReservedService {
        /// The offending plugin.
        plugin: PluginId,
        /// The reserved service name it declared.
        service: String,
    },

    /// The dependency graph has a cycle; startup aborts.
    #[error("dependency cycle: {}", format_cycle(.0))]
    DependencyCycle(Vec<PluginId>),

    /// Unknown namespace in a CLI or service request.
    #[error("unknown namespace: {0}")]
    NotFound(PluginId),

    /// `ValidateConfig` rejected the payload.
    #[error("plugin {plugin}: validation failed: {reason}")]
    ValidationFailed {
        /// The plugin that rejected the config.
        plugin: PluginId,
        /// The plugin's reason, verbatim.
        reason: String,
    },

    /// `ApplyConfig` returned an error.
    #[error("plugin {plugin}: apply failed: {reason}")]
    ApplyFailed {
        /// The plugin that failed to apply.
        plugin: PluginId,
        /// The plugin's reason, verbatim.
        reason: String,
    },

    /// Some other provider method failed.
    #[error("plugin {plugin}: {method} failed: {reason}")]
    ProviderCall {
        /// The plugin that answered with an error.
        plugin: PluginId,
        /// The contract method that failed.
        method: String,
        /// The plugin's reason, verbatim.
        reason: String,
    },

    /// The plugin answered an optional method with the documented
    /// sentinel.
    #[error("method {0} not implemented")]
    MethodNotImplemented(String),

    /// No provider for the requested service.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The provider exists but did not declare readiness within the
    /// bounded wait.
    #[error("service not ready: {0}")]
    ServiceNotReady(String),

    /// Service-call depth exceeded the ceiling, or a provider called
    /// itself through the bus.
    #[error("loop detected calling service {service}: {reason}")]
    LoopDetected {
        /// The service being called when the loop was cut.
        service: String,
        /// Depth overflow or direct self-call.
        reason: String,
    },

    /// A deadline expired.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Transport failure on a plugin session.
    #[error(transparent)]
    Rpc(RpcError),

    /// Filesystem or socket failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<RpcError> for DaemonError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Timeout => Self::Timeout("rpc call".into()),
            other => Self::Rpc(other),
        }
    }
}

impl DaemonError {
    /// Whether this is the optional-method sentinel.
    #[must_use]
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::MethodNotImplemented(_))
    }

    /// Map a raw session error for `method`, recognizing the sentinel a
    /// provider returns for optional methods it does not handle.
    #[must_use]
    pub fn from_call(method: &str, e: RpcError) -> Self {
        match e {
            RpcError::Remote(reason) if reason == NOT_IMPLEMENTED => {
                Self::MethodNotImplemented(method.to_string())
            }
            other => Self::from(other),
        }
    }
}

fn format_cycle(cycle: &[PluginId]) -> String {
    cycle
        .iter()
        .map(PluginId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_names_members() {
        let err = DaemonError::DependencyCycle(vec![
            PluginId::from_static("a"),
            PluginId::from_static("b"),
            PluginId::from_static("a"),
        ]);
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_sentinel_recognition() {
        let err = DaemonError::from_call("OnLogEvent", RpcError::Remote(NOT_IMPLEMENTED.into()));
        assert!(err.is_not_implemented());

        let err = DaemonError::from_call("OnLogEvent", RpcError::Remote("real failure".into()));
        assert!(!err.is_not_implemented());
    }

    #[test]
    fn test_rpc_timeout_maps_to_timeout() {
        let err = DaemonError::from(RpcError::Timeout);
        assert!(matches!(err, DaemonError::Timeout(_)));
    }
}
