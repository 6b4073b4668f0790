//! Provider RPC contract: handshake tokens, method names, and the
//! plugin-to-plugin service call envelope.
//!
//! The daemon and the provider SDK both speak this vocabulary; it changes
//! only with the protocol version in the handshake line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PluginId;

/// First token of the startup handshake line.
pub const HANDSHAKE_KEY: &str = "JACK_PLUGIN";
/// Second token of the startup handshake line.
pub const HANDSHAKE_VALUE: &str = "generic";
/// Provider protocol version, third token of the handshake line.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum service-call hop count before the bus reports a loop.
pub const MAX_SERVICE_DEPTH: u32 = 8;

/// Error string a provider returns for an optional method it does not
/// implement. The daemon matches it verbatim.
pub const NOT_IMPLEMENTED: &str = "method not implemented";

/// Service names under this prefix are answered by the daemon itself;
/// plugin metadata may not claim them.
pub const RESERVED_SERVICE_PREFIX: &str = "jack.";

/// Provider contract method names.
pub mod methods {
    /// Fetch plugin metadata; deterministic and side-effect-free.
    pub const METADATA: &str = "Metadata";
    /// Apply a configuration document to the system.
    pub const APPLY_CONFIG: &str = "ApplyConfig";
    /// Side-effect-free configuration check.
    pub const VALIDATE_CONFIG: &str = "ValidateConfig";
    /// Remove all plugin-managed system state; idempotent.
    pub const FLUSH: &str = "Flush";
    /// Current live state.
    pub const STATUS: &str = "Status";
    /// Run one of the plugin's CLI commands.
    pub const EXECUTE_CLI_COMMAND: &str = "ExecuteCLICommand";
    /// Deliver a log event; optional.
    pub const ON_LOG_EVENT: &str = "OnLogEvent";
    /// List the services the plugin exports; optional.
    pub const GET_PROVIDED_SERVICES: &str = "GetProvidedServices";
    /// Invoke a service, in either direction: plugins send it to the daemon
    /// to reach other plugins, and the daemon sends it to the owning plugin.
    pub const CALL_SERVICE: &str = "CallService";
}

/// The daemon's built-in services, resolved before any plugin provider.
pub mod services {
    /// Registry queries and readiness signalling.
    pub const REGISTRY: &str = "jack.registry";
    /// Registry service: list registered plugins.
    pub const REGISTRY_LIST: &str = "List";
    /// Registry service: metadata and state for one namespace.
    pub const REGISTRY_INFO: &str = "Info";
    /// Registry service: the caller declares its provided services usable.
    pub const REGISTRY_MARK_SERVICE_READY: &str = "MarkServiceReady";

    /// Log event fan-out.
    pub const LOG: &str = "jack.log";
    /// Log service: broadcast an event to every live plugin's `OnLogEvent`.
    pub const LOG_BROADCAST: &str = "Broadcast";
}

/// The handshake line a plugin writes to stdout before anything else,
/// trailing newline included.
#[must_use]
pub fn handshake_line() -> String {
    format!("{HANDSHAKE_KEY}|{HANDSHAKE_VALUE}|{PROTOCOL_VERSION}\n")
}

/// Verify a received handshake line (with or without its trailing newline).
///
/// # Errors
///
/// Returns a description of the mismatch; any byte out of place is fatal
/// for the plugin process that sent it.
pub fn parse_handshake(line: &str) -> Result<(), String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut tokens = line.splitn(4, '|');
    let key = tokens.next().unwrap_or_default();
    let value = tokens.next();
    let version = tokens.next();
    if tokens.next().is_some() {
        return Err(format!("expected 3 handshake tokens, got more: {line:?}"));
    }
    if key != HANDSHAKE_KEY {
        return Err(format!("unexpected handshake key {key:?}"));
    }
    match value {
        Some(HANDSHAKE_VALUE) => {},
        Some(other) => return Err(format!("unexpected handshake value {other:?}")),
        None => return Err("handshake value missing".into()),
    }
    match version.map(str::parse::<u32>) {
        Some(Ok(PROTOCOL_VERSION)) => Ok(()),
        Some(Ok(other)) => Err(format!(
            "unsupported protocol version {other} (want {PROTOCOL_VERSION})"
        )),
        Some(Err(_)) | None => Err(format!("malformed protocol version in {line:?}")),
    }
}

/// A plugin-to-plugin service invocation, routed through the daemon.
///
/// The calling plugin's `ServiceClient` stamps `depth` (its inbound depth
/// plus one); the daemon fills in `caller` from the session the request
/// arrived on and forwards the envelope to the service owner unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCall {
    /// Namespace of the calling plugin; stamped by the daemon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<PluginId>,
    /// Target service name.
    pub service: String,
    /// Method on the target service.
    pub method: String,
    /// Method arguments.
    #[serde(default)]
    pub args: Value,
    /// Hop count; calls beyond [`MAX_SERVICE_DEPTH`] are rejected.
    #[serde(default)]
    pub depth: u32,
}

/// Arguments of an `ExecuteCLICommand` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliInvocation {
    /// The plugin CLI command name.
    pub command: String,
    /// Arguments for the command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_line_shape() {
        assert_eq!(handshake_line(), "JACK_PLUGIN|generic|1\n");
    }

    #[test]
    fn test_parse_handshake_accepts_own_line() {
        assert!(parse_handshake(&handshake_line()).is_ok());
        assert!(parse_handshake("JACK_PLUGIN|generic|1").is_ok());
    }

    #[test]
    fn test_parse_handshake_rejects_garbage() {
        assert!(parse_handshake("hello").is_err());
        assert!(parse_handshake("").is_err());
        assert!(parse_handshake("JACK_PLUGIN|generic").is_err());
        assert!(parse_handshake("JACK_PLUGIN|generic|2").is_err());
        assert!(parse_handshake("JACK_PLUGIN|specific|1").is_err());
        assert!(parse_handshake("jack_plugin|generic|1").is_err());
        assert!(parse_handshake("JACK_PLUGIN|generic|1|extra").is_err());
        assert!(parse_handshake("JACK_PLUGIN|generic|one").is_err());
    }

    #[test]
    fn test_service_call_round_trip() {
        let call = ServiceCall {
            caller: Some(PluginId::from_static("firewall-log")),
            service: "database".into(),
            method: "Exec".into(),
            args: serde_json::json!({"sql": "create table flows (id integer)"}),
            depth: 1,
        };
        let json = serde_json::to_string(&call).unwrap();
        let parsed: ServiceCall = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, call);
    }

    #[test]
    fn test_service_call_defaults() {
        let call: ServiceCall =
            serde_json::from_str(r#"{"service":"database","method":"Exec"}"#).unwrap();
        assert!(call.caller.is_none());
        assert_eq!(call.depth, 0);
        assert!(call.args.is_null());
    }

    #[test]
    fn test_reserved_prefix_matches_builtins() {
        assert!(services::REGISTRY.starts_with(RESERVED_SERVICE_PREFIX));
        assert!(services::LOG.starts_with(RESERVED_SERVICE_PREFIX));
    }
}
