//! Command-channel contract.
//!
//! The CLI talks to the daemon over a unix socket: one newline-terminated
//! JSON [`CommandRequest`] per connection, answered by one newline-terminated
//! JSON [`CommandResponse`], then the connection closes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PluginId;

/// The verbs the daemon accepts on the command socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandVerb {
    /// Apply configuration to one namespace, or to all in dependency order.
    Apply,
    /// Side-effect-free configuration check for one namespace.
    Validate,
    /// Registry snapshot plus each live plugin's status document.
    Status,
    /// List registered plugins.
    PluginList,
    /// Metadata and state for one namespace.
    PluginInfo,
    /// Route a CLI command to the named plugin.
    PluginCli,
    /// Remove plugin-managed system state for one namespace, or all.
    Flush,
}

impl CommandVerb {
    /// The verb as it appears on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Validate => "validate",
            Self::Status => "status",
            Self::PluginList => "plugin-list",
            Self::PluginInfo => "plugin-info",
            Self::PluginCli => "plugin-cli",
            Self::Flush => "flush",
        }
    }
}

/// A request from the CLI to the daemon.
///
/// For `plugin-cli`, `args[0]` is the plugin command name and the remainder
/// are its arguments. For a targeted `apply`/`validate`, `value` may carry
/// explicit configuration, overriding the plugin's `config_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// What to do.
    pub command: CommandVerb,
    /// Target namespace; absent means "all" for verbs that allow it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<PluginId>,
    /// Optional JSON payload (explicit config for apply/validate).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Positional arguments (plugin-cli).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl CommandRequest {
    /// A request with only a verb set.
    #[must_use]
    pub fn new(command: CommandVerb) -> Self {
        Self {
            command,
            namespace: None,
            value: None,
            args: Vec::new(),
        }
    }
}

/// The daemon's answer to a [`CommandRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Whether the request succeeded.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Verb-specific payload (status documents, plugin lists, CLI output).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResponse {
    /// A successful response.
    #[must_use]
    pub fn ok(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    /// A failed response. The daemon never crashes for a plugin-level
    /// failure; it reports it here.
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_wire_names() {
        assert_eq!(
            serde_json::to_string(&CommandVerb::PluginList).unwrap(),
            "\"plugin-list\""
        );
        assert_eq!(
            serde_json::from_str::<CommandVerb>("\"plugin-cli\"").unwrap(),
            CommandVerb::PluginCli
        );
        for verb in [
            CommandVerb::Apply,
            CommandVerb::Validate,
            CommandVerb::Status,
            CommandVerb::PluginList,
            CommandVerb::PluginInfo,
            CommandVerb::PluginCli,
            CommandVerb::Flush,
        ] {
            let json = serde_json::to_string(&verb).unwrap();
            assert_eq!(json, format!("\"{}\"", verb.as_str()));
        }
    }

    #[test]
    fn test_request_round_trip() {
        let req = CommandRequest {
            command: CommandVerb::PluginCli,
            namespace: Some(PluginId::from_static("wireguard")),
            value: None,
            args: vec!["peers".into(), "--verbose".into()],
        };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: CommandRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_bare_request_parses() {
        let req: CommandRequest = serde_json::from_str(r#"{"command":"status"}"#).unwrap();
        assert_eq!(req.command, CommandVerb::Status);
        assert!(req.namespace.is_none());
        assert!(req.args.is_empty());
    }

    #[test]
    fn test_response_constructors() {
        let ok = CommandResponse::ok("applied", Some(serde_json::json!({"count": 3})));
        assert!(ok.success);
        let fail = CommandResponse::fail("no such namespace");
        assert!(!fail.success);
        assert!(fail.data.is_none());
    }
}
