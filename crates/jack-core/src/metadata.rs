//! Plugin metadata.
//!
//! Every provider answers the `Metadata` RPC with a [`PluginMetadata`]
//! document describing its namespace, configuration source, dependencies,
//! and the services and CLI commands it offers. The daemon probes it once
//! at startup, right after the handshake; it must be deterministic and
//! side-effect-free.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PluginId;

/// What a plugin declares about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// The plugin's namespace; unique across the registry.
    pub namespace: PluginId,
    /// Semantic version string.
    pub version: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Optional grouping used by the CLI (e.g. `"network"`, `"system"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Absolute path where the plugin's config JSON is expected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    /// Configuration applied when `config_path` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_config: Option<Value>,
    /// Namespaces this plugin logically requires; applied before it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<PluginId>,
    /// Names of services this plugin may call through the daemon.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_services: Vec<String>,
    /// Services this plugin answers for other plugins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provided_services: Vec<ServiceDescriptor>,
    /// CLI commands this plugin handles via `ExecuteCLICommand`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cli_commands: Vec<CliCommandSpec>,
}

/// A named, method-bearing capability a plugin exports for others to call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Service name, e.g. `"database"`. Names under `jack.` are reserved
    /// for the daemon's built-in services.
    pub name: String,
    /// The methods the service answers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<ServiceMethodSpec>,
}

/// One method of a provided service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMethodSpec {
    /// Method name, e.g. `"Exec"`.
    pub name: String,
    /// Optional one-line description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A CLI command a plugin contributes to the `jack` binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliCommandSpec {
    /// Command name as typed by the user.
    pub name: String,
    /// Short help line.
    pub help: String,
    /// Longer help text, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_help: Option<String>,
    /// Subcommand names, if the command has any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subcommands: Vec<String>,
    /// Whether the CLI should re-run the command on an interval.
    #[serde(default)]
    pub continuous: bool,
    /// Poll interval in seconds for continuous commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
}

impl PluginMetadata {
    /// Minimal metadata for a namespace, with everything else defaulted.
    #[must_use]
    pub fn new(namespace: PluginId, version: impl Into<String>) -> Self {
        Self {
            namespace,
            version: version.into(),
            description: String::new(),
            category: None,
            config_path: None,
            default_config: None,
            dependencies: Vec::new(),
            required_services: Vec::new(),
            provided_services: Vec::new(),
            cli_commands: Vec::new(),
        }
    }

    /// Whether this plugin exports any services to other plugins.
    #[must_use]
    pub fn provides_services(&self) -> bool {
        !self.provided_services.is_empty()
    }

    /// Whether this plugin provides a service with the given name.
    #[must_use]
    pub fn provides_service(&self, name: &str) -> bool {
        self.provided_services.iter().any(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PluginMetadata {
        PluginMetadata {
            namespace: PluginId::from_static("firewall-log"),
            version: "0.3.1".into(),
            description: "NFLOG capture into the database".into(),
            category: Some("network".into()),
            config_path: Some(PathBuf::from("/etc/jack/firewall-log.json")),
            default_config: None,
            dependencies: vec![PluginId::from_static("database")],
            required_services: vec!["database".into()],
            provided_services: vec![],
            cli_commands: vec![CliCommandSpec {
                name: "log".into(),
                help: "Show recent firewall log entries".into(),
                long_help: None,
                subcommands: vec!["tail".into()],
                continuous: true,
                poll_interval_secs: Some(2),
            }],
        }
    }

    #[test]
    fn test_metadata_json_round_trip() {
        let meta = sample();
        let json = serde_json::to_string(&meta).unwrap();
        let parsed: PluginMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_minimal_metadata_parses() {
        let json = r#"{"namespace": "leds", "version": "0.1.0"}"#;
        let meta: PluginMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.namespace.as_str(), "leds");
        assert!(meta.dependencies.is_empty());
        assert!(meta.config_path.is_none());
        assert!(meta.default_config.is_none());
        assert!(!meta.provides_services());
    }

    #[test]
    fn test_metadata_rejects_empty_namespace() {
        let json = r#"{"namespace": "", "version": "0.1.0"}"#;
        assert!(serde_json::from_str::<PluginMetadata>(json).is_err());
    }

    #[test]
    fn test_provides_service_lookup() {
        let mut meta = PluginMetadata::new(PluginId::from_static("database"), "1.0.0");
        meta.provided_services = vec![ServiceDescriptor {
            name: "database".into(),
            methods: vec![ServiceMethodSpec {
                name: "Exec".into(),
                description: Some("Run a statement".into()),
            }],
        }];
        assert!(meta.provides_services());
        assert!(meta.provides_service("database"));
        assert!(!meta.provides_service("dns"));
    }
}
