//! Plugin identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error returned when a plugin ID string is malformed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid plugin id: {0}")]
pub struct InvalidPluginId(pub String);

/// Unique, stable, human-readable plugin identifier ("namespace").
///
/// A plugin assigns its own namespace in its metadata; the registry enforces
/// uniqueness. IDs are strings like `"firewall"` or `"wireguard"`: non-empty,
/// lowercase alphanumeric plus hyphens, no leading or trailing hyphen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PluginId(String);

/// Deserialize with validation — rejects malformed namespaces coming off the
/// wire (plugin metadata, CLI requests) before they reach the registry.
impl<'de> Deserialize<'de> for PluginId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl PluginId {
    /// Create a new `PluginId`, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is empty or contains invalid characters.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidPluginId> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create a `PluginId` without validation (for tests and internal use).
    #[must_use]
    pub fn from_static(id: &str) -> Self {
        Self(id.to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a string is a valid plugin ID without constructing one.
    #[must_use]
    pub fn is_valid_id(id: &str) -> bool {
        Self::validate(id).is_ok()
    }

    fn validate(id: &str) -> Result<(), InvalidPluginId> {
        if id.is_empty() {
            return Err(InvalidPluginId("namespace must not be empty".into()));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(InvalidPluginId(format!(
                "namespace must contain only lowercase alphanumeric characters and hyphens, got: {id}"
            )));
        }
        if id.starts_with('-') || id.ends_with('-') {
            return Err(InvalidPluginId(format!(
                "namespace must not start or end with a hyphen, got: {id}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PluginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_plugin_ids() {
        assert!(PluginId::new("firewall").is_ok());
        assert!(PluginId::new("firewall-log").is_ok());
        assert!(PluginId::new("dnsmasq2").is_ok());
        assert!(PluginId::new("a").is_ok());
    }

    #[test]
    fn test_invalid_plugin_ids() {
        // Empty
        assert!(PluginId::new("").is_err());
        // Uppercase
        assert!(PluginId::new("Firewall").is_err());
        // Spaces
        assert!(PluginId::new("my plugin").is_err());
        // Underscores
        assert!(PluginId::new("my_plugin").is_err());
        // Leading hyphen
        assert!(PluginId::new("-plugin").is_err());
        // Trailing hyphen
        assert!(PluginId::new("plugin-").is_err());
        // Dots
        assert!(PluginId::new("jack.registry").is_err());
    }

    #[test]
    fn test_plugin_id_display() {
        let id = PluginId::new("wireguard").unwrap();
        assert_eq!(id.to_string(), "wireguard");
        assert_eq!(id.as_str(), "wireguard");
    }

    #[test]
    fn test_plugin_id_serde_round_trip() {
        let id = PluginId::new("wireguard").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"wireguard\"");
        let deserialized: PluginId = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, id);
    }

    #[test]
    fn test_plugin_id_deserialize_rejects_malformed() {
        assert!(serde_json::from_str::<PluginId>("\"\"").is_err());
        assert!(serde_json::from_str::<PluginId>("\"Not Valid\"").is_err());
    }

    #[test]
    fn test_plugin_id_ordering_is_alphabetical() {
        let mut ids = vec![
            PluginId::from_static("wireguard"),
            PluginId::from_static("database"),
            PluginId::from_static("firewall"),
        ];
        ids.sort();
        let names: Vec<&str> = ids.iter().map(PluginId::as_str).collect();
        assert_eq!(names, vec!["database", "firewall", "wireguard"]);
    }
}
