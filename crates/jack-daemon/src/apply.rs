//! Apply orchestrator: per-plugin configuration state machine.
//!
//! The subtle part is reentrancy. A plugin's `ApplyConfig` must not call
//! other plugins' services — the daemon would be blocked inside its own
//! outgoing RPC and unable to route the inbound call. The contract instead
//! is: apply returns first, deferred initialization runs afterwards inside
//! the plugin process, and *that* is free to call services. The
//! orchestrator therefore never waits on a service call while holding a
//! per-plugin apply mutex, and inbound calls are served on each session's
//! reader side regardless of what the orchestrator is doing.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use jack_core::{PluginId, PluginMetadata};

use crate::config::Timeouts;
use crate::error::{DaemonError, DaemonResult};
use crate::registry::{PluginRecord, PluginState, Registry};

/// How one plugin fared in an apply/flush pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// The operation succeeded.
    Applied,
    /// Nothing to do (no configuration anywhere).
    Skipped,
    /// The operation failed; `detail` carries the reason.
    Failed,
}

/// Per-plugin outcome of an apply, validate, or flush pass.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    /// The plugin this outcome belongs to.
    pub namespace: PluginId,
    /// What happened.
    pub result: OutcomeKind,
    /// Reason for a skip or failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ApplyOutcome {
    fn applied(namespace: PluginId) -> Self {
        Self {
            namespace,
            result: OutcomeKind::Applied,
            detail: None,
        }
    }

    fn skipped(namespace: PluginId, reason: impl Into<String>) -> Self {
        Self {
            namespace,
            result: OutcomeKind::Skipped,
            detail: Some(reason.into()),
        }
    }

    fn failed(namespace: PluginId, reason: impl Into<String>) -> Self {
        Self {
            namespace,
            result: OutcomeKind::Failed,
            detail: Some(reason.into()),
        }
    }

    /// Whether this outcome is a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.result == OutcomeKind::Failed
    }
}

/// Drives apply/validate/flush against registered plugins.
pub struct Orchestrator {
    registry: Arc<Registry>,
    timeouts: Timeouts,
}

impl Orchestrator {
    /// Create an orchestrator over the given registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>, timeouts: Timeouts) -> Self {
        Self { registry, timeouts }
    }

    /// Apply configuration to every plugin in dependency order. A failure
    /// is recorded in that plugin's outcome and the pass continues —
    /// dependents may still degrade gracefully.
    ///
    /// # Errors
    ///
    /// Only for a broken dependency graph; per-plugin failures live in the
    /// returned outcomes.
    pub async fn apply_all(&self) -> DaemonResult<Vec<ApplyOutcome>> {
        let records = self.registry.ordered()?;
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            let outcome = self.apply_record(&record, None).await;
            if let Some(detail) = &outcome.detail {
                info!(plugin = %outcome.namespace, result = ?outcome.result, detail = %detail, "apply");
            } else {
                info!(plugin = %outcome.namespace, result = ?outcome.result, "apply");
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Apply configuration to one plugin. `explicit` overrides the
    /// plugin's `config_path` / `default_config` resolution.
    ///
    /// # Errors
    ///
    /// [`DaemonError::NotFound`] for an unknown namespace; apply failures
    /// are reported in the outcome.
    pub async fn apply_one(
        &self,
        id: &PluginId,
        explicit: Option<Value>,
    ) -> DaemonResult<ApplyOutcome> {
        let record = self.registry.get(id)?;
        Ok(self.apply_record(&record, explicit).await)
    }

    /// Validate a configuration document against one plugin, without any
    /// state transition.
    ///
    /// # Errors
    ///
    /// [`DaemonError::ValidationFailed`] with the plugin's reason, or
    /// [`DaemonError::NotFound`] for an unknown namespace.
    pub async fn validate(&self, id: &PluginId, explicit: Option<Value>) -> DaemonResult<()> {
        let record = self.registry.get(id)?;
        let _guard = record.apply_lock().lock().await;
        let config = resolve_config(record.metadata(), explicit)
            .await
            .map_err(|reason| DaemonError::ValidationFailed {
                plugin: id.clone(),
                reason,
            })?
            .ok_or_else(|| DaemonError::ValidationFailed {
                plugin: id.clone(),
                reason: "no configuration to validate".into(),
            })?;
        record
            .handle()
            .validate_config(config)
            .await
            .map_err(|e| DaemonError::ValidationFailed {
                plugin: id.clone(),
                reason: e.to_string(),
            })
    }

    /// Flush one plugin: remove its managed system state and mark it
    /// `Stopped`. Idempotent from the caller's perspective.
    ///
    /// # Errors
    ///
    /// [`DaemonError::NotFound`] for an unknown namespace; flush failures
    /// are reported in the outcome.
    pub async fn flush_one(&self, id: &PluginId) -> DaemonResult<ApplyOutcome> {
        let record = self.registry.get(id)?;
        Ok(self.flush_record(&record).await)
    }

    /// Flush every plugin in reverse dependency order (dependents before
    /// their dependencies).
    ///
    /// # Errors
    ///
    /// Only for a broken dependency graph.
    pub async fn flush_all(&self) -> DaemonResult<Vec<ApplyOutcome>> {
        let mut records = self.registry.ordered()?;
        records.reverse();
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(self.flush_record(&record).await);
        }
        Ok(outcomes)
    }

    async fn apply_record(
        &self,
        record: &Arc<PluginRecord>,
        explicit: Option<Value>,
    ) -> ApplyOutcome {
        let id = record.id().clone();
        let _guard = record.apply_lock().lock().await;

        if !record.handle().is_open() {
            let reason = "plugin process is not running";
            self.registry
                .mark_state(&id, PluginState::Failed, Some(reason.into()));
            return ApplyOutcome::failed(id, reason);
        }

        let config = match resolve_config(record.metadata(), explicit).await {
            Ok(Some(config)) => config,
            Ok(None) => return ApplyOutcome::skipped(id, "no configuration"),
            Err(reason) => {
                self.registry
                    .mark_state(&id, PluginState::Failed, Some(reason.clone()));
                return ApplyOutcome::failed(id, reason);
            }
        };

        self.warn_missing_services(record.metadata());

        match record.handle().apply_config(config).await {
            Ok(()) => {
                self.registry.mark_state(&id, PluginState::Configured, None);
                if !record.metadata().provides_services() {
                    // Nothing to wait for; dependents may call immediately.
                    let _ = self.registry.mark_service_ready(&id);
                }
                ApplyOutcome::applied(id)
            }
            Err(e) => {
                let err = DaemonError::ApplyFailed {
                    plugin: id.clone(),
                    reason: e.to_string(),
                };
                self.registry
                    .mark_state(&id, PluginState::Failed, Some(e.to_string()));
                ApplyOutcome::failed(id, err.to_string())
            }
        }
    }

    async fn flush_record(&self, record: &Arc<PluginRecord>) -> ApplyOutcome {
        let id = record.id().clone();
        let _guard = record.apply_lock().lock().await;

        if !record.handle().is_open() {
            // Dead process owns no live session state; treat as flushed.
            self.registry.mark_state(&id, PluginState::Stopped, None);
            return ApplyOutcome::applied(id);
        }

        match record.handle().flush().await {
            Ok(()) => {
                self.registry.mark_state(&id, PluginState::Stopped, None);
                ApplyOutcome::applied(id)
            }
            Err(e) => {
                let reason = DaemonError::ProviderCall {
                    plugin: id.clone(),
                    method: "Flush".into(),
                    reason: e.to_string(),
                }
                .to_string();
                self.registry
                    .mark_state(&id, PluginState::Failed, Some(e.to_string()));
                ApplyOutcome::failed(id, reason)
            }
        }
    }

    /// Best-effort check of `required_services` against the registry;
    /// a miss degrades to `ServiceUnavailable` at call time.
    fn warn_missing_services(&self, metadata: &PluginMetadata) {
        for service in &metadata.required_services {
            if service.starts_with(jack_core::wire::RESERVED_SERVICE_PREFIX) {
                continue;
            }
            if !self.registry.has_provider_for(service) {
                warn!(
                    plugin = %metadata.namespace,
                    service = %service,
                    "required service has no provider"
                );
            }
        }
    }

    /// Timeout table, shared with the command channel for status fetches.
    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

/// Resolve the config document for a plugin: explicit JSON if provided,
/// else the `config_path` file, else `default_config`, else nothing.
///
/// A present-but-empty file is the empty document (`null`); provider
/// policy decides what that means. A file that exists but does not parse
/// is an error naming the path.
async fn resolve_config(
    metadata: &PluginMetadata,
    explicit: Option<Value>,
) -> Result<Option<Value>, String> {
    if let Some(config) = explicit {
        return Ok(Some(config));
    }
    if let Some(path) = &metadata.config_path {
        match tokio::fs::read(path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => {
                return Ok(Some(Value::Null));
            }
            Ok(bytes) => {
                return serde_json::from_slice(&bytes)
                    .map(Some)
                    .map_err(|e| format!("config file {}: {e}", path.display()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(format!("config file {}: {e}", path.display())),
        }
    }
    Ok(metadata.default_config.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn meta(id: &str) -> PluginMetadata {
        PluginMetadata::new(PluginId::from_static(id), "0.1.0")
    }

    #[tokio::test]
    async fn test_resolve_explicit_wins() {
        let mut m = meta("firewall");
        m.default_config = Some(serde_json::json!({"from": "default"}));
        let resolved = resolve_config(&m, Some(serde_json::json!({"from": "explicit"})))
            .await
            .unwrap();
        assert_eq!(resolved, Some(serde_json::json!({"from": "explicit"})));
    }

    #[tokio::test]
    async fn test_resolve_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firewall.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{{\"zones\": [\"wan\", \"lan\"]}}").unwrap();

        let mut m = meta("firewall");
        m.config_path = Some(path);
        let resolved = resolve_config(&m, None).await.unwrap();
        assert_eq!(resolved, Some(serde_json::json!({"zones": ["wan", "lan"]})));
    }

    #[tokio::test]
    async fn test_resolve_empty_file_is_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::File::create(&path).unwrap();

        let mut m = meta("leds");
        m.config_path = Some(path);
        let resolved = resolve_config(&m, None).await.unwrap();
        assert_eq!(resolved, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_resolve_absent_file_falls_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = meta("leds");
        m.config_path = Some(dir.path().join("missing.json"));
        m.default_config = Some(serde_json::json!({"brightness": 50}));
        let resolved = resolve_config(&m, None).await.unwrap();
        assert_eq!(resolved, Some(serde_json::json!({"brightness": 50})));
    }

    #[tokio::test]
    async fn test_resolve_nothing_anywhere_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = meta("leds");
        m.config_path = Some(dir.path().join("missing.json"));
        let resolved = resolve_config(&m, None).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_resolve_unparsable_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{{not json").unwrap();

        let mut m = meta("firewall");
        m.config_path = Some(path.clone());
        let err = resolve_config(&m, None).await.unwrap_err();
        assert!(err.contains("broken.json"), "got {err:?}");
    }
}
