//! The provider contract.

use async_trait::async_trait;
use serde_json::Value;

use jack_core::wire::ServiceCall;
use jack_core::{PluginMetadata, ServiceDescriptor};

use crate::client::ServiceClient;
use crate::error::{ProviderError, ProviderResult};

/// Execution context handed to a provider.
///
/// Carries the [`ServiceClient`] for calling other plugins' services
/// through the daemon. For an inbound service call the client is bound to
/// that call's hop depth, so loops through the bus stay detectable.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    client: ServiceClient,
}

impl ProviderContext {
    pub(crate) fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    /// The daemon callback client.
    #[must_use]
    pub fn client(&self) -> &ServiceClient {
        &self.client
    }
}

/// What a plugin implements.
///
/// The first five methods are mandatory; the rest have sentinel or derived
/// defaults. All of them run concurrently with each other — the stub does
/// not serialize inbound requests, so a provider guards its own state.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// The plugin's self-description. Must be deterministic and
    /// side-effect-free; the daemon probes it once right after the
    /// handshake.
    fn metadata(&self) -> PluginMetadata;

    /// Called once before the stub starts serving, with the daemon client.
    ///
    /// Providers that need services at startup stash the context here and
    /// do the calls from a deferred task — never from `apply_config`.
    ///
    /// # Errors
    ///
    /// An error aborts the plugin before it answers any RPC.
    async fn init(&self, ctx: ProviderContext) -> ProviderResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// Apply a configuration document to the system.
    ///
    /// MUST return before any service call is made on the plugin's behalf;
    /// cross-plugin work belongs in a task spawned from here that runs
    /// after the return.
    async fn apply_config(&self, config: Value) -> ProviderResult<()>;

    /// Side-effect-free configuration check.
    async fn validate_config(&self, config: Value) -> ProviderResult<()>;

    /// Remove all plugin-managed system state. Idempotent.
    async fn flush(&self) -> ProviderResult<()>;

    /// Current live state, as a JSON document.
    async fn status(&self) -> ProviderResult<Value>;

    /// Run one of the plugin's CLI commands, returning human-readable
    /// output.
    async fn execute_cli_command(&self, command: &str, args: &[String]) -> ProviderResult<Value> {
        let _ = (command, args);
        Err(ProviderError::NotImplemented)
    }

    /// Receive a log event broadcast. Optional.
    async fn on_log_event(&self, event: Value) -> ProviderResult<()> {
        let _ = event;
        Err(ProviderError::NotImplemented)
    }

    /// The services this plugin exports. Defaults to what the metadata
    /// declares.
    fn provided_services(&self) -> Vec<ServiceDescriptor> {
        self.metadata().provided_services
    }

    /// Answer a service call from another plugin. Only invoked on plugins
    /// that declare provided services.
    ///
    /// `ctx` is bound to the inbound call's depth; use it (not a stored
    /// context) for any nested service calls.
    async fn call_service(&self, call: ServiceCall, ctx: ProviderContext) -> ProviderResult<Value> {
        let _ = (call, ctx);
        Err(ProviderError::NotImplemented)
    }
}
