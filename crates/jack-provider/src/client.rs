//! Daemon callback client.

use std::sync::Arc;

use serde_json::Value;

use jack_core::wire::{ServiceCall, methods, services};
use jack_rpc::RpcSession;

use crate::error::{ProviderError, ProviderResult};

/// Calls services on other plugins (and the daemon's built-ins) through
/// the daemon.
///
/// Cheap to clone. Each client carries the hop depth of the inbound call
/// it was created for (zero for the plugin's own initiative) and stamps
/// `depth + 1` on every outgoing call; the daemon rejects chains deeper
/// than the configured ceiling rather than letting them loop.
#[derive(Clone)]
pub struct ServiceClient {
    session: Arc<RpcSession>,
    depth: u32,
}

impl ServiceClient {
    pub(crate) fn new(session: Arc<RpcSession>) -> Self {
        Self { session, depth: 0 }
    }

    /// A client bound to an inbound call's hop depth.
    #[must_use]
    pub(crate) fn at_depth(&self, depth: u32) -> Self {
        Self {
            session: Arc::clone(&self.session),
            depth,
        }
    }

    /// The hop depth outgoing calls are stamped from.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Invoke `method` on the named service.
    ///
    /// # Errors
    ///
    /// [`ProviderError::ServiceCall`] with the daemon's reason — unknown
    /// service, target not ready in time, loop detected — or
    /// [`ProviderError::Rpc`] if the daemon session is gone.
    pub async fn call_service(
        &self,
        service: impl Into<String>,
        method: impl Into<String>,
        args: Value,
    ) -> ProviderResult<Value> {
        let call = ServiceCall {
            caller: None,
            service: service.into(),
            method: method.into(),
            args,
            depth: self.depth.saturating_add(1),
        };
        let payload = serde_json::to_value(&call)
            .map_err(|e| ProviderError::ServiceCall(format!("encoding service call: {e}")))?;
        match self
            .session
            .call(methods::CALL_SERVICE, Some(payload))
            .await
        {
            Ok(result) => Ok(result),
            Err(jack_rpc::RpcError::Remote(reason)) => Err(ProviderError::ServiceCall(reason)),
            Err(e) => Err(ProviderError::Rpc(e)),
        }
    }

    /// Declare this plugin's provided services usable.
    ///
    /// Providers that export services call this once their deferred
    /// initialization is done; until then the bus parks callers.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`call_service`](Self::call_service).
    pub async fn mark_service_ready(&self) -> ProviderResult<()> {
        self.call_service(
            services::REGISTRY,
            services::REGISTRY_MARK_SERVICE_READY,
            Value::Null,
        )
        .await
        .map(|_| ())
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}
