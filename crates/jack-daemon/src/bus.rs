//! Service bus: routes plugin-to-plugin calls through the daemon.
//!
//! Stateless coordinator over the registry. Many calls may be in flight at
//! once; the bus never serializes per target — if a provider needs its
//! service calls serialized, that is the provider's business.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, warn};

use jack_core::PluginId;
use jack_core::wire::{MAX_SERVICE_DEPTH, RESERVED_SERVICE_PREFIX, ServiceCall, services};

use crate::config::Timeouts;
use crate::error::{DaemonError, DaemonResult};
use crate::registry::{PluginState, Registry};

/// Routes [`ServiceCall`]s: daemon built-ins first, then plugin providers,
/// with loop and readiness guards.
pub struct ServiceBus {
    registry: Arc<Registry>,
    timeouts: Timeouts,
}

impl ServiceBus {
    /// Create a bus over the given registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>, timeouts: Timeouts) -> Self {
        Self { registry, timeouts }
    }

    /// Route one call and return the target's reply verbatim.
    ///
    /// # Errors
    ///
    /// - [`DaemonError::LoopDetected`] if the hop count exceeds
    ///   [`MAX_SERVICE_DEPTH`] or the caller owns the target service.
    /// - [`DaemonError::ServiceUnavailable`] if nothing provides it.
    /// - [`DaemonError::ServiceNotReady`] if the provider does not declare
    ///   readiness within the bounded wait.
    /// - The target's own error, verbatim, otherwise.
    pub async fn dispatch(&self, call: ServiceCall) -> DaemonResult<Value> {
        if call.depth > MAX_SERVICE_DEPTH {
            return Err(DaemonError::LoopDetected {
                service: call.service,
                reason: format!("depth {} exceeds ceiling {MAX_SERVICE_DEPTH}", call.depth),
            });
        }

        if call.service.starts_with(RESERVED_SERVICE_PREFIX) {
            return self.dispatch_builtin(call).await;
        }

        let Some(record) = self.registry.find_provider_of_service(&call.service) else {
            debug!(service = %call.service, "no provider for service");
            return Err(DaemonError::ServiceUnavailable(call.service));
        };
        if call.caller.as_ref() == Some(record.id()) {
            return Err(DaemonError::LoopDetected {
                service: call.service,
                reason: "provider routed a call to itself".into(),
            });
        }

        if !record.is_service_ready() {
            let target = record.id().clone();
            let wait = self.registry.wait_for_service(&target);
            if tokio::time::timeout(self.timeouts.service_ready, wait)
                .await
                .is_err()
            {
                warn!(service = %call.service, plugin = %target, "service readiness wait expired");
                return Err(DaemonError::ServiceNotReady(call.service));
            }
        }

        let handle = Arc::clone(record.handle());
        drop(record);
        handle.call_service(&call).await
    }

    async fn dispatch_builtin(&self, call: ServiceCall) -> DaemonResult<Value> {
        match (call.service.as_str(), call.method.as_str()) {
            (services::REGISTRY, services::REGISTRY_LIST) => self.registry_list(),
            (services::REGISTRY, services::REGISTRY_INFO) => self.registry_info(&call.args),
            (services::REGISTRY, services::REGISTRY_MARK_SERVICE_READY) => {
                let caller = call.caller.ok_or_else(|| {
                    DaemonError::ServiceUnavailable("anonymous readiness signal".into())
                })?;
                self.registry.mark_service_ready(&caller)?;
                Ok(Value::Null)
            }
            (services::LOG, services::LOG_BROADCAST) => {
                let delivered = self.broadcast_log(call.caller.as_ref(), call.args).await;
                Ok(json!({ "delivered": delivered }))
            }
            _ => Err(DaemonError::ServiceUnavailable(format!(
                "{}.{}",
                call.service, call.method
            ))),
        }
    }

    fn registry_list(&self) -> DaemonResult<Value> {
        let entries: Vec<Value> = self
            .registry
            .ordered()?
            .iter()
            .map(|record| {
                json!({
                    "namespace": record.id(),
                    "version": record.metadata().version,
                    "state": record.state().to_string(),
                    "description": record.metadata().description,
                })
            })
            .collect();
        Ok(Value::Array(entries))
    }

    fn registry_info(&self, args: &Value) -> DaemonResult<Value> {
        let namespace: PluginId = serde_json::from_value(
            args.get("namespace").cloned().unwrap_or(Value::Null),
        )
        .map_err(|e| DaemonError::ServiceUnavailable(format!("bad Info arguments: {e}")))?;
        let record = self.registry.get(&namespace)?;
        Ok(json!({
            "metadata": record.metadata(),
            "state": record.state().to_string(),
            "last_error": record.last_error(),
        }))
    }

    /// Fan a log event out to every live plugin except the sender. Plugins
    /// that return the not-implemented sentinel are skipped silently.
    async fn broadcast_log(&self, sender: Option<&PluginId>, event: Value) -> usize {
        let targets: Vec<_> = match self.registry.ordered() {
            Ok(records) => records
                .into_iter()
                .filter(|r| {
                    matches!(r.state(), PluginState::Configured | PluginState::Ready)
                        && r.handle().is_open()
                        && Some(r.id()) != sender
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "log broadcast skipped");
                return 0;
            }
        };

        let deliveries = targets.iter().map(|record| {
            let event = event.clone();
            async move {
                match record.handle().on_log_event(event).await {
                    Ok(()) => true,
                    Err(e) if e.is_not_implemented() => false,
                    Err(e) => {
                        debug!(plugin = %record.id(), error = %e, "log event delivery failed");
                        false
                    }
                }
            }
        });
        futures::future::join_all(deliveries)
            .await
            .into_iter()
            .filter(|delivered| *delivered)
            .count()
    }
}

impl std::fmt::Debug for ServiceBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBus").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus_with_empty_registry() -> ServiceBus {
        ServiceBus::new(Arc::new(Registry::new()), Timeouts::default())
    }

    fn call(service: &str, method: &str, depth: u32) -> ServiceCall {
        ServiceCall {
            caller: Some(PluginId::from_static("caller")),
            service: service.into(),
            method: method.into(),
            args: Value::Null,
            depth,
        }
    }

    #[tokio::test]
    async fn test_unknown_service_unavailable() {
        let bus = bus_with_empty_registry();
        let err = bus.dispatch(call("dns", "Lookup", 1)).await.unwrap_err();
        assert!(matches!(err, DaemonError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_depth_ceiling_cuts_loops() {
        let bus = bus_with_empty_registry();
        let err = bus
            .dispatch(call("dns", "Lookup", MAX_SERVICE_DEPTH.saturating_add(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::LoopDetected { .. }));
        // At the ceiling exactly, the call is still routed (and here fails
        // only because nothing provides the service).
        let err = bus
            .dispatch(call("dns", "Lookup", MAX_SERVICE_DEPTH))
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_builtin_registry_list_empty() {
        let bus = bus_with_empty_registry();
        let value = bus
            .dispatch(call(services::REGISTRY, services::REGISTRY_LIST, 1))
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_builtin_unknown_method_unavailable() {
        let bus = bus_with_empty_registry();
        let err = bus
            .dispatch(call(services::REGISTRY, "Nonsense", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_mark_service_ready_requires_known_caller() {
        let bus = bus_with_empty_registry();
        // Caller "caller" is not registered.
        let err = bus
            .dispatch(call(
                services::REGISTRY,
                services::REGISTRY_MARK_SERVICE_READY,
                1,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_log_broadcast_on_empty_registry() {
        let bus = bus_with_empty_registry();
        let value = bus
            .dispatch(call(services::LOG, services::LOG_BROADCAST, 1))
            .await
            .unwrap();
        assert_eq!(value["delivered"], 0);
    }
}
