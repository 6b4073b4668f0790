//! Plugin registry: the index of everything the daemon is hosting.
//!
//! One reader-writer lock guards the namespace map; writers are rare
//! (discovery, state transitions), readers are frequent (every service
//! call and CLI request). The lock is never held across an RPC — callers
//! clone the `Arc<PluginRecord>` out and drop the guard first.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use jack_core::wire::RESERVED_SERVICE_PREFIX;
use jack_core::{PluginId, PluginMetadata};

use crate::error::{DaemonError, DaemonResult};
use crate::handle::ProviderHandle;

/// The lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    /// Record created during discovery; handshake not yet verified.
    Discovered,
    /// Handshake verified and metadata probed.
    HandshakeComplete,
    /// First `ApplyConfig` succeeded.
    Configured,
    /// The plugin declared its provided services usable.
    Ready,
    /// A fatal error; the record stays for diagnosis, no restart in v1.
    Failed,
    /// Flushed during shutdown (or by request).
    Stopped,
}

impl PluginState {
    /// Whether the FSM permits moving from `self` to `next`. Same-state
    /// transitions are no-ops and always allowed.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use PluginState::{Configured, Discovered, Failed, HandshakeComplete, Ready, Stopped};
        if self == next {
            return true;
        }
        match self {
            Discovered => matches!(next, HandshakeComplete | Failed | Stopped),
            HandshakeComplete => matches!(next, Configured | Failed | Stopped),
            Configured => matches!(next, Ready | Failed | Stopped),
            Ready => matches!(next, Configured | Failed | Stopped),
            // A live plugin that failed one apply may recover on the next;
            // a flushed plugin may be reconfigured without a restart.
            Failed => matches!(next, Configured | Stopped),
            Stopped => matches!(next, Configured),
        }
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Discovered => "discovered",
            Self::HandshakeComplete => "handshake-complete",
            Self::Configured => "configured",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: PluginState,
    last_error: Option<String>,
}

/// One registered plugin.
pub struct PluginRecord {
    metadata: PluginMetadata,
    handle: Arc<ProviderHandle>,
    lifecycle: RwLock<Lifecycle>,
    ready_tx: watch::Sender<bool>,
    apply_lock: tokio::sync::Mutex<()>,
}

impl PluginRecord {
    fn new(metadata: PluginMetadata, handle: Arc<ProviderHandle>) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            metadata,
            handle,
            lifecycle: RwLock::new(Lifecycle {
                state: PluginState::Discovered,
                last_error: None,
            }),
            ready_tx,
            apply_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The plugin's namespace.
    #[must_use]
    pub fn id(&self) -> &PluginId {
        &self.metadata.namespace
    }

    /// The metadata captured at registration.
    #[must_use]
    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    /// The provider handle owning the subprocess and its session.
    #[must_use]
    pub fn handle(&self) -> &Arc<ProviderHandle> {
        &self.handle
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PluginState {
        self.read_lifecycle().state
    }

    /// The most recent fatal error, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.read_lifecycle().last_error.clone()
    }

    /// Whether this plugin's provided services are usable.
    #[must_use]
    pub fn is_service_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// The per-plugin apply mutex; held across apply/validate/flush, never
    /// across service routing.
    pub(crate) fn apply_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.apply_lock
    }

    fn read_lifecycle(&self) -> std::sync::RwLockReadGuard<'_, Lifecycle> {
        self.lifecycle
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRecord")
            .field("id", self.id())
            .field("state", &self.state())
            .field("service_ready", &self.is_service_ready())
            .finish_non_exhaustive()
    }
}

/// Process-wide plugin index. A single instance is shared by reference so
/// tests can run parallel cores.
#[derive(Default)]
pub struct Registry {
    plugins: RwLock<HashMap<PluginId, Arc<PluginRecord>>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin.
    ///
    /// # Errors
    ///
    /// - [`DaemonError::DuplicateNamespace`] if the namespace is taken.
    /// - [`DaemonError::ReservedService`] if the metadata claims a
    ///   `jack.`-prefixed service.
    /// - [`DaemonError::DependencyCycle`] if this registration closes a
    ///   dependency loop; the cycle members are named.
    pub fn register(
        &self,
        metadata: PluginMetadata,
        handle: Arc<ProviderHandle>,
    ) -> DaemonResult<Arc<PluginRecord>> {
        let id = metadata.namespace.clone();
        if let Some(reserved) = metadata
            .provided_services
            .iter()
            .find(|s| s.name.starts_with(RESERVED_SERVICE_PREFIX))
        {
            return Err(DaemonError::ReservedService {
                plugin: id,
                service: reserved.name.clone(),
            });
        }

        let mut plugins = self.write_map();
        if plugins.contains_key(&id) {
            return Err(DaemonError::DuplicateNamespace(id));
        }
        let record = Arc::new(PluginRecord::new(metadata, handle));
        plugins.insert(id.clone(), Arc::clone(&record));

        if let Some(cycle) = find_cycle(&plugins, &id) {
            plugins.remove(&id);
            return Err(DaemonError::DependencyCycle(cycle));
        }
        drop(plugins);

        info!(plugin = %id, "registered plugin");
        Ok(record)
    }

    /// Look up a plugin by namespace.
    ///
    /// # Errors
    ///
    /// [`DaemonError::NotFound`] for an unknown namespace.
    pub fn get(&self, id: &PluginId) -> DaemonResult<Arc<PluginRecord>> {
        self.read_map()
            .get(id)
            .cloned()
            .ok_or_else(|| DaemonError::NotFound(id.clone()))
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    /// All records in dependency order: a dependency always precedes its
    /// dependents, ties broken alphabetically. Deterministic.
    ///
    /// # Errors
    ///
    /// [`DaemonError::DependencyCycle`] — cannot happen after registration
    /// succeeded, but the ordering is recomputed defensively.
    pub fn ordered(&self) -> DaemonResult<Vec<Arc<PluginRecord>>> {
        let plugins = self.read_map();
        let order = topological_order(&plugins)?;
        Ok(order
            .iter()
            .filter_map(|id| plugins.get(id).cloned())
            .collect())
    }

    /// Move a plugin to `next`, recording `error` when given. Disallowed
    /// transitions are logged and ignored, per the lifecycle contract.
    pub fn mark_state(&self, id: &PluginId, next: PluginState, error: Option<String>) {
        let Ok(record) = self.get(id) else {
            warn!(plugin = %id, state = %next, "state transition for unknown plugin");
            return;
        };
        let mut lifecycle = record
            .lifecycle
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let current = lifecycle.state;
        if !current.can_transition_to(next) {
            warn!(plugin = %id, from = %current, to = %next, "disallowed state transition ignored");
            return;
        }
        if current != next {
            debug!(plugin = %id, from = %current, to = %next, "state transition");
        }
        lifecycle.state = next;
        match (next, error) {
            (_, Some(e)) => lifecycle.last_error = Some(e),
            // A successful configure clears stale failure context.
            (PluginState::Configured, None) => lifecycle.last_error = None,
            _ => {}
        }
    }

    /// Mark a plugin's provided services usable and move it to `Ready`.
    /// Idempotent; wakes any waiter in
    /// [`wait_for_service`](Self::wait_for_service).
    ///
    /// # Errors
    ///
    /// [`DaemonError::NotFound`] for an unknown namespace.
    pub fn mark_service_ready(&self, id: &PluginId) -> DaemonResult<()> {
        let record = self.get(id)?;
        let was_ready = record.ready_tx.send_replace(true);
        if !was_ready {
            debug!(plugin = %id, "service ready");
        }
        self.mark_state(id, PluginState::Ready, None);
        Ok(())
    }

    /// Non-blocking readiness test.
    #[must_use]
    pub fn is_service_ready(&self, id: &PluginId) -> bool {
        self.read_map()
            .get(id)
            .is_some_and(|r| r.is_service_ready())
    }

    /// Wait until a plugin's services are ready. Callers bound this with
    /// their own deadline.
    ///
    /// # Errors
    ///
    /// [`DaemonError::NotFound`] for an unknown namespace.
    pub async fn wait_for_service(&self, id: &PluginId) -> DaemonResult<()> {
        let mut rx = {
            let record = self.get(id)?;
            record.ready_tx.subscribe()
        };
        // The sender lives in the record; it cannot drop while the record
        // exists, and records are never destroyed before daemon exit.
        let _ = rx.wait_for(|ready| *ready).await;
        Ok(())
    }

    /// The plugin providing the named service, if any.
    #[must_use]
    pub fn find_provider_of_service(&self, service: &str) -> Option<Arc<PluginRecord>> {
        self.read_map()
            .values()
            .find(|r| r.metadata().provides_service(service))
            .cloned()
    }

    /// Whether any registered plugin provides the named service.
    #[must_use]
    pub fn has_provider_for(&self, service: &str) -> bool {
        self.find_provider_of_service(service).is_some()
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PluginId, Arc<PluginRecord>>> {
        self.plugins
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PluginId, Arc<PluginRecord>>> {
        self.plugins
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plugins = self.read_map();
        let mut ids: Vec<&str> = plugins.keys().map(PluginId::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("Registry").field("plugins", &ids).finish()
    }
}

/// Kahn's algorithm over the dependency graph. Dependencies on unknown
/// namespaces are ignored — a missing dependency degrades at apply time,
/// it does not wedge the ordering.
fn topological_order(
    plugins: &HashMap<PluginId, Arc<PluginRecord>>,
) -> DaemonResult<Vec<PluginId>> {
    let mut indegree: BTreeMap<&PluginId, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&PluginId, Vec<&PluginId>> = BTreeMap::new();
    for (id, record) in plugins {
        indegree.entry(id).or_insert(0);
        for dep in &record.metadata().dependencies {
            if !plugins.contains_key(dep) {
                continue;
            }
            let deg = indegree.entry(id).or_insert(0);
            *deg = deg.saturating_add(1);
            dependents.entry(dep).or_default().push(id);
        }
    }

    // BTreeSet keeps the zero-indegree frontier alphabetical.
    let mut frontier: BTreeSet<&PluginId> = indegree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(plugins.len());
    while let Some(id) = frontier.pop_first() {
        order.push(id.clone());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(deg) = indegree.get_mut(dependent) {
                *deg = deg.saturating_sub(1);
                if *deg == 0 {
                    frontier.insert(dependent);
                }
            }
        }
    }

    if order.len() < plugins.len() {
        let stuck: Vec<PluginId> = indegree
            .keys()
            .map(|id| (*id).clone())
            .filter(|id| !order.contains(id))
            .collect();
        return Err(DaemonError::DependencyCycle(stuck));
    }
    Ok(order)
}

/// DFS from `start` looking for a path back to `start`; returns the cycle
/// (start ... start) if one exists.
fn find_cycle(
    plugins: &HashMap<PluginId, Arc<PluginRecord>>,
    start: &PluginId,
) -> Option<Vec<PluginId>> {
    fn visit(
        plugins: &HashMap<PluginId, Arc<PluginRecord>>,
        start: &PluginId,
        at: &PluginId,
        path: &mut Vec<PluginId>,
        seen: &mut BTreeSet<PluginId>,
    ) -> bool {
        let Some(record) = plugins.get(at) else {
            return false;
        };
        for dep in &record.metadata().dependencies {
            if dep == start {
                path.push(dep.clone());
                return true;
            }
            if seen.insert(dep.clone()) {
                path.push(dep.clone());
                if visit(plugins, start, dep, path, seen) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    let mut path = vec![start.clone()];
    let mut seen = BTreeSet::new();
    visit(plugins, start, start, &mut path, &mut seen).then_some(path)
}
