//! Daemon lifecycle: discovery, dependency-ordered startup, and shutdown.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::apply::Orchestrator;
use crate::bus::ServiceBus;
use crate::channel::CommandServer;
use crate::config::DaemonConfig;
use crate::discovery::scan_plugin_dirs;
use crate::error::DaemonResult;
use crate::handle::ProviderHandle;
use crate::registry::{PluginState, Registry};

/// The assembled plugin host.
pub struct Daemon {
    config: DaemonConfig,
    registry: Arc<Registry>,
    bus: Arc<ServiceBus>,
    orchestrator: Arc<Orchestrator>,
}

impl Daemon {
    /// Discover and launch plugins, register them, and verify the
    /// dependency graph. Individual plugin failures (bad handshake,
    /// unusable metadata, duplicate namespace) are logged and skipped;
    /// a dependency cycle is fatal.
    ///
    /// # Errors
    ///
    /// [`DaemonError::DependencyCycle`](crate::DaemonError::DependencyCycle)
    /// if the surviving plugins' dependencies form a loop.
    pub async fn start(config: DaemonConfig) -> DaemonResult<Self> {
        let registry = Arc::new(Registry::new());
        let bus = Arc::new(ServiceBus::new(Arc::clone(&registry), config.timeouts));
        let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&registry), config.timeouts));
        let daemon = Self {
            config,
            registry,
            bus,
            orchestrator,
        };

        let binaries = scan_plugin_dirs(&daemon.config.plugin_dirs);
        info!(count = binaries.len(), "discovered plugin binaries");
        for binary in &binaries {
            if let Err(e) = daemon.launch(binary).await {
                warn!(binary = %binary.display(), error = %e, "plugin failed to start");
            }
        }

        // Fatal: a cyclic graph has no valid apply order.
        daemon.registry.ordered()?;
        Ok(daemon)
    }

    /// Spawn one plugin binary, probe it, and register the record.
    async fn launch(&self, binary: &Path) -> DaemonResult<()> {
        let handle =
            ProviderHandle::spawn(binary, Arc::clone(&self.bus), self.config.timeouts).await?;
        let metadata = match handle.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                handle.shutdown().await;
                return Err(e);
            }
        };
        let id = metadata.namespace.clone();
        handle.bind_namespace(id.clone());

        let record = match self.registry.register(metadata, Arc::clone(&handle)) {
            Ok(record) => record,
            Err(e) => {
                handle.shutdown().await;
                return Err(e);
            }
        };
        self.registry
            .mark_state(&id, PluginState::HandshakeComplete, None);
        info!(plugin = %id, binary = %binary.display(), "plugin online");

        // Supervise: no restart in v1 — on exit the record goes Failed
        // with the cause and stays for diagnosis.
        let registry = Arc::clone(&self.registry);
        let supervised = Arc::clone(&record);
        tokio::spawn(async move {
            let cause = supervised.handle().wait_failure().await;
            if supervised.state() != PluginState::Stopped {
                warn!(plugin = %supervised.id(), cause = %cause, "plugin died");
                registry.mark_state(supervised.id(), PluginState::Failed, Some(cause));
            }
        });
        Ok(())
    }

    /// Initial apply: every plugin, dependency order, failures logged per
    /// plugin and dependents still attempted.
    ///
    /// # Errors
    ///
    /// Only for a broken dependency graph.
    pub async fn apply_initial(&self) -> DaemonResult<()> {
        let outcomes = self.orchestrator.apply_all().await?;
        let failures = outcomes.iter().filter(|o| o.is_failure()).count();
        if failures > 0 {
            warn!(failures, total = outcomes.len(), "initial apply finished with failures");
        } else {
            info!(total = outcomes.len(), "initial apply complete");
        }
        Ok(())
    }

    /// Serve the command socket until SIGINT/SIGTERM, then shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn run(self) -> DaemonResult<()> {
        let listener = CommandServer::bind(&self.config.socket_path)?;
        let server = Arc::new(CommandServer::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.orchestrator),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server_task = tokio::spawn(server.run(listener, shutdown_rx));

        wait_for_signal().await;
        info!("shutting down");
        shutdown_tx.send_replace(true);
        server_task.abort();

        self.shutdown().await;
        if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove socket file");
            }
        }
        Ok(())
    }

    /// Flush and stop every plugin in reverse dependency order.
    pub async fn shutdown(&self) {
        let records = match self.registry.ordered() {
            Ok(mut records) => {
                records.reverse();
                records
            }
            Err(e) => {
                error!(error = %e, "cannot order plugins for shutdown");
                return;
            }
        };
        for record in records {
            let id = record.id().clone();
            if let Ok(outcome) = self.orchestrator.flush_one(&id).await {
                if outcome.is_failure() {
                    warn!(plugin = %id, detail = ?outcome.detail, "flush failed during shutdown");
                }
            }
            record.handle().shutdown().await;
            info!(plugin = %id, "plugin stopped");
        }
    }

    /// The shared registry (tests and embedding).
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The service bus (tests and embedding).
    #[must_use]
    pub fn bus(&self) -> &Arc<ServiceBus> {
        &self.bus
    }

    /// The orchestrator (tests and embedding).
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("socket", &self.config.socket_path)
            .field("plugins", &self.registry.len())
            .finish_non_exhaustive()
    }
}

async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            // Fall back to ctrl-c alone.
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
