//! Daemon configuration.
//!
//! Resolution order: built-in defaults, then environment
//! (`JACK_SOCKET_PATH`), then `jackd` command-line flags. No config file —
//! the daemon's own knobs are few and the interesting configuration all
//! belongs to plugins.

use std::path::PathBuf;
use std::time::Duration;

use jack_core::paths;

/// Deadlines for everything the daemon waits on.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Reading the plugin's handshake line after spawn.
    pub handshake: Duration,
    /// The `Metadata` probe.
    pub metadata: Duration,
    /// One `ApplyConfig` or `ValidateConfig` call.
    pub apply: Duration,
    /// One `Status` fetch.
    pub status: Duration,
    /// One `ExecuteCLICommand` call.
    pub cli: Duration,
    /// Waiting for a service provider to declare readiness.
    pub service_ready: Duration,
    /// One forwarded service call.
    pub service_call: Duration,
    /// One `Flush` call.
    pub flush: Duration,
    /// Waiting for a plugin process to exit after its session closes;
    /// SIGKILL afterwards.
    pub shutdown_grace: Duration,
    /// One whole command-channel request.
    pub request: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(5),
            metadata: Duration::from_secs(10),
            apply: Duration::from_secs(30),
            status: Duration::from_secs(5),
            cli: Duration::from_secs(30),
            service_ready: Duration::from_secs(10),
            service_call: Duration::from_secs(10),
            flush: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
            request: Duration::from_secs(120),
        }
    }
}

/// Everything `jackd` needs to run.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Command socket path.
    pub socket_path: PathBuf,
    /// Directories scanned for `jack-plugin-*` binaries, in order.
    pub plugin_dirs: Vec<PathBuf>,
    /// Deadlines.
    pub timeouts: Timeouts,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: paths::socket_path(),
            plugin_dirs: paths::default_plugin_dirs(),
            timeouts: Timeouts::default(),
        }
    }
}
