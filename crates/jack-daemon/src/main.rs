//! `jackd` — the Jack control-plane daemon.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use jack_daemon::{Daemon, DaemonConfig};

/// Declarative, plugin-based control plane for a network appliance.
#[derive(Parser)]
#[command(name = "jackd", version, about, long_about = None)]
struct Args {
    /// Command socket path.
    #[arg(long, env = "JACK_SOCKET_PATH", default_value = jack_core::paths::DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Plugin directory; may be given multiple times. Replaces the default
    /// search path (./bin, /usr/lib/jack/plugins, /opt/jack/plugins).
    #[arg(long = "plugin-dir")]
    plugin_dirs: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = DaemonConfig {
        socket_path: args.socket,
        plugin_dirs: if args.plugin_dirs.is_empty() {
            jack_core::paths::default_plugin_dirs()
        } else {
            args.plugin_dirs
        },
        ..DaemonConfig::default()
    };

    info!(socket = %config.socket_path.display(), "starting jackd");
    let daemon = Daemon::start(config).await.context("starting daemon")?;
    daemon.apply_initial().await.context("initial apply")?;
    daemon.run().await.context("running daemon")?;
    info!("jackd exited cleanly");
    Ok(())
}
