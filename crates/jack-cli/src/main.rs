//! `jack` — thin CLI for the Jack daemon.
//!
//! Exit codes: 0 on success, 1 when the daemon reports a failure, 2 on a
//! transport or protocol error (daemon unreachable, malformed response).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;

use jack_core::{CommandRequest, CommandResponse, CommandVerb, PluginId};

mod client;

/// Control the Jack daemon.
#[derive(Parser)]
#[command(name = "jack", version, about, long_about = None)]
struct Cli {
    /// Daemon socket path.
    #[arg(long, env = "JACK_SOCKET_PATH", default_value = jack_core::paths::DEFAULT_SOCKET_PATH, global = true)]
    socket: PathBuf,

    /// Print raw JSON instead of formatted output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply configuration to one namespace, or all in dependency order.
    Apply {
        /// Target namespace; applies everything when omitted.
        namespace: Option<String>,
        /// Read explicit config JSON from this file instead of the
        /// plugin's configured path.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Check a configuration document without touching the system.
    Validate {
        /// Target namespace.
        namespace: String,
        /// Read the config JSON to validate from this file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show registry state and each live plugin's status.
    Status,
    /// Plugin queries and plugin-provided commands.
    #[command(subcommand)]
    Plugin(PluginCommands),
    /// Remove plugin-managed system state.
    Flush {
        /// Target namespace; flushes everything when omitted.
        namespace: Option<String>,
    },
}

#[derive(Subcommand)]
enum PluginCommands {
    /// List registered plugins.
    List,
    /// Metadata and state for one plugin.
    Info {
        /// Target namespace.
        namespace: String,
    },
    /// Run a command the plugin contributes to the CLI.
    Cli {
        /// Target namespace.
        namespace: String,
        /// The plugin command and its arguments.
        #[arg(trailing_var_arg = true, required = true)]
        args: Vec<String>,
    },
}

fn parse_namespace(raw: &str) -> anyhow::Result<PluginId> {
    Ok(PluginId::new(raw)?)
}

fn read_config_file(path: &PathBuf) -> anyhow::Result<Value> {
    let bytes = std::fs::read(path)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| anyhow::anyhow!("config file {}: {e}", path.display()))
}

fn build_request(command: Commands) -> anyhow::Result<CommandRequest> {
    let request = match command {
        Commands::Apply { namespace, config } => {
            let mut request = CommandRequest::new(CommandVerb::Apply);
            if let Some(ns) = namespace {
                request.namespace = Some(parse_namespace(&ns)?);
            }
            if let Some(path) = config {
                request.value = Some(read_config_file(&path)?);
            }
            request
        }
        Commands::Validate { namespace, config } => {
            let mut request = CommandRequest::new(CommandVerb::Validate);
            request.namespace = Some(parse_namespace(&namespace)?);
            if let Some(path) = config {
                request.value = Some(read_config_file(&path)?);
            }
            request
        }
        Commands::Status => CommandRequest::new(CommandVerb::Status),
        Commands::Plugin(PluginCommands::List) => CommandRequest::new(CommandVerb::PluginList),
        Commands::Plugin(PluginCommands::Info { namespace }) => {
            let mut request = CommandRequest::new(CommandVerb::PluginInfo);
            request.namespace = Some(parse_namespace(&namespace)?);
            request
        }
        Commands::Plugin(PluginCommands::Cli { namespace, args }) => {
            let mut request = CommandRequest::new(CommandVerb::PluginCli);
            request.namespace = Some(parse_namespace(&namespace)?);
            request.args = args;
            request
        }
        Commands::Flush { namespace } => {
            let mut request = CommandRequest::new(CommandVerb::Flush);
            if let Some(ns) = namespace {
                request.namespace = Some(parse_namespace(&ns)?);
            }
            request
        }
    };
    Ok(request)
}

fn render(response: &CommandResponse, json: bool) {
    if json {
        match serde_json::to_string_pretty(response) {
            Ok(out) => println!("{out}"),
            Err(_) => println!("{response:?}"),
        }
        return;
    }
    if !response.message.is_empty() {
        println!("{}", response.message);
    }
    match &response.data {
        // Plugin CLI output is plain text; print it as such.
        Some(Value::String(text)) => println!("{text}"),
        Some(data) => {
            if let Ok(pretty) = serde_json::to_string_pretty(data) {
                println!("{pretty}");
            }
        }
        None => {}
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let request = match build_request(cli.command) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    match client::send(&cli.socket, &request).await {
        Ok(response) => {
            render(&response, cli.json);
            if response.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_all_request() {
        let request = build_request(Commands::Apply {
            namespace: None,
            config: None,
        })
        .unwrap();
        assert_eq!(request.command, CommandVerb::Apply);
        assert!(request.namespace.is_none());
        assert!(request.value.is_none());
    }

    #[test]
    fn test_plugin_cli_request_carries_args() {
        let request = build_request(Commands::Plugin(PluginCommands::Cli {
            namespace: "wireguard".into(),
            args: vec!["peers".into(), "--verbose".into()],
        }))
        .unwrap();
        assert_eq!(request.command, CommandVerb::PluginCli);
        assert_eq!(request.namespace.unwrap().as_str(), "wireguard");
        assert_eq!(request.args, vec!["peers", "--verbose"]);
    }

    #[test]
    fn test_bad_namespace_rejected_client_side() {
        let err = build_request(Commands::Plugin(PluginCommands::Info {
            namespace: "Not Valid".into(),
        }))
        .unwrap_err();
        assert!(err.to_string().contains("invalid plugin id"));
    }

    #[test]
    fn test_explicit_config_file_is_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.json");
        std::fs::write(&path, b"{\"zones\": []}").unwrap();
        let request = build_request(Commands::Apply {
            namespace: Some("firewall".into()),
            config: Some(path),
        })
        .unwrap();
        assert_eq!(request.value, Some(serde_json::json!({"zones": []})));
    }

    #[test]
    fn test_empty_config_file_is_null_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, b"").unwrap();
        let request = build_request(Commands::Validate {
            namespace: "leds".into(),
            config: Some(path),
        })
        .unwrap();
        assert_eq!(request.value, Some(Value::Null));
    }
}
