//! A minimal Jack provider: owns no system state, answers `Status` and one
//! CLI command with kernel uptime and load figures.
//!
//! Build and drop the binary into a plugin directory as
//! `jack-plugin-sysinfo` to see the whole chain work:
//!
//! ```text
//! cargo build --example sysinfo
//! cp target/debug/examples/sysinfo ./bin/jack-plugin-sysinfo
//! ```

use async_trait::async_trait;
use serde_json::{Value, json};

use jack_core::{CliCommandSpec, PluginId, PluginMetadata};
use jack_provider::{Provider, ProviderError, ProviderResult, serve};

struct SysInfo;

fn read_uptime() -> ProviderResult<f64> {
    let raw = std::fs::read_to_string("/proc/uptime")?;
    raw.split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProviderError::other("unparsable /proc/uptime"))
}

fn read_loadavg() -> ProviderResult<String> {
    Ok(std::fs::read_to_string("/proc/loadavg")?.trim().to_string())
}

#[async_trait]
impl Provider for SysInfo {
    fn metadata(&self) -> PluginMetadata {
        let mut meta = PluginMetadata::new(
            PluginId::from_static("sysinfo"),
            env!("CARGO_PKG_VERSION"),
        );
        meta.description = "Read-only system information".into();
        meta.category = Some("system".into());
        meta.default_config = Some(json!({}));
        meta.cli_commands = vec![CliCommandSpec {
            name: "show".into(),
            help: "Show uptime and load average".into(),
            long_help: None,
            subcommands: vec![],
            continuous: true,
            poll_interval_secs: Some(5),
        }];
        meta
    }

    async fn apply_config(&self, _config: Value) -> ProviderResult<()> {
        // Nothing to configure; the plugin is read-only.
        Ok(())
    }

    async fn validate_config(&self, _config: Value) -> ProviderResult<()> {
        Ok(())
    }

    async fn flush(&self) -> ProviderResult<()> {
        Ok(())
    }

    async fn status(&self) -> ProviderResult<Value> {
        Ok(json!({
            "uptime_secs": read_uptime()?,
            "loadavg": read_loadavg()?,
        }))
    }

    async fn execute_cli_command(&self, command: &str, _args: &[String]) -> ProviderResult<Value> {
        match command {
            "show" => Ok(json!(format!(
                "up {:.0}s, load {}",
                read_uptime()?,
                read_loadavg()?
            ))),
            other => Err(ProviderError::other(format!("unknown command: {other}"))),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ProviderResult<()> {
    // stdout belongs to the framed protocol; logs go to stderr only.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    serve(SysInfo).await
}
