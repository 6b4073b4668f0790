//! Command channel: the unix-socket surface the CLI talks to.
//!
//! One newline-terminated JSON request per connection, one newline-
//! terminated JSON response, then close. Connections are served by
//! independent tasks; the only serialization anywhere is the per-plugin
//! apply mutex inside the orchestrator.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use jack_core::{CommandRequest, CommandResponse, CommandVerb, PluginId};

use crate::apply::Orchestrator;
use crate::error::DaemonResult;
use crate::registry::{PluginState, Registry};

/// Longest accepted request line; anything bigger is a client bug.
const MAX_REQUEST_LEN: u64 = 1024 * 1024;

/// Serves [`CommandRequest`]s over a unix socket.
pub struct CommandServer {
    registry: Arc<Registry>,
    orchestrator: Arc<Orchestrator>,
}

impl CommandServer {
    /// Create a command server over the registry and orchestrator.
    #[must_use]
    pub fn new(registry: Arc<Registry>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            registry,
            orchestrator,
        }
    }

    /// Bind the listener, removing a stale socket file first.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// socket cannot be bound — both fatal at startup.
    pub fn bind(path: &Path) -> DaemonResult<UnixListener> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "command socket listening");
        Ok(listener)
    }

    /// Accept and serve connections until `shutdown` flips.
    pub async fn run(self: Arc<Self>, listener: UnixListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            server.handle_connection(stream).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept command connection");
                    }
                },
                _ = shutdown.wait_for(|stop| *stop) => {
                    debug!("command socket shutting down");
                    break;
                }
            }
        }
    }

    async fn handle_connection(&self, stream: UnixStream) {
        let (read_half, mut write_half) = stream.into_split();
        let mut line = String::new();
        let mut reader = BufReader::new(read_half).take(MAX_REQUEST_LEN);

        let response = match reader.read_line(&mut line).await {
            Ok(0) => CommandResponse::fail("empty request"),
            Ok(_) if !line.ends_with('\n') && line.len() as u64 >= MAX_REQUEST_LEN => {
                CommandResponse::fail("request too large")
            }
            Ok(_) => match serde_json::from_str::<CommandRequest>(&line) {
                Ok(request) => {
                    let deadline = self.orchestrator.timeouts().request;
                    match tokio::time::timeout(deadline, self.dispatch(request)).await {
                        Ok(response) => response,
                        Err(_) => CommandResponse::fail("request deadline exceeded"),
                    }
                }
                Err(e) => CommandResponse::fail(format!("malformed request: {e}")),
            },
            Err(e) => CommandResponse::fail(format!("reading request: {e}")),
        };

        let mut payload = match serde_json::to_vec(&response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode command response");
                return;
            }
        };
        payload.push(b'\n');
        if let Err(e) = write_half.write_all(&payload).await {
            debug!(error = %e, "client went away before the response");
        }
        let _ = write_half.shutdown().await;
    }

    async fn dispatch(&self, request: CommandRequest) -> CommandResponse {
        let result = match request.command {
            CommandVerb::Apply => self.apply(request.namespace, request.value).await,
            CommandVerb::Validate => self.validate(request.namespace, request.value).await,
            CommandVerb::Status => self.status().await,
            CommandVerb::PluginList => self.plugin_list(),
            CommandVerb::PluginInfo => self.plugin_info(request.namespace),
            CommandVerb::PluginCli => self.plugin_cli(request.namespace, request.args).await,
            CommandVerb::Flush => self.flush(request.namespace).await,
        };
        result.unwrap_or_else(|e| CommandResponse::fail(e.to_string()))
    }

    async fn apply(
        &self,
        namespace: Option<PluginId>,
        value: Option<Value>,
    ) -> DaemonResult<CommandResponse> {
        match namespace {
            Some(id) => {
                let outcome = self.orchestrator.apply_one(&id, value).await?;
                let success = !outcome.is_failure();
                let message = match &outcome.detail {
                    Some(detail) => detail.clone(),
                    None => format!("applied {id}"),
                };
                Ok(CommandResponse {
                    success,
                    message,
                    data: Some(outcome_value(&outcome)),
                })
            }
            None => {
                let outcomes = self.orchestrator.apply_all().await?;
                let failures = outcomes.iter().filter(|o| o.is_failure()).count();
                let message = if failures == 0 {
                    format!("applied {} plugins", outcomes.len())
                } else {
                    format!("{failures} of {} plugins failed", outcomes.len())
                };
                Ok(CommandResponse {
                    success: failures == 0,
                    message,
                    data: Some(outcomes_value(&outcomes)),
                })
            }
        }
    }

    async fn validate(
        &self,
        namespace: Option<PluginId>,
        value: Option<Value>,
    ) -> DaemonResult<CommandResponse> {
        let Some(id) = namespace else {
            return Ok(CommandResponse::fail("validate requires a namespace"));
        };
        self.orchestrator.validate(&id, value).await?;
        Ok(CommandResponse::ok(format!("{id} config is valid"), None))
    }

    async fn status(&self) -> DaemonResult<CommandResponse> {
        let records = self.registry.ordered()?;
        let status_deadline = self.orchestrator.timeouts().status;

        let entries = records.iter().map(|record| async move {
            let live = matches!(
                record.state(),
                PluginState::Configured | PluginState::Ready
            ) && record.handle().is_open();
            let status = if live {
                match tokio::time::timeout(status_deadline, record.handle().status()).await {
                    Ok(Ok(status)) => Some(status),
                    Ok(Err(e)) => Some(json!({"error": e.to_string()})),
                    Err(_) => Some(json!({"error": "status fetch timed out"})),
                }
            } else {
                None
            };
            let mut entry = json!({
                "namespace": record.id(),
                "version": record.metadata().version,
                "state": record.state().to_string(),
            });
            if let Some(last_error) = record.last_error() {
                entry["last_error"] = json!(last_error);
            }
            if let Some(status) = status {
                entry["status"] = status;
            }
            entry
        });
        let entries: Vec<Value> = futures::future::join_all(entries).await;

        Ok(CommandResponse::ok(
            format!("{} plugins", entries.len()),
            Some(Value::Array(entries)),
        ))
    }

    fn plugin_list(&self) -> DaemonResult<CommandResponse> {
        let entries: Vec<Value> = self
            .registry
            .ordered()?
            .iter()
            .map(|record| {
                json!({
                    "namespace": record.id(),
                    "version": record.metadata().version,
                    "state": record.state().to_string(),
                    "category": record.metadata().category,
                    "description": record.metadata().description,
                })
            })
            .collect();
        Ok(CommandResponse::ok(
            format!("{} plugins", entries.len()),
            Some(Value::Array(entries)),
        ))
    }

    fn plugin_info(&self, namespace: Option<PluginId>) -> DaemonResult<CommandResponse> {
        let Some(id) = namespace else {
            return Ok(CommandResponse::fail("plugin-info requires a namespace"));
        };
        let record = self.registry.get(&id)?;
        Ok(CommandResponse::ok(
            id.to_string(),
            Some(json!({
                "metadata": record.metadata(),
                "state": record.state().to_string(),
                "last_error": record.last_error(),
                "service_ready": record.is_service_ready(),
            })),
        ))
    }

    async fn plugin_cli(
        &self,
        namespace: Option<PluginId>,
        args: Vec<String>,
    ) -> DaemonResult<CommandResponse> {
        let Some(id) = namespace else {
            return Ok(CommandResponse::fail("plugin-cli requires a namespace"));
        };
        let record = self.registry.get(&id)?;
        let Some((command, rest)) = args.split_first() else {
            return Ok(CommandResponse::fail("plugin-cli requires a command"));
        };
        let output = record.handle().execute_cli(command, rest).await?;
        Ok(CommandResponse::ok(format!("{id} {command}"), Some(output)))
    }

    async fn flush(&self, namespace: Option<PluginId>) -> DaemonResult<CommandResponse> {
        match namespace {
            Some(id) => {
                let outcome = self.orchestrator.flush_one(&id).await?;
                Ok(CommandResponse {
                    success: !outcome.is_failure(),
                    message: outcome
                        .detail
                        .clone()
                        .unwrap_or_else(|| format!("flushed {id}")),
                    data: Some(outcome_value(&outcome)),
                })
            }
            None => {
                let outcomes = self.orchestrator.flush_all().await?;
                let failures = outcomes.iter().filter(|o| o.is_failure()).count();
                Ok(CommandResponse {
                    success: failures == 0,
                    message: format!("flushed {} plugins, {failures} failures", outcomes.len()),
                    data: Some(outcomes_value(&outcomes)),
                })
            }
        }
    }
}

impl std::fmt::Debug for CommandServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandServer").finish_non_exhaustive()
    }
}

fn outcome_value(outcome: &crate::apply::ApplyOutcome) -> Value {
    serde_json::to_value(outcome).unwrap_or(Value::Null)
}

fn outcomes_value(outcomes: &[crate::apply::ApplyOutcome]) -> Value {
    serde_json::to_value(outcomes).unwrap_or(Value::Null)
}
