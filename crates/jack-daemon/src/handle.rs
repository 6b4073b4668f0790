//! Provider handle: one plugin subprocess and its RPC session.
//!
//! The handle exclusively owns the child's stdio and PID. Everything the
//! daemon says to a plugin goes through here; everything the plugin says
//! back arrives on the session's reader and — for `CallService` — is
//! dispatched into the [`ServiceBus`](crate::bus::ServiceBus) without
//! touching any orchestrator lock.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use jack_core::wire::{CliInvocation, ServiceCall, methods, parse_handshake};
use jack_core::{PluginId, PluginMetadata};
use jack_rpc::{RpcError, RpcHandler, RpcSession};

use crate::bus::ServiceBus;
use crate::config::Timeouts;
use crate::error::{DaemonError, DaemonResult};

/// Daemon-side handle for one provider process.
pub struct ProviderHandle {
    label: String,
    session: Arc<RpcSession>,
    handler: Arc<DaemonHandler>,
    child: Mutex<Option<Child>>,
    timeouts: Timeouts,
}

impl ProviderHandle {
    /// Fork/exec a plugin binary, verify its handshake line, and bind the
    /// remaining stdio to an RPC session. Stderr is forwarded into the
    /// daemon's log.
    ///
    /// # Errors
    ///
    /// [`DaemonError::Spawn`] if the process cannot start,
    /// [`DaemonError::HandshakeFailed`] on any first-line mismatch (the
    /// child is killed before returning).
    pub async fn spawn(
        binary: &Path,
        bus: Arc<ServiceBus>,
        timeouts: Timeouts,
    ) -> DaemonResult<Arc<Self>> {
        let mut child = Command::new(binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DaemonError::Spawn {
                binary: binary.to_path_buf(),
                source: e,
            })?;

        let label = binary.display().to_string();
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(label.clone(), stderr);
        }
        // The pipes exist because we asked for them above.
        let stdout = child.stdout.take().ok_or_else(|| DaemonError::Spawn {
            binary: binary.to_path_buf(),
            source: std::io::Error::other("child stdout not captured"),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| DaemonError::Spawn {
            binary: binary.to_path_buf(),
            source: std::io::Error::other("child stdin not captured"),
        })?;

        let mut reader = BufReader::new(stdout);
        if let Err(reason) = read_handshake(&mut reader, timeouts.handshake).await {
            // A corrupted stdout is fatal; don't leave the child around.
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(DaemonError::HandshakeFailed {
                binary: binary.to_path_buf(),
                reason,
            });
        }
        debug!(plugin = %label, "handshake verified");

        let handle = Self::bind(label, reader, stdin, bus, timeouts);
        *handle.child.lock().await = Some(child);
        Ok(handle)
    }

    /// Bind a handle to an arbitrary stream pair, consuming the handshake
    /// line first. This is how tests drive the full daemon chain over
    /// [`tokio::io::duplex`] with an in-process provider stub on the far
    /// side.
    ///
    /// # Errors
    ///
    /// [`DaemonError::HandshakeFailed`] on any first-line mismatch.
    pub async fn from_stream<R, W>(
        label: impl Into<String>,
        reader: R,
        writer: W,
        bus: Arc<ServiceBus>,
        timeouts: Timeouts,
    ) -> DaemonResult<Arc<Self>>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let label = label.into();
        let mut reader = BufReader::new(reader);
        read_handshake(&mut reader, timeouts.handshake)
            .await
            .map_err(|reason| DaemonError::HandshakeFailed {
                binary: label.clone().into(),
                reason,
            })?;
        Ok(Self::bind(label, reader, writer, bus, timeouts))
    }

    /// A handle whose session is already dead; registry tests use it where
    /// no RPC will happen.
    #[cfg(test)]
    pub(crate) fn dangling(label: &str, bus: Arc<ServiceBus>) -> Arc<Self> {
        let (near, far) = tokio::io::duplex(64);
        drop(far);
        let (reader, writer) = tokio::io::split(near);
        Self::bind(label.to_string(), reader, writer, bus, Timeouts::default())
    }

    fn bind<R, W>(
        label: String,
        reader: R,
        writer: W,
        bus: Arc<ServiceBus>,
        timeouts: Timeouts,
    ) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let handler = Arc::new(DaemonHandler {
            bus,
            caller: OnceLock::new(),
        });
        let session = RpcSession::connect(reader, writer, Arc::clone(&handler) as Arc<dyn RpcHandler>);
        Arc::new(Self {
            label,
            session,
            handler,
            child: Mutex::new(None),
            timeouts,
        })
    }

    /// Binary path (or test label) this handle was created from.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Associate the session with its registered namespace. Inbound
    /// service calls are rejected until this is set.
    pub fn bind_namespace(&self, id: PluginId) {
        let _ = self.handler.caller.set(id);
    }

    /// Whether the session is still serving.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.session.is_closed()
    }

    /// Probe the plugin's metadata.
    ///
    /// # Errors
    ///
    /// [`DaemonError::MetadataProbe`] if the call fails or the document is
    /// malformed.
    pub async fn metadata(&self) -> DaemonResult<PluginMetadata> {
        let value = self
            .call(methods::METADATA, None, self.timeouts.metadata)
            .await
            .map_err(|e| DaemonError::MetadataProbe {
                label: self.label.clone(),
                reason: e.to_string(),
            })?;
        serde_json::from_value(value).map_err(|e| DaemonError::MetadataProbe {
            label: self.label.clone(),
            reason: format!("malformed metadata: {e}"),
        })
    }

    /// Apply a configuration document.
    ///
    /// # Errors
    ///
    /// The provider's error verbatim, or a transport/timeout failure.
    pub async fn apply_config(&self, config: Value) -> DaemonResult<()> {
        self.call(methods::APPLY_CONFIG, Some(config), self.timeouts.apply)
            .await
            .map(|_| ())
    }

    /// Side-effect-free configuration check.
    ///
    /// # Errors
    ///
    /// The provider's error verbatim, or a transport/timeout failure.
    pub async fn validate_config(&self, config: Value) -> DaemonResult<()> {
        self.call(methods::VALIDATE_CONFIG, Some(config), self.timeouts.apply)
            .await
            .map(|_| ())
    }

    /// Remove all plugin-managed system state.
    ///
    /// # Errors
    ///
    /// The provider's error verbatim, or a transport/timeout failure.
    pub async fn flush(&self) -> DaemonResult<()> {
        self.call(methods::FLUSH, None, self.timeouts.flush)
            .await
            .map(|_| ())
    }

    /// Fetch the plugin's live status document.
    ///
    /// # Errors
    ///
    /// The provider's error verbatim, or a transport/timeout failure.
    pub async fn status(&self) -> DaemonResult<Value> {
        self.call(methods::STATUS, None, self.timeouts.status).await
    }

    /// Run one of the plugin's CLI commands.
    ///
    /// # Errors
    ///
    /// The provider's error verbatim, or a transport/timeout failure.
    pub async fn execute_cli(&self, command: &str, args: &[String]) -> DaemonResult<Value> {
        let invocation = CliInvocation {
            command: command.to_string(),
            args: args.to_vec(),
        };
        let payload = serde_json::to_value(invocation).map_err(|e| {
            DaemonError::ProviderCall {
                plugin: self.namespace_or_unknown(),
                method: methods::EXECUTE_CLI_COMMAND.into(),
                reason: format!("encoding invocation: {e}"),
            }
        })?;
        self.call(methods::EXECUTE_CLI_COMMAND, Some(payload), self.timeouts.cli)
            .await
    }

    /// Deliver a log event.
    ///
    /// # Errors
    ///
    /// [`DaemonError::MethodNotImplemented`] if the plugin opted out, the
    /// provider's error otherwise.
    pub async fn on_log_event(&self, event: Value) -> DaemonResult<()> {
        self.call(methods::ON_LOG_EVENT, Some(event), self.timeouts.service_call)
            .await
            .map(|_| ())
    }

    /// Forward a service call to this plugin (it owns the target service).
    ///
    /// # Errors
    ///
    /// The provider's error verbatim, or a transport/timeout failure.
    pub async fn call_service(&self, call: &ServiceCall) -> DaemonResult<Value> {
        let payload = serde_json::to_value(call).map_err(|e| DaemonError::ProviderCall {
            plugin: self.namespace_or_unknown(),
            method: methods::CALL_SERVICE.into(),
            reason: format!("encoding service call: {e}"),
        })?;
        self.call(methods::CALL_SERVICE, Some(payload), self.timeouts.service_call)
            .await
    }

    /// Wait until the session dies, then describe why.
    pub async fn wait_failure(&self) -> String {
        self.session.wait_closed().await;
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            match tokio::time::timeout(Duration::from_secs(1), child.wait()).await {
                Ok(Ok(status)) => format!("plugin process exited: {status}"),
                Ok(Err(e)) => format!("plugin process unreachable: {e}"),
                Err(_) => "plugin session closed but process still running".to_string(),
            }
        } else {
            "plugin session closed".to_string()
        }
    }

    /// Close the session and reap the child: wait up to the shutdown grace
    /// period, SIGKILL thereafter. The caller flushes first if it wants a
    /// clean teardown.
    pub async fn shutdown(&self) {
        self.session.close().await;
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            match tokio::time::timeout(self.timeouts.shutdown_grace, child.wait()).await {
                Ok(Ok(status)) => info!(plugin = %self.label, %status, "plugin exited"),
                Ok(Err(e)) => warn!(plugin = %self.label, error = %e, "waiting for plugin exit"),
                Err(_) => {
                    warn!(plugin = %self.label, "plugin did not exit within grace period; killing");
                    if let Err(e) = child.kill().await {
                        warn!(plugin = %self.label, error = %e, "failed to kill plugin");
                    }
                }
            }
        }
    }

    async fn call(
        &self,
        method: &str,
        payload: Option<Value>,
        deadline: Duration,
    ) -> DaemonResult<Value> {
        self.session
            .call_with_timeout(method, payload, deadline)
            .await
            .map_err(|e| DaemonError::from_call(method, e))
    }

    fn namespace_or_unknown(&self) -> PluginId {
        self.handler
            .caller
            .get()
            .cloned()
            .unwrap_or_else(|| PluginId::from_static("unknown"))
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("label", &self.label)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Session-side handler for requests a plugin sends the daemon. Only
/// `CallService` exists today; it is dispatched through the bus with the
/// caller's namespace stamped on.
struct DaemonHandler {
    bus: Arc<ServiceBus>,
    caller: OnceLock<PluginId>,
}

#[async_trait]
impl RpcHandler for DaemonHandler {
    async fn handle(&self, method: &str, payload: Option<Value>) -> Result<Value, String> {
        if method != methods::CALL_SERVICE {
            return Err(format!("unsupported daemon method: {method}"));
        }
        let mut call: ServiceCall = serde_json::from_value(payload.unwrap_or(Value::Null))
            .map_err(|e| format!("invalid service call: {e}"))?;
        let caller = self
            .caller
            .get()
            .cloned()
            .ok_or_else(|| "plugin not yet registered".to_string())?;
        call.caller = Some(caller);
        self.bus.dispatch(call).await.map_err(|e| e.to_string())
    }
}

fn forward_stderr<R>(label: String, stderr: R)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "jack_plugin", plugin = %label, "{line}");
        }
    });
}

async fn read_handshake<R>(reader: &mut BufReader<R>, deadline: Duration) -> Result<(), String>
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    match tokio::time::timeout(deadline, reader.read_line(&mut line)).await {
        Ok(Ok(0)) => Err("stream closed before handshake".to_string()),
        Ok(Ok(_)) => parse_handshake(&line),
        Ok(Err(e)) => Err(format!("reading handshake: {e}")),
        Err(_) => Err(format!("no handshake within {}s", deadline.as_secs())),
    }
}
