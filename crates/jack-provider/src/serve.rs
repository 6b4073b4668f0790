//! The provider stub: handshake, then serve the contract over a stream.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use jack_core::wire::{CliInvocation, ServiceCall, handshake_line, methods};
use jack_rpc::{RpcHandler, RpcSession};

use crate::client::ServiceClient;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{Provider, ProviderContext};

/// Serve a provider on stdin/stdout until the daemon goes away.
///
/// Writes the handshake line first; everything after it on stdout is
/// framed RPC. Returns when the daemon closes the stream.
///
/// # Errors
///
/// Returns an error if the handshake cannot be written or
/// [`Provider::init`] fails.
pub async fn serve<P: Provider>(provider: P) -> ProviderResult<()> {
    serve_stream(provider, tokio::io::stdin(), tokio::io::stdout()).await
}

/// [`serve`] over an arbitrary stream pair; what tests use in place of
/// real stdio.
///
/// # Errors
///
/// Same conditions as [`serve`].
pub async fn serve_stream<P, R, W>(provider: P, reader: R, mut writer: W) -> ProviderResult<()>
where
    P: Provider,
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    writer.write_all(handshake_line().as_bytes()).await?;
    writer.flush().await?;

    let stub = Arc::new(Stub {
        provider: Arc::new(provider),
        client: OnceLock::new(),
    });
    let session = RpcSession::connect(reader, writer, Arc::clone(&stub) as Arc<dyn RpcHandler>);
    let client = ServiceClient::new(Arc::clone(&session));
    // Binding can only fail if serve_stream ran twice on one stub, which
    // the ownership above rules out.
    let _ = stub.client.set(client.clone());

    stub.provider.init(ProviderContext::new(client)).await?;
    debug!("provider serving");

    session.wait_closed().await;
    Ok(())
}

/// Routes inbound daemon requests onto the provider.
struct Stub<P> {
    provider: Arc<P>,
    client: OnceLock<ServiceClient>,
}

impl<P: Provider> Stub<P> {
    fn context_at(&self, depth: u32) -> Result<ProviderContext, String> {
        self.client
            .get()
            .map(|c| ProviderContext::new(c.at_depth(depth)))
            .ok_or_else(|| "provider not initialized".to_string())
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(
    method: &str,
    payload: Option<Value>,
) -> Result<T, String> {
    serde_json::from_value(payload.unwrap_or(Value::Null))
        .map_err(|e| format!("invalid {method} arguments: {e}"))
}

fn done(result: ProviderResult<()>) -> Result<Value, String> {
    result.map(|()| Value::Null).map_err(|e| e.to_string())
}

#[async_trait]
impl<P: Provider> RpcHandler for Stub<P> {
    async fn handle(&self, method: &str, payload: Option<Value>) -> Result<Value, String> {
        match method {
            methods::METADATA => serde_json::to_value(self.provider.metadata())
                .map_err(|e| format!("encoding metadata: {e}")),
            methods::APPLY_CONFIG => done(
                self.provider
                    .apply_config(payload.unwrap_or(Value::Null))
                    .await,
            ),
            methods::VALIDATE_CONFIG => done(
                self.provider
                    .validate_config(payload.unwrap_or(Value::Null))
                    .await,
            ),
            methods::FLUSH => done(self.provider.flush().await),
            methods::STATUS => self.provider.status().await.map_err(|e| e.to_string()),
            methods::EXECUTE_CLI_COMMAND => {
                let invocation: CliInvocation = parse_args(method, payload)?;
                self.provider
                    .execute_cli_command(&invocation.command, &invocation.args)
                    .await
                    .map_err(|e| e.to_string())
            }
            methods::ON_LOG_EVENT => done(
                self.provider
                    .on_log_event(payload.unwrap_or(Value::Null))
                    .await,
            ),
            methods::GET_PROVIDED_SERVICES => {
                serde_json::to_value(self.provider.provided_services())
                    .map_err(|e| format!("encoding services: {e}"))
            }
            methods::CALL_SERVICE => {
                let call: ServiceCall = parse_args(method, payload)?;
                let ctx = self.context_at(call.depth)?;
                self.provider
                    .call_service(call, ctx)
                    .await
                    .map_err(|e| e.to_string())
            }
            other => Err(format!("unknown method: {other}")),
        }
    }
}
