//! RPC session: request multiplexing over one byte stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, oneshot, watch};
use tracing::{debug, warn};

use crate::error::{RpcError, RpcResult};
use crate::frame::{read_frame, write_frame};
use crate::message::{Direction, RpcMessage};

/// Serves incoming requests on a session.
///
/// The `Err` string is written verbatim into the response `error` field;
/// `Ok` values become the response payload.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Handle one inbound request.
    async fn handle(&self, method: &str, payload: Option<Value>) -> Result<Value, String>;
}

type PendingMap = std::sync::Mutex<HashMap<u64, oneshot::Sender<RpcResult<Value>>>>;

/// A live RPC session over a single byte stream.
///
/// The caller assigns a fresh id per request; a background reader task
/// dispatches incoming frames to the waiting caller keyed by id, or hands
/// them to the registered [`RpcHandler`] if they are requests. Writes are
/// serialized behind a single lock. Inbound requests run on their own
/// tasks, never on the reader task, so a request arriving while an
/// outbound call is in flight cannot deadlock the session.
pub struct RpcSession {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    closed_tx: watch::Sender<bool>,
}

impl RpcSession {
    /// Bind a session to a byte stream and start its reader task.
    ///
    /// `handler` answers requests initiated by the peer; a peer that never
    /// calls back can be given a handler that rejects every method.
    pub fn connect<R, W>(reader: R, writer: W, handler: Arc<dyn RpcHandler>) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed_tx, _) = watch::channel(false);
        let session = Arc::new(Self {
            writer: Mutex::new(Box::new(writer)),
            pending: Arc::new(std::sync::Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            closed_tx,
        });
        tokio::spawn(Self::read_loop(Arc::clone(&session), reader, handler));
        session
    }

    /// Send a request and wait for the matching response.
    ///
    /// Dropping the returned future (e.g. from a timeout) removes the
    /// pending entry; a late response for it is discarded by the reader.
    ///
    /// # Errors
    ///
    /// [`RpcError::Remote`] if the peer answered with an error,
    /// [`RpcError::SessionClosed`] if the stream died first.
    pub async fn call(&self, method: &str, payload: Option<Value>) -> RpcResult<Value> {
        if self.is_closed() {
            return Err(RpcError::SessionClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            pending.insert(id, tx);
        }
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            id,
        };
        // Re-check after inserting: a close that raced the first check has
        // already drained the map and would never complete this entry.
        if self.is_closed() {
            return Err(RpcError::SessionClosed);
        }

        // An early return here drops `guard`, which removes the entry.
        let msg = RpcMessage::request(id, method, payload);
        self.send(&msg).await?;

        // The sender side is dropped when the session closes and drains the
        // pending map; surface that as SessionClosed rather than a recv error.
        let result = match rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::SessionClosed),
        };
        drop(guard);
        result
    }

    /// [`call`](Self::call) with a deadline.
    ///
    /// # Errors
    ///
    /// [`RpcError::Timeout`] when the deadline expires; the pending entry
    /// is removed, so a late response is discarded.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        payload: Option<Value>,
        deadline: Duration,
    ) -> RpcResult<Value> {
        match tokio::time::timeout(deadline, self.call(method, payload)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout),
        }
    }

    /// Whether the session has stopped serving.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Wait until the session closes (stream EOF, protocol error, or
    /// [`close`](Self::close)).
    pub async fn wait_closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        // Ignore the error case: if the sender is gone the session is closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Close the session: drain outstanding calls with
    /// [`RpcError::SessionClosed`] and shut the write half down.
    pub async fn close(&self) {
        self.mark_closed();
        let mut writer = self.writer.lock().await;
        let _ = tokio::io::AsyncWriteExt::shutdown(&mut *writer).await;
    }

    async fn send(&self, msg: &RpcMessage) -> RpcResult<()> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, msg).await
    }

    fn mark_closed(&self) {
        self.closed_tx.send_replace(true);
        let drained: Vec<oneshot::Sender<RpcResult<Value>>> = {
            let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(RpcError::SessionClosed));
        }
    }

    async fn read_loop<R>(session: Arc<Self>, mut reader: R, handler: Arc<dyn RpcHandler>)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        loop {
            let msg = match read_frame(&mut reader).await {
                Ok(msg) => msg,
                Err(RpcError::SessionClosed) => {
                    debug!("rpc stream ended");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "rpc session aborted");
                    break;
                }
            };
            match msg.dir {
                Direction::Response => session.dispatch_response(msg),
                Direction::Request => {
                    let session = Arc::clone(&session);
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        session.serve_request(handler, msg).await;
                    });
                }
            }
        }
        session.mark_closed();
    }

    fn dispatch_response(&self, msg: RpcMessage) {
        let tx = {
            let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            pending.remove(&msg.id)
        };
        let Some(tx) = tx else {
            // Caller gave up (deadline, disconnect); drop the late reply.
            debug!(id = msg.id, "response for abandoned call");
            return;
        };
        let result = if msg.is_error() {
            Err(RpcError::Remote(msg.error.unwrap_or_default()))
        } else {
            Ok(msg.payload.unwrap_or(Value::Null))
        };
        let _ = tx.send(result);
    }

    async fn serve_request(&self, handler: Arc<dyn RpcHandler>, msg: RpcMessage) {
        let id = msg.id;
        let Some(method) = msg.method else {
            let _ = self
                .send(&RpcMessage::error_response(id, "request without method"))
                .await;
            return;
        };
        // Run the handler on its own task so a panic is contained and
        // answered instead of tearing the whole process down.
        let payload = msg.payload;
        let joined = tokio::spawn(async move { handler.handle(&method, payload).await }).await;
        let response = match joined {
            Ok(Ok(value)) => RpcMessage::response(id, Some(value)),
            Ok(Err(error)) => RpcMessage::error_response(id, error),
            Err(join_err) => {
                let detail = if join_err.is_panic() {
                    panic_message(join_err)
                } else {
                    "handler cancelled".to_string()
                };
                RpcMessage::error_response(id, format!("internal: {detail}"))
            }
        };
        if let Err(e) = self.send(&response).await {
            debug!(id, error = %e, "failed to write rpc response");
        }
    }
}

impl std::fmt::Debug for RpcSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcSession")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Removes the pending entry if the call future is dropped before its
/// response arrives.
struct PendingGuard {
    pending: Arc<PendingMap>,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        pending.remove(&self.id);
    }
}

fn panic_message(join_err: tokio::task::JoinError) -> String {
    match join_err.try_into_panic() {
        Ok(panic) => {
            if let Some(s) = panic.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "handler panicked".to_string()
            }
        }
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes the payload back after an optional per-method delay.
    struct EchoHandler {
        delay_ms: u64,
    }

    #[async_trait]
    impl RpcHandler for EchoHandler {
        async fn handle(&self, method: &str, payload: Option<Value>) -> Result<Value, String> {
            match method {
                "echo" => {
                    if self.delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
                    }
                    Ok(payload.unwrap_or(Value::Null))
                }
                "boom" => Err("deliberate failure".into()),
                "panic" => panic!("handler exploded"),
                other => Err(format!("unknown method: {other}")),
            }
        }
    }

    struct RejectAll;

    #[async_trait]
    impl RpcHandler for RejectAll {
        async fn handle(&self, method: &str, _payload: Option<Value>) -> Result<Value, String> {
            Err(format!("unexpected call: {method}"))
        }
    }

    fn pair(delay_ms: u64) -> (Arc<RpcSession>, Arc<RpcSession>) {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (cr, cw) = tokio::io::split(client_side);
        let (sr, sw) = tokio::io::split(server_side);
        let client = RpcSession::connect(cr, cw, Arc::new(RejectAll));
        let server = RpcSession::connect(sr, sw, Arc::new(EchoHandler { delay_ms }));
        (client, server)
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (client, _server) = pair(0);
        let result = client
            .call("echo", Some(serde_json::json!({"n": 1})))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_remote_error_surfaces() {
        let (client, _server) = pair(0);
        let err = client.call("boom", None).await.unwrap_err();
        match err {
            RpcError::Remote(msg) => assert_eq!(msg, "deliberate failure"),
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_internal_error() {
        let (client, _server) = pair(0);
        let err = client.call("panic", None).await.unwrap_err();
        match err {
            RpcError::Remote(msg) => {
                assert!(msg.starts_with("internal:"), "got {msg:?}");
                assert!(msg.contains("handler exploded"), "got {msg:?}");
            }
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_calls_multiplex() {
        let (client, _server) = pair(5);
        let client2 = Arc::clone(&client);
        let slow = tokio::spawn(async move {
            client2.call("echo", Some(serde_json::json!("slow"))).await
        });
        let fast = client.call("echo", Some(serde_json::json!("fast"))).await;
        assert_eq!(fast.unwrap(), serde_json::json!("fast"));
        assert_eq!(slow.await.unwrap().unwrap(), serde_json::json!("slow"));
    }

    #[tokio::test]
    async fn test_both_directions_on_one_stream() {
        let (client, server) = pair(0);
        // The "server" can also call; the client rejects with its handler.
        let err = server.call("anything", None).await.unwrap_err();
        assert!(matches!(err, RpcError::Remote(_)));
        // And the forward direction still works afterwards.
        let result = client.call("echo", None).await.unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn test_close_drains_pending_calls() {
        let (client, server) = pair(5_000);
        let client2 = Arc::clone(&client);
        let pending = tokio::spawn(async move { client2.call("echo", None).await });
        // Give the call a moment to get onto the wire.
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.close().await;
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::SessionClosed), "got {err:?}");
    }

    #[tokio::test]
    async fn test_call_after_close_fails_fast() {
        let (client, server) = pair(0);
        server.close().await;
        client.wait_closed().await;
        let err = client.call("echo", None).await.unwrap_err();
        assert!(matches!(err, RpcError::SessionClosed));
    }

    #[tokio::test]
    async fn test_call_timeout_removes_pending_entry() {
        let (client, _server) = pair(5_000);
        let err = client
            .call_with_timeout("echo", None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout), "got {err:?}");
        let pending = client
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        assert!(pending.is_empty(), "abandoned call left a pending entry");
    }
}
