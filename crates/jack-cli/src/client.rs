//! Socket client: one request, one response, close.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use jack_core::{CommandRequest, CommandResponse};

/// How long to wait for the daemon before giving up. Apply-all against a
/// slow provider can legitimately take a while.
const RESPONSE_DEADLINE: Duration = Duration::from_secs(130);

/// Send one command to the daemon and return its response.
///
/// # Errors
///
/// Transport and protocol failures only; a daemon-reported failure comes
/// back as a normal response with `success == false`.
pub async fn send(socket: &Path, request: &CommandRequest) -> anyhow::Result<CommandResponse> {
    let stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("connecting to daemon at {}", socket.display()))?;
    let (read_half, mut write_half) = stream.into_split();

    let mut payload = serde_json::to_vec(request).context("encoding request")?;
    payload.push(b'\n');
    write_half
        .write_all(&payload)
        .await
        .context("sending request")?;
    write_half.shutdown().await.context("closing write half")?;

    let mut line = String::new();
    let read = tokio::time::timeout(
        RESPONSE_DEADLINE,
        BufReader::new(read_half).read_line(&mut line),
    )
    .await;
    match read {
        Ok(Ok(0)) => bail!("daemon closed the connection without a response"),
        Ok(Ok(_)) => serde_json::from_str(&line).context("malformed response from daemon"),
        Ok(Err(e)) => Err(e).context("reading response"),
        Err(_) => bail!("daemon did not respond within {}s", RESPONSE_DEADLINE.as_secs()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jack_core::CommandVerb;
    use tokio::net::UnixListener;

    /// A one-shot fake daemon that answers every request with `response`.
    async fn fake_daemon(listener: UnixListener, response: String) {
        if let Ok((stream, _)) = listener.accept().await {
            let (read_half, mut write_half) = stream.into_split();
            let mut line = String::new();
            let mut reader = BufReader::new(read_half);
            let _ = reader.read_line(&mut line).await;
            let _ = write_half.write_all(response.as_bytes()).await;
        }
    }

    #[tokio::test]
    async fn test_round_trip_with_fake_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jack.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(fake_daemon(
            listener,
            "{\"success\":true,\"message\":\"3 plugins\"}\n".into(),
        ));

        let response = send(&path, &CommandRequest::new(CommandVerb::Status))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.message, "3 plugins");
    }

    #[tokio::test]
    async fn test_connect_failure_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sock");
        let err = send(&path, &CommandRequest::new(CommandVerb::Status))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connecting to daemon"));
    }

    #[tokio::test]
    async fn test_garbage_response_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jack.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(fake_daemon(listener, "not json\n".into()));

        let err = send(&path, &CommandRequest::new(CommandVerb::Status))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("malformed response"));
    }
}
