//! Wire framing: 4-byte big-endian length prefix, then UTF-8 JSON.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RpcError, RpcResult};
use crate::message::RpcMessage;

/// Maximum frame body length. Larger frames fail the session.
pub const MAX_FRAME_LEN: u32 = 32 * 1024 * 1024;

/// Serialize a message into its framed wire form.
///
/// # Errors
///
/// Returns [`RpcError::Protocol`] if the encoded body exceeds
/// [`MAX_FRAME_LEN`].
pub fn encode(msg: &RpcMessage) -> RpcResult<Vec<u8>> {
    let body = serde_json::to_vec(msg)
        .map_err(|e| RpcError::Protocol(format!("encoding rpc message: {e}")))?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|l| *l <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            RpcError::Protocol(format!(
                "frame body of {} bytes exceeds the {MAX_FRAME_LEN}-byte limit",
                body.len()
            ))
        })?;
    let mut framed = Vec::with_capacity(body.len().saturating_add(4));
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Write one framed message and flush.
///
/// # Errors
///
/// Returns [`RpcError::Protocol`] for oversized bodies or [`RpcError::Io`]
/// on stream failure.
pub async fn write_frame<W>(writer: &mut W, msg: &RpcMessage) -> RpcResult<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = encode(msg)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message.
///
/// # Errors
///
/// - [`RpcError::SessionClosed`] if the stream ends cleanly before a frame
///   (or mid-frame; a short read is indistinguishable from a peer death).
/// - [`RpcError::Protocol`] for an oversized length prefix or a body that
///   is not valid JSON.
/// - [`RpcError::Io`] for other stream failures.
pub async fn read_frame<R>(reader: &mut R) -> RpcResult<RpcMessage>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    read_exact_or_closed(reader, &mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(RpcError::Protocol(format!(
            "frame length {len} exceeds the {MAX_FRAME_LEN}-byte limit"
        )));
    }
    let mut body = vec![0u8; len as usize];
    read_exact_or_closed(reader, &mut body).await?;
    serde_json::from_slice(&body)
        .map_err(|e| RpcError::Protocol(format!("malformed rpc message: {e}")))
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> RpcResult<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(RpcError::SessionClosed),
        Err(e) => Err(RpcError::Io(e)),
    }
}
