//! RPC message envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a message asks or answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// A call; carries `method` and optionally `payload`.
    Request,
    /// A reply; carries `payload` on success or a non-empty `error`.
    Response,
}

/// One framed message.
///
/// Request ids are assigned by the caller, monotonic per session; a
/// response echoes the id of the request it answers. The body is UTF-8
/// JSON, so payloads are JSON documents rather than raw bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    /// Message direction.
    pub dir: Direction,
    /// Request id; matches responses to their callers.
    pub id: u64,
    /// Method name; requests only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Arguments or result document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Failure description; responses only, absent or empty means success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcMessage {
    /// Build a request.
    #[must_use]
    pub fn request(id: u64, method: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            dir: Direction::Request,
            id,
            method: Some(method.into()),
            payload,
            error: None,
        }
    }

    /// Build a successful response.
    #[must_use]
    pub fn response(id: u64, payload: Option<Value>) -> Self {
        Self {
            dir: Direction::Response,
            id,
            method: None,
            payload,
            error: None,
        }
    }

    /// Build an error response.
    #[must_use]
    pub fn error_response(id: u64, error: impl Into<String>) -> Self {
        Self {
            dir: Direction::Response,
            id,
            method: None,
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Whether this response reports a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}
