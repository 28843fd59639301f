//! Line-delimited JSON-RPC wire protocol shared by the Unix-socket IPC
//! server and the optional authenticated TCP server.
//!
//! Each line on the wire is one JSON object: a request `{ method, params?,
//! id }`, a response `{ result?, error?, id }`, or (once a connection has
//! `subscribe`d) an event `{ event: { type, payload, time } }`. Errors use
//! the standard JSON-RPC code space.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Bounded line-delimited JSON framing (`tokio_util::codec`).
pub mod codec;
/// Shared request dispatch trait used by both the IPC and TCP servers.
pub mod router;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single JSON-RPC request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Method name (`"ping"`, `"status"`, `"notify"`, `"subscribe"`, ...).
    pub method: String,
    /// Method parameters, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Caller-chosen request id, echoed back on the response.
    pub id: Value,
}

/// A single JSON-RPC response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Successful result, mutually exclusive with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error detail, mutually exclusive with `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Echoes the request's id.
    pub id: Value,
}

impl RpcResponse {
    /// Build a success response.
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Build an error response.
    pub fn err(id: Value, error: RpcError) -> Self {
        Self {
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// Standard JSON-RPC error codes this protocol uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    /// Invalid JSON was received by the server.
    ParseError,
    /// The JSON sent is not a valid request object.
    InvalidRequest,
    /// The method does not exist.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
    /// Application-defined server error (notary domain errors land here).
    ServerError,
}

impl RpcErrorCode {
    /// The numeric JSON-RPC code for this variant.
    pub fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerError => -32000,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    /// Standard or application error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail (e.g. a [`slb_error::NotaryErrorDto`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an error with no structured `data`.
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured `data` to the error.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Build an [`RpcError`] from a [`slb_error::NotaryError`], mapping its
    /// code onto the JSON-RPC space and carrying the full DTO as `data`.
    pub fn from_notary_error(err: &slb_error::NotaryError) -> Self {
        let dto = slb_error::NotaryErrorDto::from(err);
        let data = serde_json::to_value(&dto).ok();
        Self {
            code: err.code.rpc_code(),
            message: err.message.clone(),
            data,
        }
    }
}

/// A broadcast event delivered to subscribers, wrapped in `{"event": ...}`
/// on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// The event payload.
    pub event: Event,
}

/// One published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type tag (caller-defined, e.g. `"request.created"`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary event payload.
    pub payload: Value,
    /// When the event was published.
    pub time: chrono::DateTime<chrono::Utc>,
}

/// Maximum initial growth of the line buffer before reads are bounded by
/// [`MAX_LINE_BYTES`].
pub const INITIAL_LINE_BYTES: usize = 64 * 1024;

/// Hard cap on a single line's length. A line exceeding this closes the
/// connection.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_codes_match_json_rpc_spec() {
        assert_eq!(RpcErrorCode::ParseError.code(), -32700);
        assert_eq!(RpcErrorCode::InvalidRequest.code(), -32600);
        assert_eq!(RpcErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(RpcErrorCode::InvalidParams.code(), -32602);
        assert_eq!(RpcErrorCode::InternalError.code(), -32603);
    }

    #[test]
    fn response_serializes_without_the_absent_field() {
        let ok = RpcResponse::ok(Value::from(1), serde_json::json!({"pong": true}));
        let s = serde_json::to_string(&ok).unwrap();
        assert!(!s.contains("error"));

        let err = RpcResponse::err(Value::from(1), RpcError::new(RpcErrorCode::MethodNotFound, "nope"));
        let s = serde_json::to_string(&err).unwrap();
        assert!(!s.contains("\"result\""));
    }

    #[test]
    fn request_without_params_round_trips() {
        let req = RpcRequest {
            method: "ping".into(),
            params: None,
            id: Value::from(7),
        };
        let s = serde_json::to_string(&req).unwrap();
        assert!(!s.contains("params"));
        let back: RpcRequest = serde_json::from_str(&s).unwrap();
        assert_eq!(back.method, "ping");
    }
}
