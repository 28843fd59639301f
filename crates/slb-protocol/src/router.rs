//! Shared request-dispatch trait for the IPC and TCP frontends.
//!
//! Both servers own a `LineCodec`-framed connection and otherwise differ
//! only in how they accept connections (Unix socket vs TCP with an
//! allowlist and auth handshake). The actual method table — `ping`,
//! `status`, `notify`, `subscribe`, and the forwarding methods that call
//! into the Store and Verifier — lives behind this one trait so both
//! frontends share it.

use async_trait::async_trait;
use serde_json::Value;

use crate::{RpcError, RpcErrorCode};

/// Context passed to a [`Dispatcher`] for one RPC call.
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    /// Opaque per-connection id, stable for the lifetime of one socket.
    pub connection_id: u64,
}

/// Implemented by the daemon's method table. `slb-ipc` and `slb-tcp` both
/// hold one `Arc<dyn Dispatcher>` and drive it from their own accept loops.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Handle one parsed request, returning its JSON result or a structured
    /// RPC error. Unknown methods MUST return
    /// [`RpcErrorCode::MethodNotFound`] rather than panicking.
    async fn dispatch(&self, ctx: CallContext, method: &str, params: Option<Value>) -> Result<Value, RpcError>;
}

/// Validate that `params`, when present, is a JSON object — the shape every
/// method in this protocol expects. Methods with no parameters should
/// ignore `params` entirely rather than calling this.
pub fn require_object_params(params: &Option<Value>) -> Result<(), RpcError> {
    match params {
        None | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(RpcError::new(
            RpcErrorCode::InvalidParams,
            "params must be a JSON object",
        )),
    }
}
