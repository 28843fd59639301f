//! The `{"auth":"<session-key>"}` handshake a TCP client must complete
//! before any RPC call is dispatched.

use slb_store::Store;
use subtle::ConstantTimeEq;

/// Validate `candidate_key` against every currently active session's
/// `session_key`, in constant time with respect to the candidate's own
/// content (an attacker measuring response latency learns nothing about
/// which prefix of their guess was correct).
pub async fn validate_session_key(store: &Store, candidate_key: &str) -> bool {
    let sessions = match store.list_all_active_sessions().await {
        Ok(sessions) => sessions,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load active sessions for tcp auth");
            return false;
        }
    };
    sessions.iter().any(|session| constant_time_eq(session.session_key.as_bytes(), candidate_key.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// The handshake line a client must send as its first line on the wire.
#[derive(Debug, serde::Deserialize)]
pub struct AuthHandshake {
    /// The session key to validate.
    pub auth: String,
}
