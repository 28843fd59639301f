//! Review signing and verification for the command notary.
//!
//! Each [`Session`](slb_core::Session) holds a 256-bit secret key minted at
//! creation. A review signature binds `(request_id, decision, timestamp)` to
//! that key:
//!
//! ```text
//! sig = HMAC_SHA256(key, request_id || decision || RFC3339(timestamp))
//! ```
//!
//! Verification uses [`hmac::Mac::verify_slice`], which compares digests in
//! constant time by construction — this satisfies the "constant-time
//! comparison" requirement without hand-rolling one.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, SubsecRound, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Number of random bytes in a freshly minted session key.
pub const SESSION_KEY_BYTES: usize = 32;

/// Generate a new session key: 32 cryptographically random bytes,
/// hex-encoded.
pub fn generate_session_key() -> String {
    let mut bytes = [0u8; SESSION_KEY_BYTES];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    hex::encode(bytes)
}

/// Compute a review signature, hex-encoded.
///
/// `key` is the reviewer session's hex-encoded secret. `decision` is
/// `"approve"` or `"reject"`. `timestamp` MUST be the exact value that will
/// be stored as `Review::signature_timestamp` — RFC 3339 at second
/// precision — since verification re-derives the same string and any drift
/// (sub-second digits, a different timezone offset) changes the signed
/// bytes.
pub fn sign(key_hex: &str, request_id: Uuid, decision: &str, timestamp: DateTime<Utc>) -> Result<String, SignError> {
    let key = hex::decode(key_hex).map_err(|_| SignError::InvalidKeyEncoding)?;
    let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| SignError::InvalidKeyLength)?;
    mac.update(request_id.as_bytes());
    mac.update(decision.as_bytes());
    mac.update(timestamp_bytes(timestamp).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a review signature in constant time.
///
/// Returns `Ok(true)` / `Ok(false)` for a well-formed but mismatching
/// signature; `Err` only for malformed inputs (bad hex, wrong key length).
pub fn verify(
    key_hex: &str,
    request_id: Uuid,
    decision: &str,
    timestamp: DateTime<Utc>,
    signature_hex: &str,
) -> Result<bool, SignError> {
    let key = hex::decode(key_hex).map_err(|_| SignError::InvalidKeyEncoding)?;
    let sig_bytes = hex::decode(signature_hex).map_err(|_| SignError::InvalidSignatureEncoding)?;
    let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| SignError::InvalidKeyLength)?;
    mac.update(request_id.as_bytes());
    mac.update(decision.as_bytes());
    mac.update(timestamp_bytes(timestamp).as_bytes());
    Ok(mac.verify_slice(&sig_bytes).is_ok())
}

/// Render `timestamp` the way it is bound into the signature: RFC 3339 at
/// second precision, e.g. `2024-01-01T00:00:00Z`.
fn timestamp_bytes(timestamp: DateTime<Utc>) -> String {
    timestamp.trunc_subsecs(0).to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Errors from signing or verifying a review signature.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    /// The supplied key was not valid hex.
    #[error("session key is not valid hex")]
    InvalidKeyEncoding,
    /// The supplied key decoded to the wrong byte length for HMAC-SHA256
    /// (any length works for HMAC, but an empty key is rejected).
    #[error("session key has invalid length")]
    InvalidKeyLength,
    /// The supplied signature was not valid hex.
    #[error("signature is not valid hex")]
    InvalidSignatureEncoding,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let key = generate_session_key();
        let req_id = Uuid::new_v4();
        let ts = fixed_timestamp();
        let sig = sign(&key, req_id, "approve", ts).unwrap();
        assert!(verify(&key, req_id, "approve", ts, &sig).unwrap());
    }

    #[test]
    fn altered_decision_fails_verification() {
        let key = generate_session_key();
        let req_id = Uuid::new_v4();
        let ts = fixed_timestamp();
        let sig = sign(&key, req_id, "approve", ts).unwrap();
        assert!(!verify(&key, req_id, "reject", ts, &sig).unwrap());
    }

    #[test]
    fn altered_request_id_fails_verification() {
        let key = generate_session_key();
        let ts = fixed_timestamp();
        let sig = sign(&key, Uuid::new_v4(), "approve", ts).unwrap();
        assert!(!verify(&key, Uuid::new_v4(), "approve", ts, &sig).unwrap());
    }

    #[test]
    fn altered_timestamp_fails_verification() {
        let key = generate_session_key();
        let req_id = Uuid::new_v4();
        let ts = fixed_timestamp();
        let sig = sign(&key, req_id, "approve", ts).unwrap();
        let other_ts = ts + chrono::Duration::seconds(1);
        assert!(!verify(&key, req_id, "approve", other_ts, &sig).unwrap());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let key_a = generate_session_key();
        let key_b = generate_session_key();
        let req_id = Uuid::new_v4();
        let ts = fixed_timestamp();
        let sig = sign(&key_a, req_id, "approve", ts).unwrap();
        assert!(!verify(&key_b, req_id, "approve", ts, &sig).unwrap());
    }

    #[test]
    fn generated_keys_are_32_bytes_hex_encoded() {
        let key = generate_session_key();
        assert_eq!(key.len(), SESSION_KEY_BYTES * 2);
        assert!(hex::decode(&key).is_ok());
    }

    #[test]
    fn generated_keys_are_unique() {
        let a = generate_session_key();
        let b = generate_session_key();
        assert_ne!(a, b);
    }

    #[test]
    fn invalid_key_hex_errors() {
        let req_id = Uuid::new_v4();
        let ts = fixed_timestamp();
        let err = sign("not-hex!", req_id, "approve", ts).unwrap_err();
        assert_eq!(err, SignError::InvalidKeyEncoding);
    }

    #[test]
    fn subsecond_precision_is_truncated_before_signing() {
        let key = generate_session_key();
        let req_id = Uuid::new_v4();
        let ts = fixed_timestamp();
        let ts_with_millis = ts + chrono::Duration::milliseconds(500);
        let sig = sign(&key, req_id, "approve", ts).unwrap();
        // Truncating subseconds means both render to the same signed bytes.
        assert!(verify(&key, req_id, "approve", ts_with_millis, &sig).unwrap());
    }
}
