//! Content-addressed hashing of [`crate::CommandSpec`].

use sha2::{Digest, Sha256};

/// Compute the SHA-256 command hash, hex-encoded.
///
/// The digest input is `raw "\n" cwd "\n" json(argv) "\n" "true"|"false"`,
/// where `json(argv)` is the canonical `serde_json` array serialization of
/// `argv`, or the literal string `"null"` when `argv` is absent. This is a
/// pure function of its four inputs: changing any one of them changes the
/// hash (the property asserted by the `command_hash_determinism` property
/// test).
pub fn compute_command_hash(raw: &str, cwd: &str, argv: Option<&[String]>, shell: bool) -> String {
    let argv_json = match argv {
        Some(v) => serde_json::to_string(v).unwrap_or_else(|_| "null".to_string()),
        None => "null".to_string(),
    };

    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hasher.update(b"\n");
    hasher.update(cwd.as_bytes());
    hasher.update(b"\n");
    hasher.update(argv_json.as_bytes());
    hasher.update(b"\n");
    hasher.update(if shell { b"true" } else { b"false" });

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let a = compute_command_hash("ls -la", "/tmp", None, false);
        let b = compute_command_hash("ls -la", "/tmp", None, false);
        assert_eq!(a, b);
    }

    #[test]
    fn changing_raw_changes_hash() {
        let a = compute_command_hash("ls -la", "/tmp", None, false);
        let b = compute_command_hash("ls -lah", "/tmp", None, false);
        assert_ne!(a, b);
    }

    #[test]
    fn changing_cwd_changes_hash() {
        let a = compute_command_hash("ls -la", "/tmp", None, false);
        let b = compute_command_hash("ls -la", "/home", None, false);
        assert_ne!(a, b);
    }

    #[test]
    fn changing_argv_changes_hash() {
        let a = compute_command_hash("ls", "/tmp", Some(&["-la".to_string()]), false);
        let b = compute_command_hash("ls", "/tmp", Some(&["-l".to_string()]), false);
        assert_ne!(a, b);
    }

    #[test]
    fn absent_argv_differs_from_empty_argv() {
        let a = compute_command_hash("ls", "/tmp", None, false);
        let b = compute_command_hash("ls", "/tmp", Some(&[]), false);
        assert_ne!(a, b);
    }

    #[test]
    fn changing_shell_flag_changes_hash() {
        let a = compute_command_hash("ls | grep x", "/tmp", None, false);
        let b = compute_command_hash("ls | grep x", "/tmp", None, true);
        assert_ne!(a, b);
    }

    #[test]
    fn output_is_64_hex_chars() {
        let h = compute_command_hash("echo hi", "/tmp", None, false);
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    proptest! {
        #[test]
        fn hash_changes_whenever_raw_differs(a in ".*", b in ".*") {
            prop_assume!(a != b);
            let ha = compute_command_hash(&a, "/tmp", None, false);
            let hb = compute_command_hash(&b, "/tmp", None, false);
            prop_assert_ne!(ha, hb);
        }
    }
}
