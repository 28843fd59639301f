//! Per-project TOML configuration loading for the command notary daemon.
//!
//! This crate covers the ambient concern of parsing
//! `<project>/.slb/config.toml` — the daemon cannot run without reading its
//! own configuration — not the broader project-level configuration system
//! (out of scope; see the notary's own non-goals).
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or validating daemon configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be read (permissions, I/O error).
    #[error("failed to read config at {path}: {reason}")]
    ReadError {
        /// Path that was requested.
        path: String,
        /// Underlying I/O error description.
        reason: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent the daemon from starting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `timeout_action` was present but not one of the recognized values;
    /// the daemon proceeds with `escalate`.
    UnknownTimeoutAction {
        /// The value that was present in the file.
        value: String,
    },
    /// `tcp_require_auth` is false while `tcp_addr` is set — any device on
    /// the network can reach the RPC surface.
    TcpAuthDisabled,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTimeoutAction { value } => {
                write!(f, "unknown general.timeout_action '{value}', defaulting to escalate")
            }
            Self::TcpAuthDisabled => {
                write!(f, "daemon.tcp_addr is set but tcp_require_auth is false")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level per-project daemon configuration, loaded from
/// `<project>/.slb/config.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Default)]
pub struct NotaryConfig {
    /// `[daemon]` section.
    #[serde(default)]
    pub daemon: DaemonSection,
    /// `[general]` section.
    #[serde(default)]
    pub general: GeneralSection,
    /// `[notifications]` section.
    #[serde(default)]
    pub notifications: NotificationsSection,
}

/// `[daemon]` section: optional authenticated TCP frontend.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct DaemonSection {
    /// Address to bind the optional TCP frontend to (e.g. `"0.0.0.0:7777"`).
    /// Absent means the TCP frontend is not started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_addr: Option<String>,
    /// Whether TCP clients must complete the `{"auth": "<key>"}` handshake.
    #[serde(default = "default_true")]
    pub tcp_require_auth: bool,
    /// CIDR/bare-IP allowlist for TCP clients.
    #[serde(default)]
    pub tcp_allowed_ips: Vec<String>,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            tcp_addr: None,
            tcp_require_auth: true,
            tcp_allowed_ips: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// `[general]` section.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct GeneralSection {
    /// What the timeout reaper does with expired pending requests. Unknown
    /// values fall back to `escalate`, recorded as a [`ConfigWarning`].
    #[serde(default = "default_timeout_action")]
    pub timeout_action: String,
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            timeout_action: default_timeout_action(),
        }
    }
}

fn default_timeout_action() -> String {
    "escalate".to_string()
}

/// `[notifications]` section.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct NotificationsSection {
    /// Whether to fire desktop notifications for critical/dangerous
    /// requests.
    #[serde(default = "default_true")]
    pub desktop_enabled: bool,
    /// How long a critical/dangerous request must sit pending before a
    /// desktop notification fires.
    #[serde(default = "default_desktop_delay")]
    pub desktop_delay_seconds: u64,
    /// Optional webhook URL to POST notification events to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            desktop_enabled: true,
            desktop_delay_seconds: default_desktop_delay(),
            webhook_url: None,
        }
    }
}

fn default_desktop_delay() -> u64 {
    60
}

/// Recognized `[general].timeout_action` values.
pub const VALID_TIMEOUT_ACTIONS: &[&str] = &["escalate", "auto_reject", "auto_approve_warn"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`NotaryConfig`] from `<project>/.slb/config.toml`.
///
/// Returns `NotaryConfig::default()` if the file does not exist — the
/// daemon is expected to run with sane defaults for a project that has
/// never been configured.
pub fn load_project_config(project_path: &Path) -> Result<(NotaryConfig, Vec<ConfigWarning>), ConfigError> {
    let config_path = project_path.join(".slb").join("config.toml");
    if !config_path.exists() {
        return Ok((NotaryConfig::default(), Vec::new()));
    }
    load_config_file(&config_path)
}

/// Load and validate a [`NotaryConfig`] from an explicit file path.
pub fn load_config_file(path: &Path) -> Result<(NotaryConfig, Vec<ConfigWarning>), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
        } else {
            ConfigError::ReadError {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        }
    })?;
    parse_toml(&content)
}

/// Parse a TOML string into a [`NotaryConfig`], normalizing an unrecognized
/// `timeout_action` to `"escalate"` and returning a warning for it.
pub fn parse_toml(content: &str) -> Result<(NotaryConfig, Vec<ConfigWarning>), ConfigError> {
    let mut config = toml::from_str::<NotaryConfig>(content)
        .map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;

    let mut warnings = Vec::new();

    if !VALID_TIMEOUT_ACTIONS.contains(&config.general.timeout_action.as_str()) {
        warnings.push(ConfigWarning::UnknownTimeoutAction {
            value: config.general.timeout_action.clone(),
        });
        config.general.timeout_action = "escalate".to_string();
    }

    if config.daemon.tcp_addr.is_some() && !config.daemon.tcp_require_auth {
        warnings.push(ConfigWarning::TcpAuthDisabled);
    }

    validate_config(&config)?;

    Ok((config, warnings))
}

/// Hard-validate a parsed configuration, returning `Err` for values that
/// cannot be used at all (as opposed to merely unwise, which produces a
/// [`ConfigWarning`] instead).
pub fn validate_config(config: &NotaryConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    for entry in &config.daemon.tcp_allowed_ips {
        if entry.trim().is_empty() {
            continue;
        }
        if parse_cidr(entry).is_none() {
            errors.push(format!("invalid CIDR/IP in tcp_allowed_ips: '{entry}'"));
        }
    }

    if config.notifications.desktop_delay_seconds == 0 {
        errors.push("notifications.desktop_delay_seconds must be > 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

/// Parse one allowlist entry (`ip/prefix` or a bare IP) into
/// `(IpAddr, prefix_len)`. Returns `None` on malformed input. Bare IPs are
/// treated as `/32` for v4 and `/128` for v6.
fn parse_cidr(entry: &str) -> Option<(std::net::IpAddr, u8)> {
    let entry = entry.trim();
    if let Some((ip_str, prefix_str)) = entry.split_once('/') {
        let ip: std::net::IpAddr = ip_str.parse().ok()?;
        let prefix: u8 = prefix_str.parse().ok()?;
        let max = if ip.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return None;
        }
        Some((ip, prefix))
    } else {
        let ip: std::net::IpAddr = entry.parse().ok()?;
        let prefix = if ip.is_ipv4() { 32 } else { 128 };
        Some((ip, prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = NotaryConfig::default();
        assert!(validate_config(&cfg).is_ok());
        assert_eq!(cfg.general.timeout_action, "escalate");
        assert!(cfg.daemon.tcp_require_auth);
    }

    #[test]
    fn parse_valid_toml() {
        let toml = r#"
            [daemon]
            tcp_addr = "0.0.0.0:7777"
            tcp_allowed_ips = ["10.0.0.0/8", "192.168.1.5"]

            [general]
            timeout_action = "auto_reject"

            [notifications]
            desktop_enabled = false
            webhook_url = "https://example.com/hook"
        "#;
        let (cfg, warnings) = parse_toml(toml).unwrap();
        assert_eq!(cfg.daemon.tcp_addr.as_deref(), Some("0.0.0.0:7777"));
        assert_eq!(cfg.general.timeout_action, "auto_reject");
        assert!(!cfg.notifications.desktop_enabled);
        assert!(warnings.is_empty());
    }

    #[test]
    fn unknown_timeout_action_defaults_to_escalate_with_warning() {
        let toml = r#"
            [general]
            timeout_action = "nonsense"
        "#;
        let (cfg, warnings) = parse_toml(toml).unwrap();
        assert_eq!(cfg.general.timeout_action, "escalate");
        assert!(matches!(warnings[0], ConfigWarning::UnknownTimeoutAction { .. }));
    }

    #[test]
    fn invalid_toml_gives_parse_error() {
        let bad = "this is [not valid toml =";
        let err = parse_toml(bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn invalid_cidr_fails_validation() {
        let toml = r#"
            [daemon]
            tcp_allowed_ips = ["not-an-ip"]
        "#;
        let err = parse_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn bare_ip_and_cidr_allowlist_entries_parse() {
        assert_eq!(
            parse_cidr("10.0.0.0/8"),
            Some(("10.0.0.0".parse().unwrap(), 8))
        );
        assert_eq!(
            parse_cidr("192.168.1.5"),
            Some(("192.168.1.5".parse().unwrap(), 32))
        );
        assert_eq!(parse_cidr("not-an-ip"), None);
    }

    #[test]
    fn missing_file_yields_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, warnings) = load_project_config(dir.path()).unwrap();
        assert_eq!(cfg, NotaryConfig::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn tcp_addr_without_auth_warns() {
        let toml = r#"
            [daemon]
            tcp_addr = "0.0.0.0:7777"
            tcp_require_auth = false
        "#;
        let (_cfg, warnings) = parse_toml(toml).unwrap();
        assert!(warnings.contains(&ConfigWarning::TcpAuthDisabled));
    }
}
