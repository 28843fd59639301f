//! Platform-specific desktop notification dispatch.

/// Errors raised delivering a desktop notification.
#[derive(Debug, thiserror::Error)]
pub enum DesktopNotifyError {
    /// The helper process (`notify-send`, `osascript`) failed to launch or
    /// exited non-zero.
    #[error("desktop notification helper failed: {0}")]
    HelperFailed(String),
    /// No desktop notification mechanism exists on this platform.
    #[error("desktop notifications are not supported on this platform")]
    Unsupported,
}

/// Fires one desktop notification. Implementations are synchronous-process
/// wrappers, not GUI toolkit bindings — this daemon has no UI of its own.
#[async_trait::async_trait]
pub trait DesktopNotifier: Send + Sync {
    /// Show `title`/`body` to the desktop user.
    async fn notify(&self, title: &str, body: &str) -> Result<(), DesktopNotifyError>;
}

/// The notifier for the host platform this binary was compiled for.
pub fn platform_notifier() -> Box<dyn DesktopNotifier> {
    #[cfg(target_os = "linux")]
    {
        Box::new(LinuxNotifier)
    }
    #[cfg(target_os = "macos")]
    {
        Box::new(MacOsNotifier)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Box::new(UnsupportedNotifier)
    }
}

/// Linux: shells out to `notify-send`.
#[cfg(target_os = "linux")]
pub struct LinuxNotifier;

#[cfg(target_os = "linux")]
#[async_trait::async_trait]
impl DesktopNotifier for LinuxNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<(), DesktopNotifyError> {
        let status = tokio::process::Command::new("notify-send")
            .arg(title)
            .arg(body)
            .status()
            .await
            .map_err(|e| DesktopNotifyError::HelperFailed(e.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(DesktopNotifyError::HelperFailed(format!("notify-send exited with {status}")))
        }
    }
}

/// macOS: shells out to `osascript` with an escaped AppleScript
/// `display notification` literal.
#[cfg(target_os = "macos")]
pub struct MacOsNotifier;

#[cfg(target_os = "macos")]
#[async_trait::async_trait]
impl DesktopNotifier for MacOsNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<(), DesktopNotifyError> {
        let script = format!(
            "display notification \"{}\" with title \"{}\"",
            escape_applescript_literal(body),
            escape_applescript_literal(title)
        );
        let status = tokio::process::Command::new("osascript")
            .arg("-e")
            .arg(script)
            .status()
            .await
            .map_err(|e| DesktopNotifyError::HelperFailed(e.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(DesktopNotifyError::HelperFailed(format!("osascript exited with {status}")))
        }
    }
}

/// Escape a string for embedding in a double-quoted AppleScript literal.
/// Order matters: backslashes must be doubled before quotes are escaped
/// (otherwise the backslash pass would re-escape the quotes' own
/// backslashes), and newlines are replaced last since AppleScript string
/// literals cannot contain a literal line break.
#[cfg(target_os = "macos")]
fn escape_applescript_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// Every other target: a no-op that reports unsupported rather than
/// crashing the scan loop.
pub struct UnsupportedNotifier;

#[async_trait::async_trait]
impl DesktopNotifier for UnsupportedNotifier {
    async fn notify(&self, _title: &str, _body: &str) -> Result<(), DesktopNotifyError> {
        Err(DesktopNotifyError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    #[cfg(target_os = "macos")]
    #[test]
    fn applescript_escaping_order_is_backslash_then_quote_then_newline() {
        let escaped = super::escape_applescript_literal("say \"hi\\there\"\nbye");
        assert_eq!(escaped, "say \\\"hi\\\\there\\\"\\nbye");
    }

    #[tokio::test]
    async fn unsupported_notifier_reports_unsupported() {
        use super::{DesktopNotifier, UnsupportedNotifier};
        let err = UnsupportedNotifier.notify("t", "b").await.unwrap_err();
        assert!(matches!(err, super::DesktopNotifyError::Unsupported));
    }
}
