//! Webhook delivery: one compact JSON POST per notified request.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use slb_core::Request;
use uuid::Uuid;

/// Per-attempt timeout. A slow or hung endpoint must not stall the scan
/// loop past one tick.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// The compact payload POSTed to `[notifications] webhook_url`.
#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    /// Always `"pending_approval"` for the scan-triggered notification.
    pub event: &'static str,
    pub request_id: Uuid,
    pub command: String,
    pub tier: String,
    pub requestor: String,
    pub timestamp: DateTime<Utc>,
    pub project: String,
}

impl WebhookPayload {
    /// Build the payload for `request`.
    pub fn from_request(request: &Request) -> Self {
        Self {
            event: "pending_approval",
            request_id: request.id,
            command: request.command.display_redacted.clone().unwrap_or_else(|| request.command.raw.clone()),
            tier: format!("{:?}", request.risk_tier).to_lowercase(),
            requestor: request.requestor_agent.clone(),
            timestamp: Utc::now(),
            project: request.project_path.clone(),
        }
    }
}

/// Errors delivering a webhook.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The HTTP request itself failed (DNS, connect, timeout).
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The endpoint responded with a non-2xx status. Per distilled §4.9
    /// this is logged and NOT retried — the dedup key stays set, so in
    /// practice each request is attempted exactly once per process.
    #[error("webhook endpoint returned {0}")]
    NonSuccess(reqwest::StatusCode),
}

/// POST `payload` to `url`, applying [`WEBHOOK_TIMEOUT`].
pub async fn deliver(client: &reqwest::Client, url: &str, payload: &WebhookPayload) -> Result<(), WebhookError> {
    let response = client.post(url).timeout(WEBHOOK_TIMEOUT).json(payload).send().await?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(WebhookError::NonSuccess(response.status()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slb_core::entities::RiskTier;
    use slb_core::{CommandSpec, Justification};

    fn sample_request() -> Request {
        Request {
            id: Uuid::new_v4(),
            project_path: "/repo".into(),
            command: CommandSpec {
                raw: "rm -rf /tmp/x".into(),
                argv: None,
                cwd: "/repo".into(),
                shell: true,
                hash: "deadbeef".into(),
                display_redacted: None,
                contains_sensitive: false,
            },
            risk_tier: RiskTier::Dangerous,
            requestor_session_id: Uuid::new_v4(),
            requestor_agent: "claude".into(),
            requestor_model: "opus-4".into(),
            justification: Justification { reason: "cleanup".into(), expected_effect: None, goal: None, safety_argument: None },
            dry_run: false,
            attachments: vec![],
            status: slb_core::state_machine::RequestStatus::Pending,
            min_approvals: 1,
            require_different_model: false,
            execution: None,
            rollback: None,
            created_at: Utc::now(),
            resolved_at: None,
            expires_at: None,
            approval_expires_at: None,
        }
    }

    #[test]
    fn payload_prefers_redacted_display_when_present() {
        let mut request = sample_request();
        request.command.display_redacted = Some("rm -rf [REDACTED]".into());
        let payload = WebhookPayload::from_request(&request);
        assert_eq!(payload.command, "rm -rf [REDACTED]");
    }

    #[test]
    fn payload_falls_back_to_raw_command() {
        let request = sample_request();
        let payload = WebhookPayload::from_request(&request);
        assert_eq!(payload.command, "rm -rf /tmp/x");
        assert_eq!(payload.tier, "dangerous");
    }
}
