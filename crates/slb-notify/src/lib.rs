//! Desktop and webhook notifications for pending critical/dangerous
//! requests.
//!
//! A periodic scan task (shaped like `slb-reaper`'s ticking task) finds
//! pending critical/dangerous requests older than `desktop_delay_seconds`
//! and, per request, fires at most one desktop notification (critical
//! tier only) and one webhook POST. Dedup is in-memory and resets on
//! daemon restart.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Platform desktop-notification dispatch.
pub mod desktop;
/// Webhook payload and delivery.
pub mod webhook;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use slb_core::entities::RiskTier;
use slb_store::Store;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use desktop::{platform_notifier, DesktopNotifier, DesktopNotifyError};
pub use webhook::{deliver, WebhookError, WebhookPayload};

/// Default interval between scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// Which side of the per-request dedup a notification fired on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyKind {
    /// A desktop notification (fired once, critical tier only).
    Desktop,
    /// A webhook POST (fired once, critical or dangerous tier).
    Webhook,
}

/// Errors starting or stopping the notifier.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    /// [`NotifierHandle::start`] was called on a handle that is already
    /// running.
    #[error("notifier is already running")]
    AlreadyRunning,
}

struct RunningNotifier {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

/// Configuration for one scan task.
pub struct NotifierConfig {
    /// How often to scan for eligible pending requests.
    pub scan_interval: Duration,
    /// How long a critical/dangerous request must sit pending before it
    /// becomes eligible.
    pub desktop_delay: Duration,
    /// Whether desktop notifications are enabled at all.
    pub desktop_enabled: bool,
    /// Optional webhook endpoint.
    pub webhook_url: Option<String>,
}

/// Owns the notifier's ticking task, mirroring `slb-reaper`'s
/// `ReaperHandle` start/stop guard.
pub struct NotifierHandle {
    running: Mutex<Option<RunningNotifier>>,
}

impl NotifierHandle {
    /// Build an idle handle.
    pub fn new() -> Self {
        Self { running: Mutex::new(None) }
    }

    /// Start the ticking task.
    pub fn start(
        &self,
        store: Arc<Store>,
        desktop_notifier: Arc<dyn DesktopNotifier>,
        http_client: reqwest::Client,
        config: NotifierConfig,
    ) -> Result<(), NotifierError> {
        let mut guard = self.running.lock().expect("notifier mutex poisoned");
        if guard.is_some() {
            return Err(NotifierError::AlreadyRunning);
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.scan_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut sent = HashSet::<(NotifyKind, Uuid)>::new();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = scan_once(&store, desktop_notifier.as_ref(), &http_client, &config, &mut sent).await {
                            tracing::warn!(error = %e, "notification scan failed");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("notifier stopping");
                        break;
                    }
                }
            }
        });

        *guard = Some(RunningNotifier { shutdown_tx, join });
        Ok(())
    }

    /// Signal the ticking task to stop and block until it exits. A no-op
    /// if not currently running.
    pub async fn stop(&self) {
        let running = { self.running.lock().expect("notifier mutex poisoned").take() };
        if let Some(running) = running {
            let _ = running.shutdown_tx.send(());
            let _ = running.join.await;
        }
    }

    /// `true` if a ticking task currently owns this handle.
    pub fn is_running(&self) -> bool {
        self.running.lock().expect("notifier mutex poisoned").is_some()
    }
}

impl Default for NotifierHandle {
    fn default() -> Self {
        Self::new()
    }
}

async fn scan_once(
    store: &Store,
    desktop_notifier: &dyn DesktopNotifier,
    http_client: &reqwest::Client,
    config: &NotifierConfig,
    sent: &mut HashSet<(NotifyKind, Uuid)>,
) -> Result<(), slb_store::StoreError> {
    let now = Utc::now();
    let pending = store.list_pending_requests_all_projects().await?;

    for request in pending {
        if !matches!(request.risk_tier, RiskTier::Critical | RiskTier::Dangerous) {
            continue;
        }
        let age = now.signed_duration_since(request.created_at);
        if age.to_std().unwrap_or(Duration::ZERO) < config.desktop_delay {
            continue;
        }

        if config.desktop_enabled && request.risk_tier == RiskTier::Critical && sent.insert((NotifyKind::Desktop, request.id)) {
            let title = "Command notary: approval needed";
            let body = format!("{} is waiting on {}", request.requestor_agent, request.command.display_redacted.as_deref().unwrap_or(&request.command.raw));
            if let Err(e) = desktop_notifier.notify(title, &body).await {
                tracing::warn!(request_id = %request.id, error = %e, "desktop notification failed");
            }
        }

        if let Some(url) = &config.webhook_url {
            if sent.insert((NotifyKind::Webhook, request.id)) {
                let payload = WebhookPayload::from_request(&request);
                if let Err(e) = deliver(http_client, url, &payload).await {
                    tracing::warn!(request_id = %request.id, error = %e, "webhook delivery failed");
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slb_core::Justification;
    use slb_store::requests::NewRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNotifier {
        count: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DesktopNotifier for CountingNotifier {
        async fn notify(&self, _title: &str, _body: &str) -> Result<(), DesktopNotifyError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn store_with_critical_request() -> (tempfile::TempDir, Arc<Store>, Uuid) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("state.db")).unwrap());
        let session = store.create_session("claude", "claude-code", "opus-4", "/repo").await.unwrap();
        let request = store
            .create_request(NewRequest {
                project_path: "/repo".into(),
                raw_command: "rm -rf /".into(),
                argv: None,
                cwd: "/repo".into(),
                shell: true,
                display_redacted: None,
                contains_sensitive: false,
                risk_tier: RiskTier::Critical,
                requestor_session_id: session.id,
                requestor_agent: "claude".into(),
                requestor_model: "opus-4".into(),
                justification: Justification { reason: "test".into(), expected_effect: None, goal: None, safety_argument: None },
                dry_run: false,
                attachments: vec![],
                require_different_model: false,
                min_approvals: Some(0),
            })
            .await
            .unwrap();
        (dir, store, request.id)
    }

    #[tokio::test]
    async fn scan_notifies_once_per_request_even_across_multiple_scans() {
        let (_dir, store, _id) = store_with_critical_request().await;
        let notifier = Arc::new(CountingNotifier { count: AtomicUsize::new(0) });
        let config = NotifierConfig {
            scan_interval: Duration::from_secs(3600),
            desktop_delay: Duration::from_secs(0),
            desktop_enabled: true,
            webhook_url: None,
        };
        let mut sent = HashSet::new();
        let client = reqwest::Client::new();

        scan_once(&store, notifier.as_ref(), &client, &config, &mut sent).await.unwrap();
        scan_once(&store, notifier.as_ref(), &client, &config, &mut sent).await.unwrap();

        assert_eq!(notifier.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn desktop_notification_skipped_when_disabled() {
        let (_dir, store, _id) = store_with_critical_request().await;
        let notifier = Arc::new(CountingNotifier { count: AtomicUsize::new(0) });
        let config = NotifierConfig {
            scan_interval: Duration::from_secs(3600),
            desktop_delay: Duration::from_secs(0),
            desktop_enabled: false,
            webhook_url: None,
        };
        let mut sent = HashSet::new();
        let client = reqwest::Client::new();

        scan_once(&store, notifier.as_ref(), &client, &config, &mut sent).await.unwrap();
        assert_eq!(notifier.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn requests_younger_than_the_delay_are_skipped() {
        let (_dir, store, _id) = store_with_critical_request().await;
        let notifier = Arc::new(CountingNotifier { count: AtomicUsize::new(0) });
        let config = NotifierConfig {
            scan_interval: Duration::from_secs(3600),
            desktop_delay: Duration::from_secs(3600),
            desktop_enabled: true,
            webhook_url: None,
        };
        let mut sent = HashSet::new();
        let client = reqwest::Client::new();

        scan_once(&store, notifier.as_ref(), &client, &config, &mut sent).await.unwrap();
        assert_eq!(notifier.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn start_twice_fails_with_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("state.db")).unwrap());
        let handle = NotifierHandle::new();
        let config = NotifierConfig {
            scan_interval: Duration::from_secs(3600),
            desktop_delay: Duration::from_secs(60),
            desktop_enabled: true,
            webhook_url: None,
        };
        let notifier: Arc<dyn DesktopNotifier> = Arc::new(CountingNotifier { count: AtomicUsize::new(0) });
        handle.start(store.clone(), notifier.clone(), reqwest::Client::new(), config).unwrap();
        let config2 = NotifierConfig {
            scan_interval: Duration::from_secs(3600),
            desktop_delay: Duration::from_secs(60),
            desktop_enabled: true,
            webhook_url: None,
        };
        let err = handle.start(store, notifier, reqwest::Client::new(), config2).unwrap_err();
        assert!(matches!(err, NotifierError::AlreadyRunning));
        handle.stop().await;
    }
}
