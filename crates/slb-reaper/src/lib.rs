//! Timeout reaper: a single periodic task that expires stale pending
//! requests.
//!
//! Uses a `Running`/`Stopped` guard flag protecting against a double
//! `start`: [`ReaperHandle::start`] fails
//! fast with [`ReaperError::AlreadyRunning`] on a handle that already owns a
//! ticking task, and [`ReaperHandle::stop`] blocks until that task has
//! actually exited rather than merely signaling it to.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slb_core::state_machine::RequestStatus;
use slb_core::entities::RiskTier;
use slb_store::Store;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Default interval between expiry sweeps.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// What the reaper does with a pending request past `expires_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutAction {
    /// Transition to `timeout`, then `escalated` — surface to a human, no
    /// execution occurs. The default.
    #[default]
    Escalate,
    /// Transition directly to `timeout` (treated as a terminal reject).
    AutoReject,
    /// If `risk_tier == caution`, auto-approve; otherwise escalate as a
    /// safety override.
    AutoApproveWarn,
}

impl FromStr for TimeoutAction {
    type Err = std::convert::Infallible;

    /// Unknown values default to [`TimeoutAction::Escalate`], matching
    /// `slb-config`'s own normalization of `[general] timeout_action`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "auto_reject" => Self::AutoReject,
            "auto_approve_warn" => Self::AutoApproveWarn,
            _ => Self::Escalate,
        })
    }
}

/// Errors from starting or stopping the reaper.
#[derive(Debug, thiserror::Error)]
pub enum ReaperError {
    /// [`ReaperHandle::start`] was called on a handle that is already
    /// running.
    #[error("reaper is already running")]
    AlreadyRunning,
}

struct RunningReaper {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

/// Owns the reaper's ticking task. `Clone`-free by design: one handle, one
/// task, matching distilled §4.5's "single goroutine-like task".
pub struct ReaperHandle {
    running: Mutex<Option<RunningReaper>>,
}

impl ReaperHandle {
    /// Build an idle handle. Call [`ReaperHandle::start`] to begin ticking.
    pub fn new() -> Self {
        Self { running: Mutex::new(None) }
    }

    /// Start the ticking task against `store`, sweeping every
    /// `check_interval` and applying `action` to each expired request.
    ///
    /// Fails fast with [`ReaperError::AlreadyRunning`] if already started.
    pub fn start(&self, store: Arc<Store>, check_interval: Duration, action: TimeoutAction) -> Result<(), ReaperError> {
        let mut guard = self.running.lock().expect("reaper mutex poisoned");
        if guard.is_some() {
            return Err(ReaperError::AlreadyRunning);
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = sweep_once(&store, action).await {
                            tracing::warn!(error = %e, "timeout sweep failed");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("timeout reaper stopping");
                        break;
                    }
                }
            }
        });

        *guard = Some(RunningReaper { shutdown_tx, join });
        Ok(())
    }

    /// Signal the ticking task to stop and block until it has exited.
    ///
    /// A no-op (not an error) if the reaper is not currently running, since
    /// callers that race a shutdown against a never-started reaper
    /// shouldn't need to special-case it.
    pub async fn stop(&self) {
        let running = { self.running.lock().expect("reaper mutex poisoned").take() };
        if let Some(running) = running {
            let _ = running.shutdown_tx.send(());
            let _ = running.join.await;
        }
    }

    /// `true` if a ticking task currently owns this handle.
    pub fn is_running(&self) -> bool {
        self.running.lock().expect("reaper mutex poisoned").is_some()
    }
}

impl Default for ReaperHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// One sweep: find expired pending requests and apply `action` to each.
/// Exposed for tests and for callers that want an out-of-band sweep (e.g.
/// a CLI `slb reap-now` debug command) without starting the ticker.
pub async fn sweep_once(store: &Store, action: TimeoutAction) -> Result<usize, slb_store::StoreError> {
    let expired = store.find_expired_requests().await?;
    let mut count = 0;
    for request in expired {
        apply_action(store, request, action).await?;
        count += 1;
    }
    Ok(count)
}

async fn apply_action(store: &Store, request: slb_core::Request, action: TimeoutAction) -> Result<(), slb_store::StoreError> {
    match action {
        TimeoutAction::Escalate => {
            store.update_request_status(request.id, RequestStatus::Timeout).await?;
            store.update_request_status(request.id, RequestStatus::Escalated).await?;
        }
        TimeoutAction::AutoReject => {
            store.update_request_status(request.id, RequestStatus::Timeout).await?;
            store.update_request_status(request.id, RequestStatus::Rejected).await?;
        }
        TimeoutAction::AutoApproveWarn => {
            if request.risk_tier == RiskTier::Caution {
                store.update_request_status(request.id, RequestStatus::Approved).await?;
            } else {
                store.update_request_status(request.id, RequestStatus::Timeout).await?;
                store.update_request_status(request.id, RequestStatus::Escalated).await?;
            }
        }
    }
    Ok(())
}
