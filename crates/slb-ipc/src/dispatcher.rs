//! The notary's method table: `ping`/`status`/`notify`/`subscribe` plus
//! forwarding methods into `slb-store` and `slb-verifier`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use slb_protocol::router::{require_object_params, CallContext, Dispatcher};
use slb_protocol::{Event, RpcError, RpcErrorCode};
use slb_store::Store;
use slb_verifier::Verifier;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

/// Bounded per-subscriber event queue capacity. A slow subscriber never
/// blocks the broadcaster: `notify` uses `try_send` and drops on overflow.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 100;

struct Subscriber {
    tx: mpsc::Sender<String>,
}

/// The notary's dispatch table, shared by `slb-ipc` and (via the same
/// `Dispatcher` trait object) `slb-tcp`.
pub struct NotaryDispatcher {
    store: Arc<Store>,
    verifier: Verifier,
    started_at: Instant,
    next_subscription_id: AtomicU64,
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    /// A freshly created subscriber's receiver, parked here between the
    /// `subscribe` call returning its ack and the connection handler
    /// picking the receiver up to start streaming. Keyed by connection id
    /// since one connection subscribes at most once. The paired `u64` is
    /// that subscriber's subscription id, so the connection handler can
    /// remove it again once the connection closes.
    pending_receivers: Mutex<HashMap<u64, (u64, mpsc::Receiver<String>)>>,
}

impl NotaryDispatcher {
    /// Build a dispatcher over a shared store and verifier.
    pub fn new(store: Arc<Store>, verifier: Verifier) -> Self {
        Self {
            store,
            verifier,
            started_at: Instant::now(),
            next_subscription_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
            pending_receivers: Mutex::new(HashMap::new()),
        }
    }

    /// Take the subscription id and receiver a just-completed `subscribe`
    /// call parked for `connection_id`, if any. The connection handler
    /// calls this right after forwarding the `{subscribed: true, ...}` ack
    /// to the client, and holds onto the subscription id to remove it when
    /// the connection closes.
    pub async fn take_pending_receiver(&self, connection_id: u64) -> Option<(u64, mpsc::Receiver<String>)> {
        self.pending_receivers.lock().await.remove(&connection_id)
    }

    /// Remove a subscriber (idempotent — removing twice or removing an
    /// unknown id is not an error).
    pub async fn remove_subscriber(&self, subscription_id: u64) {
        self.subscribers.write().await.remove(&subscription_id);
    }

    /// Number of currently registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    async fn handle_ping(&self) -> Value {
        json!({"pong": true})
    }

    async fn handle_status(&self) -> Result<Value, RpcError> {
        let pending_count = self
            .store
            .list_pending_requests_all_projects()
            .await
            .map_err(|e| RpcError::from_notary_error(&e))?
            .len();
        let active_sessions = self
            .store
            .list_all_active_sessions()
            .await
            .map_err(|e| RpcError::from_notary_error(&e))?
            .len();
        Ok(json!({
            "uptime_seconds": self.started_at.elapsed().as_secs(),
            "pending_count": pending_count,
            "active_sessions": active_sessions,
            "subscribers": self.subscriber_count().await,
        }))
    }

    async fn handle_notify(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params = params.ok_or_else(|| RpcError::new(RpcErrorCode::InvalidParams, "notify requires params"))?;
        let kind = params
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::new(RpcErrorCode::InvalidParams, "notify.type is required"))?
            .to_string();
        let payload = params.get("payload").cloned().unwrap_or(Value::Null);
        let event = Event { kind, payload, time: chrono::Utc::now() };
        self.broadcast(&event).await;
        Ok(json!({"sent": true}))
    }

    /// Push `event` to every subscriber. Never blocks: a full queue drops
    /// the event for that subscriber rather than stalling the broadcaster.
    /// A subscriber whose receiver has been dropped (connection closed) is
    /// removed rather than retried on every future broadcast.
    pub async fn broadcast(&self, event: &Event) {
        let Ok(line) = serde_json::to_string(&slb_protocol::EventEnvelope { event: event.clone() }) else {
            return;
        };
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (&subscription_id, subscriber) in subscribers.iter() {
                match subscriber.tx.try_send(line.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(kind = %event.kind, "subscriber queue full, dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(subscription_id);
                    }
                }
            }
        }
        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for subscription_id in closed {
                subscribers.remove(&subscription_id);
            }
        }
    }

    async fn handle_subscribe(&self, ctx: CallContext) -> Value {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let subscription_id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().await.insert(subscription_id, Subscriber { tx });
        self.pending_receivers.lock().await.insert(ctx.connection_id, (subscription_id, rx));
        json!({"subscribed": true, "subscription_id": subscription_id})
    }

    async fn handle_create_request(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let input: requests::CreateRequestParams = parse_params(params)?;
        let request = self
            .store
            .create_request(input.into_new_request())
            .await
            .map_err(|e| RpcError::from_notary_error(&e))?;
        serde_json::to_value(request).map_err(internal_err)
    }

    async fn handle_get_request(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let input: IdParams = parse_params(params)?;
        let request = self.store.get_request(input.id).await.map_err(|e| RpcError::from_notary_error(&e))?;
        serde_json::to_value(request).map_err(internal_err)
    }

    async fn handle_list_pending_requests(&self) -> Result<Value, RpcError> {
        let requests = self
            .store
            .list_pending_requests_all_projects()
            .await
            .map_err(|e| RpcError::from_notary_error(&e))?;
        serde_json::to_value(requests).map_err(internal_err)
    }

    async fn handle_create_review(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let input: requests::CreateReviewParams = parse_params(params)?;
        let (review, status) = self
            .store
            .create_review_with_validation(input.into_new_review())
            .await
            .map_err(|e| RpcError::from_notary_error(&e))?;
        serde_json::to_value(json!({"review": review, "request_status": status})).map_err(internal_err)
    }

    async fn handle_verify_and_mark_executing(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let input: requests::ExecutorParams = parse_params(params)?;
        let result = self
            .verifier
            .verify_and_mark_executing(input.request_id, input.executor_session_id)
            .await
            .map_err(|e| RpcError::from_notary_error(&e))?;
        serde_json::to_value(result.request).map_err(internal_err)
    }

    async fn handle_mark_execution_complete(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let input: requests::MarkCompleteParams = parse_params(params)?;
        let request = self
            .verifier
            .mark_execution_complete(
                input.request_id,
                input.exit_code,
                input.success,
                &input.log_path,
                input.duration_ms,
                input.executor_session_id,
            )
            .await
            .map_err(|e| RpcError::from_notary_error(&e))?;
        serde_json::to_value(request).map_err(internal_err)
    }
}

#[async_trait]
impl Dispatcher for NotaryDispatcher {
    async fn dispatch(&self, ctx: CallContext, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        require_object_params(&params)?;
        match method {
            "ping" => Ok(self.handle_ping().await),
            "status" => self.handle_status().await,
            "notify" => self.handle_notify(params).await,
            "subscribe" => Ok(self.handle_subscribe(ctx).await),
            "create_request" => self.handle_create_request(params).await,
            "get_request" => self.handle_get_request(params).await,
            "list_pending_requests" => self.handle_list_pending_requests().await,
            "create_review" => self.handle_create_review(params).await,
            "verify_and_mark_executing" => self.handle_verify_and_mark_executing(params).await,
            "mark_execution_complete" => self.handle_mark_execution_complete(params).await,
            other => Err(RpcError::new(RpcErrorCode::MethodNotFound, format!("unknown method '{other}'"))),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    let params = params.ok_or_else(|| RpcError::new(RpcErrorCode::InvalidParams, "params required"))?;
    serde_json::from_value(params).map_err(|e| RpcError::new(RpcErrorCode::InvalidParams, e.to_string()))
}

fn internal_err(e: serde_json::Error) -> RpcError {
    RpcError::new(RpcErrorCode::InternalError, e.to_string())
}

#[derive(Debug, serde::Deserialize)]
struct IdParams {
    id: Uuid,
}

/// Param DTOs for the forwarding methods, kept close to the call sites
/// that parse them.
mod requests {
    use super::*;
    use serde::Deserialize;
    use slb_core::entities::RiskTier;
    use slb_core::{Justification, ReviewDecision};
    use slb_store::{NewRequest, NewReview};

    #[derive(Debug, Deserialize)]
    pub struct CreateRequestParams {
        pub project_path: String,
        pub raw_command: String,
        #[serde(default)]
        pub argv: Option<Vec<String>>,
        pub cwd: String,
        #[serde(default)]
        pub shell: bool,
        #[serde(default)]
        pub display_redacted: Option<String>,
        #[serde(default)]
        pub contains_sensitive: bool,
        pub risk_tier: RiskTier,
        pub requestor_session_id: Uuid,
        pub requestor_agent: String,
        pub requestor_model: String,
        pub justification: Justification,
        #[serde(default)]
        pub dry_run: bool,
        #[serde(default)]
        pub require_different_model: bool,
        #[serde(default)]
        pub min_approvals: Option<u32>,
    }

    impl CreateRequestParams {
        pub fn into_new_request(self) -> NewRequest {
            NewRequest {
                project_path: self.project_path,
                raw_command: self.raw_command,
                argv: self.argv,
                cwd: self.cwd,
                shell: self.shell,
                display_redacted: self.display_redacted,
                contains_sensitive: self.contains_sensitive,
                risk_tier: self.risk_tier,
                requestor_session_id: self.requestor_session_id,
                requestor_agent: self.requestor_agent,
                requestor_model: self.requestor_model,
                justification: self.justification,
                dry_run: self.dry_run,
                attachments: Vec::new(),
                require_different_model: self.require_different_model,
                min_approvals: self.min_approvals,
            }
        }
    }

    #[derive(Debug, Deserialize)]
    pub struct CreateReviewParams {
        pub request_id: Uuid,
        pub reviewer_session_id: Uuid,
        pub reviewer_agent: String,
        pub reviewer_model: String,
        pub decision: ReviewDecision,
        pub signature: String,
        pub signature_timestamp: chrono::DateTime<chrono::Utc>,
        #[serde(default)]
        pub comments: Option<String>,
    }

    impl CreateReviewParams {
        pub fn into_new_review(self) -> NewReview {
            NewReview {
                request_id: self.request_id,
                reviewer_session_id: self.reviewer_session_id,
                reviewer_agent: self.reviewer_agent,
                reviewer_model: self.reviewer_model,
                decision: self.decision,
                signature: self.signature,
                signature_timestamp: self.signature_timestamp,
                responses: Vec::new(),
                comments: self.comments,
            }
        }
    }

    #[derive(Debug, Deserialize)]
    pub struct ExecutorParams {
        pub request_id: Uuid,
        pub executor_session_id: Uuid,
    }

    #[derive(Debug, Deserialize)]
    pub struct MarkCompleteParams {
        pub request_id: Uuid,
        pub exit_code: i32,
        pub success: bool,
        pub log_path: String,
        pub duration_ms: u64,
        pub executor_session_id: Uuid,
    }
}
