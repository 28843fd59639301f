//! Execution-authorization gate.
//!
//! The atomic check-then-transition lives in `slb-store`, inside the single
//! SQLite transaction that the write-mutex already serializes — this crate
//! exists as its own boundary per the component design, but holds no SQL of
//! its own. It is the thing `slb-ipc`/`slb-tcp` call so the RPC layer never
//! touches `slb-store` directly for execution authorization.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use slb_core::Request;
use slb_store::{Store, StoreError, VerificationResult};
use uuid::Uuid;

/// Thin wrapper over a [`Store`] exposing the execution-authorization
/// surface. Cheap to clone (an `Arc` underneath).
#[derive(Clone)]
pub struct Verifier {
    store: Arc<Store>,
}

impl Verifier {
    /// Build a verifier over a shared [`Store`].
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Check, without mutating, whether `request_id` may currently be
    /// executed by `executor_session_id`.
    pub async fn verify_execution_allowed(&self, request_id: Uuid) -> Result<VerificationResult, StoreError> {
        self.store.verify_execution_allowed(request_id).await
    }

    /// The atomic gate: `approved -> executing` for exactly one racing
    /// caller. Losers see [`slb_error::ErrorCode::InvalidTransition`].
    pub async fn verify_and_mark_executing(
        &self,
        request_id: Uuid,
        executor_session_id: Uuid,
    ) -> Result<VerificationResult, StoreError> {
        let result = self.store.verify_and_mark_executing(request_id, executor_session_id).await;
        match &result {
            Ok(_) => tracing::info!(request_id = %request_id, executor_session_id = %executor_session_id, "execution authorized"),
            Err(e) => tracing::debug!(request_id = %request_id, error = %e, "execution not authorized"),
        }
        result
    }

    /// Transition `executing -> executed` or `executing -> execution_failed`
    /// and record the execution detail (log path, exit code, duration).
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_execution_complete(
        &self,
        request_id: Uuid,
        exit_code: i32,
        success: bool,
        log_path: &str,
        duration_ms: u64,
        executor_session_id: Uuid,
    ) -> Result<Request, StoreError> {
        self.store
            .mark_execution_complete(request_id, exit_code, success, log_path, duration_ms, executor_session_id)
            .await
    }

    /// Operational helper that attempts to reopen an executing request.
    /// Always fails with `InvalidTransition`: the state machine does not
    /// allow `executing -> approved` or `executing -> timeout` (see this
    /// repository's design notes, Open Question #1).
    pub async fn revert_executing_on_failure(&self, request_id: Uuid) -> Result<Request, StoreError> {
        self.store.revert_executing_on_failure(request_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slb_core::entities::RiskTier;
    use slb_core::state_machine::RequestStatus;
    use slb_core::Justification;
    use slb_store::requests::NewRequest;

    async fn verifier_with_approved_request() -> (Verifier, Uuid, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("state.db")).unwrap();
        let store = Arc::new(store);
        let session = store.create_session("claude", "claude-code", "opus-4", "/repo").await.unwrap();
        let request = store
            .create_request(NewRequest {
                project_path: "/repo".into(),
                raw_command: "echo hi".into(),
                argv: None,
                cwd: "/repo".into(),
                shell: true,
                display_redacted: None,
                contains_sensitive: false,
                risk_tier: RiskTier::Caution,
                requestor_session_id: session.id,
                requestor_agent: "claude".into(),
                requestor_model: "opus-4".into(),
                justification: Justification {
                    reason: "test".into(),
                    expected_effect: None,
                    goal: None,
                    safety_argument: None,
                },
                dry_run: false,
                attachments: vec![],
                require_different_model: false,
                min_approvals: Some(0),
            })
            .await
            .unwrap();
        store.update_request_status(request.id, RequestStatus::Approved).await.unwrap();
        (Verifier::new(store), request.id, dir)
    }

    #[tokio::test]
    async fn verify_and_mark_executing_gates_exactly_one_winner() {
        let (verifier, request_id, _dir) = verifier_with_approved_request().await;
        let executor = Uuid::new_v4();

        let result = verifier.verify_and_mark_executing(request_id, executor).await.unwrap();
        assert_eq!(result.request.status, RequestStatus::Executing);

        let err = verifier.verify_and_mark_executing(request_id, executor).await.unwrap_err();
        assert_eq!(err.code, slb_error::ErrorCode::InvalidTransition);
    }

    #[tokio::test]
    async fn mark_execution_complete_records_detail() {
        let (verifier, request_id, _dir) = verifier_with_approved_request().await;
        let executor = Uuid::new_v4();
        verifier.verify_and_mark_executing(request_id, executor).await.unwrap();

        let request = verifier
            .mark_execution_complete(request_id, 0, true, "/tmp/log", 12, executor)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Executed);
        assert_eq!(request.execution.unwrap().exit_code, Some(0));
    }

    #[tokio::test]
    async fn revert_executing_on_failure_is_a_documented_dead_end() {
        let (verifier, request_id, _dir) = verifier_with_approved_request().await;
        verifier.verify_and_mark_executing(request_id, Uuid::new_v4()).await.unwrap();

        let err = verifier.revert_executing_on_failure(request_id).await.unwrap_err();
        assert_eq!(err.code, slb_error::ErrorCode::InvalidTransition);
    }
}
