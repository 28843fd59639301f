//! The execution-authorization gate.
//!
//! `slb-verifier` is a thin crate over these methods: the atomic
//! check-then-transition happens here, inside one write-mutex-guarded
//! SQLite transaction, because only the Store holds the connection that
//! transaction needs. `slb-verifier` exists as its own crate boundary per
//! the component design, but carries no SQL of its own.

use chrono::Utc;
use rusqlite::Connection;
use slb_core::state_machine::RequestStatus;
use slb_core::Request;
use slb_error::ErrorCode;
use uuid::Uuid;

use crate::requests::fetch_request;
use crate::rows::VerificationResult;
use crate::{map_sqlite_err, Store, StoreError};

impl Store {
    /// Check (without mutating) whether `request_id` may be executed:
    /// status must be `approved`, `approval_expires_at` must be present
    /// and in the future, and the approval count must meet `min_approvals`.
    pub async fn verify_execution_allowed(&self, request_id: Uuid) -> Result<VerificationResult, StoreError> {
        let conn = self.readers.checkout().await?;
        check_execution_allowed(&*conn, request_id)
    }

    /// The atomic gate: inside one write transaction, perform the checks
    /// of [`Store::verify_execution_allowed`] and, if permitted, transition
    /// `approved -> executing` via the optimistic predicate. A losing
    /// racer sees [`ErrorCode::InvalidTransition`]; the winner proceeds.
    pub async fn verify_and_mark_executing(&self, request_id: Uuid, _executor_session_id: Uuid) -> Result<VerificationResult, StoreError> {
        let conn = self.writer.lock().await;
        let tx = conn.unchecked_transaction().map_err(map_sqlite_err)?;

        let result = check_execution_allowed(&*tx, request_id)?;

        let changed = tx
            .execute(
                "UPDATE requests SET status = 'executing' WHERE id = ?1 AND status = 'approved'",
                rusqlite::params![request_id.to_string()],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(StoreError::new(
                ErrorCode::InvalidTransition,
                "request is no longer approved (lost the race to another executor)",
            ));
        }

        let request = fetch_request(&*tx, request_id)?;
        tx.commit().map_err(map_sqlite_err)?;

        Ok(VerificationResult { request, ..result })
    }

    /// Transition `executing -> executed` on success or `executing ->
    /// execution_failed` otherwise, then (separately, idempotently) record
    /// the execution detail.
    pub async fn mark_execution_complete(
        &self,
        request_id: Uuid,
        exit_code: i32,
        success: bool,
        log_path: &str,
        duration_ms: u64,
        executor_session_id: Uuid,
    ) -> Result<Request, StoreError> {
        let to = if success { RequestStatus::Executed } else { RequestStatus::ExecutionFailed };
        let request = self.update_request_status(request_id, to).await?;
        self.update_request_execution(request_id, log_path, exit_code, duration_ms, executor_session_id)
            .await?;
        Ok(Request { execution: self.get_request(request_id).await?.execution, ..request })
    }

    /// Operational helper that attempts to reopen an executing request.
    /// The state machine does not allow `executing -> approved` or
    /// `executing -> timeout`, so this always returns
    /// [`ErrorCode::InvalidTransition`] — a documented dead end rather
    /// than a removed feature (see this repository's design notes).
    pub async fn revert_executing_on_failure(&self, request_id: Uuid) -> Result<Request, StoreError> {
        self.update_request_status(request_id, RequestStatus::Approved).await
    }
}

fn check_execution_allowed(conn: &Connection, request_id: Uuid) -> Result<VerificationResult, StoreError> {
    let request = fetch_request(conn, request_id)?;

    if request.status != RequestStatus::Approved {
        return Err(StoreError::new(
            ErrorCode::ExecutionNotAllowed,
            format!("request is not approved (currently {})", request.status),
        ));
    }

    let approval_expires_at = request
        .approval_expires_at
        .ok_or_else(|| StoreError::new(ErrorCode::ApprovalExpired, "approval_expires_at is not set"))?;

    let ttl = (approval_expires_at - Utc::now()).num_seconds();
    if ttl <= 0 {
        return Err(StoreError::new(ErrorCode::ApprovalExpired, "approval has expired"));
    }

    let approvals: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM reviews WHERE request_id = ?1 AND decision = 'approve'",
            rusqlite::params![request_id.to_string()],
            |row| row.get(0),
        )
        .map_err(map_sqlite_err)?;
    if (approvals as u32) < request.min_approvals {
        return Err(StoreError::new(ErrorCode::InsufficientApprovals, "insufficient approvals"));
    }

    Ok(VerificationResult { request, approval_ttl_secs: ttl })
}
