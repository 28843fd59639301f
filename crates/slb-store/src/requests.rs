//! Request CRUD, full-text search, and status transitions.

use chrono::Utc;
use rusqlite::{params, Connection};
use slb_core::entities::{Attachment, CommandSpec, Justification, RiskTier};
use slb_core::state_machine::{can_transition, RequestStatus};
use slb_core::{Request, DEFAULT_REQUEST_TTL_SECS};
use slb_error::ErrorCode;
use uuid::Uuid;

use crate::rows::request_from_row;
use crate::{map_sqlite_err, not_found, Store, StoreError};

/// Everything the caller must supply to create a request; defaults
/// (`hash`, `min_approvals`, `expires_at`) are filled in by the Store.
pub struct NewRequest {
    pub project_path: String,
    pub raw_command: String,
    pub argv: Option<Vec<String>>,
    pub cwd: String,
    pub shell: bool,
    pub display_redacted: Option<String>,
    pub contains_sensitive: bool,
    pub risk_tier: RiskTier,
    pub requestor_session_id: Uuid,
    pub requestor_agent: String,
    pub requestor_model: String,
    pub justification: Justification,
    pub dry_run: bool,
    pub attachments: Vec<Attachment>,
    pub require_different_model: bool,
    /// Override the tier-derived default, if the caller has a policy reason to.
    pub min_approvals: Option<u32>,
}

impl Store {
    /// Insert a new request, computing its command hash, default
    /// `min_approvals`, and `expires_at` (`created_at + 30min`) if absent.
    pub async fn create_request(&self, input: NewRequest) -> Result<Request, StoreError> {
        let now = Utc::now();
        let command = CommandSpec::new(input.raw_command, input.argv, input.cwd, input.shell);
        let min_approvals = input
            .min_approvals
            .unwrap_or_else(|| Request::default_min_approvals(input.risk_tier));

        let request = Request {
            id: Uuid::new_v4(),
            project_path: input.project_path,
            command: CommandSpec {
                display_redacted: input.display_redacted,
                contains_sensitive: input.contains_sensitive,
                ..command
            },
            risk_tier: input.risk_tier,
            requestor_session_id: input.requestor_session_id,
            requestor_agent: input.requestor_agent,
            requestor_model: input.requestor_model,
            justification: input.justification,
            dry_run: input.dry_run,
            attachments: input.attachments,
            status: RequestStatus::Pending,
            min_approvals,
            require_different_model: input.require_different_model,
            execution: None,
            rollback: None,
            created_at: now,
            resolved_at: None,
            expires_at: Some(now + chrono::Duration::seconds(DEFAULT_REQUEST_TTL_SECS)),
            approval_expires_at: None,
        };

        let conn = self.writer.lock().await;
        insert_request(&*conn, &request).map_err(map_sqlite_err)?;
        Ok(request)
    }

    /// Fetch one request by id.
    pub async fn get_request(&self, id: Uuid) -> Result<Request, StoreError> {
        let conn = self.readers.checkout().await?;
        fetch_request(&*conn, id)
    }

    /// Fetch a request plus every review filed against it.
    pub async fn get_request_with_reviews(&self, id: Uuid) -> Result<(Request, Vec<slb_core::Review>), StoreError> {
        let request = self.get_request(id).await?;
        let reviews = self.list_reviews_for_request(id).await?;
        Ok((request, reviews))
    }

    /// Pending requests in one project, oldest first.
    pub async fn list_pending_requests(&self, project_path: &str) -> Result<Vec<Request>, StoreError> {
        let conn = self.readers.checkout().await?;
        query_requests(
            &*conn,
            "SELECT * FROM requests WHERE project_path = ?1 AND status = 'pending' ORDER BY created_at",
            params![project_path],
        )
    }

    /// Pending requests across a caller-chosen set of projects.
    pub async fn list_pending_requests_by_projects(&self, project_paths: &[String]) -> Result<Vec<Request>, StoreError> {
        if project_paths.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.readers.checkout().await?;
        let placeholders = project_paths.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT * FROM requests WHERE status = 'pending' AND project_path IN ({placeholders}) ORDER BY created_at"
        );
        let mut stmt = conn.prepare(&sql).map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(project_paths.iter()), request_from_row)
            .map_err(map_sqlite_err)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite_err)?
            .into_iter()
            .map(|r| r.into_request())
            .collect()
    }

    /// Pending requests across every project.
    pub async fn list_pending_requests_all_projects(&self) -> Result<Vec<Request>, StoreError> {
        let conn = self.readers.checkout().await?;
        query_requests(&*conn, "SELECT * FROM requests WHERE status = 'pending' ORDER BY created_at", [])
    }

    /// All requests with a given status, oldest first.
    pub async fn list_requests_by_status(&self, status: RequestStatus) -> Result<Vec<Request>, StoreError> {
        let conn = self.readers.checkout().await?;
        query_requests(
            &*conn,
            "SELECT * FROM requests WHERE status = ?1 ORDER BY created_at",
            params![status.to_string()],
        )
    }

    /// Every request ever created, oldest first.
    pub async fn list_all_requests(&self) -> Result<Vec<Request>, StoreError> {
        let conn = self.readers.checkout().await?;
        query_requests(&*conn, "SELECT * FROM requests ORDER BY created_at", [])
    }

    /// Full-text search over command text, justification fields,
    /// requestor agent, and status, via the `requests_fts` mirror.
    pub async fn search_requests(&self, query: &str) -> Result<Vec<Request>, StoreError> {
        let conn = self.readers.checkout().await?;
        let mut stmt = conn
            .prepare(
                "SELECT r.* FROM requests r
                 JOIN requests_fts f ON f.rowid = r.rowid
                 WHERE requests_fts MATCH ?1
                 ORDER BY rank",
            )
            .map_err(map_sqlite_err)?;
        let rows = stmt.query_map(params![query], request_from_row).map_err(map_sqlite_err)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite_err)?
            .into_iter()
            .map(|r| r.into_request())
            .collect()
    }

    /// Pending requests whose `expires_at` has already passed — the
    /// reaper's input set.
    pub async fn find_expired_requests(&self) -> Result<Vec<Request>, StoreError> {
        let conn = self.readers.checkout().await?;
        query_requests(
            &*conn,
            "SELECT * FROM requests WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at < ?1 ORDER BY expires_at",
            params![Utc::now().to_rfc3339()],
        )
    }

    /// Transition a request's status, enforcing [`can_transition`] and the
    /// optimistic `WHERE id = ? AND status = ?` predicate. Stamps
    /// `resolved_at` when `to` is terminal, and `approval_expires_at` when
    /// transitioning into `Approved`.
    pub async fn update_request_status(&self, id: Uuid, to: RequestStatus) -> Result<Request, StoreError> {
        let conn = self.writer.lock().await;
        update_request_status_inner(&*conn, id, to)
    }

    /// Same as [`Store::update_request_status`], for use from within a
    /// caller-held writer lock (e.g. `slb-verifier`'s atomic gate, or
    /// `CreateReviewWithValidation`'s quorum transition).
    pub(crate) fn update_request_status_tx(conn: &Connection, id: Uuid, to: RequestStatus) -> Result<Request, StoreError> {
        update_request_status_inner(conn, id, to)
    }

    /// Record the outcome of execution: log path, exit code, duration,
    /// executor identity, and timestamp. Independent of (and idempotent
    /// with respect to) the status transition itself.
    pub async fn update_request_execution(
        &self,
        id: Uuid,
        log_path: &str,
        exit_code: i32,
        duration_ms: u64,
        executor_session_id: Uuid,
    ) -> Result<(), StoreError> {
        let conn = self.writer.lock().await;
        let changed = conn
            .execute(
                "UPDATE requests SET execution_log_path = ?1, execution_exit_code = ?2,
                 execution_duration_ms = ?3, execution_executor_session_id = ?4, execution_executed_at = ?5
                 WHERE id = ?6",
                params![
                    log_path,
                    exit_code,
                    duration_ms as i64,
                    executor_session_id.to_string(),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                ],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(not_found(ErrorCode::RequestNotFound, "request", id));
        }
        Ok(())
    }

    /// Record where rollback state was captured before execution.
    pub async fn update_request_rollback_path(&self, id: Uuid, captured_state_path: &str) -> Result<(), StoreError> {
        let conn = self.writer.lock().await;
        let changed = conn
            .execute(
                "UPDATE requests SET rollback_captured_state_path = ?1 WHERE id = ?2",
                params![captured_state_path, id.to_string()],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(not_found(ErrorCode::RequestNotFound, "request", id));
        }
        Ok(())
    }

    /// Stamp when a rollback actually happened.
    pub async fn update_request_rolled_back_at(&self, id: Uuid) -> Result<(), StoreError> {
        let conn = self.writer.lock().await;
        let changed = conn
            .execute(
                "UPDATE requests SET rollback_rolled_back_at = ?1 WHERE id = ?2 AND rollback_captured_state_path IS NOT NULL",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(not_found(ErrorCode::RequestNotFound, "request with captured rollback state", id));
        }
        Ok(())
    }
}

fn update_request_status_inner(conn: &Connection, id: Uuid, to: RequestStatus) -> Result<Request, StoreError> {
    let current = fetch_request(conn, id)?;

    if !can_transition(current.status, to) {
        return Err(StoreError::new(
            ErrorCode::InvalidTransition,
            format!("{} -> {to} is not a legal transition", current.status),
        ));
    }

    let now = Utc::now();
    let resolved_at = to.is_terminal().then_some(now);
    let approval_expires_at = if matches!(to, RequestStatus::Approved) {
        Some(now + chrono::Duration::seconds(slb_core::DEFAULT_REQUEST_TTL_SECS))
    } else {
        current.approval_expires_at
    };

    let changed = conn
        .execute(
            "UPDATE requests SET status = ?1, resolved_at = ?2, approval_expires_at = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                to.to_string(),
                resolved_at.map(|d: chrono::DateTime<Utc>| d.to_rfc3339()),
                approval_expires_at.map(|d: chrono::DateTime<Utc>| d.to_rfc3339()),
                id.to_string(),
                current.status.to_string(),
            ],
        )
        .map_err(map_sqlite_err)?;

    if changed == 0 {
        // Lost a race against a concurrent writer between the read above
        // and this UPDATE.
        return Err(StoreError::new(
            ErrorCode::InvalidTransition,
            format!("concurrent update: request {id} was no longer in status {}", current.status),
        ));
    }

    fetch_request(conn, id)
}

pub(crate) fn fetch_request(conn: &Connection, id: Uuid) -> Result<Request, StoreError> {
    conn.query_row("SELECT * FROM requests WHERE id = ?1", params![id.to_string()], request_from_row)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => not_found(ErrorCode::RequestNotFound, "request", id),
            other => map_sqlite_err(other),
        })?
        .into_request()
}

fn query_requests<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Request>, StoreError> {
    let mut stmt = conn.prepare(sql).map_err(map_sqlite_err)?;
    let rows = stmt.query_map(params, request_from_row).map_err(map_sqlite_err)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(map_sqlite_err)?
        .into_iter()
        .map(|r| r.into_request())
        .collect()
}

fn insert_request(conn: &Connection, r: &Request) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO requests (
            id, project_path, command_raw, command_argv, command_cwd, command_shell, command_hash,
            command_display_redacted, command_contains_sensitive, risk_tier, requestor_session_id,
            requestor_agent, requestor_model, justification_reason, justification_expected_effect,
            justification_goal, justification_safety_argument, dry_run, attachments, status,
            min_approvals, require_different_model, created_at, resolved_at, expires_at, approval_expires_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26
        )",
        params![
            r.id.to_string(),
            r.project_path,
            r.command.raw,
            r.command.argv.as_ref().map(|a| serde_json::to_string(a).unwrap()),
            r.command.cwd,
            r.command.shell,
            r.command.hash,
            r.command.display_redacted,
            r.command.contains_sensitive,
            risk_tier_str(r.risk_tier),
            r.requestor_session_id.to_string(),
            r.requestor_agent,
            r.requestor_model,
            r.justification.reason,
            r.justification.expected_effect,
            r.justification.goal,
            r.justification.safety_argument,
            r.dry_run,
            (!r.attachments.is_empty()).then(|| serde_json::to_string(&r.attachments).unwrap()),
            r.status.to_string(),
            r.min_approvals,
            r.require_different_model,
            r.created_at.to_rfc3339(),
            r.resolved_at.map(|d| d.to_rfc3339()),
            r.expires_at.map(|d| d.to_rfc3339()),
            r.approval_expires_at.map(|d| d.to_rfc3339()),
        ],
    )?;
    Ok(())
}

fn risk_tier_str(tier: RiskTier) -> &'static str {
    match tier {
        RiskTier::Critical => "critical",
        RiskTier::Dangerous => "dangerous",
        RiskTier::Caution => "caution",
    }
}
