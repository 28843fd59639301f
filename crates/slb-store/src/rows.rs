//! Row-to-entity mapping shared by the query submodules.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use slb_core::entities::{
    Attachment, CommandSpec, ExecutionOutcome, ExecutionRecord, Justification, RiskTier,
    RollbackRecord, Session,
};
use slb_core::state_machine::RequestStatus;
use slb_core::{Request, Review};
use slb_error::{ErrorCode, NotaryError};
use uuid::Uuid;

fn parse_dt(s: &str) -> Result<DateTime<Utc>, NotaryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| NotaryError::new(ErrorCode::Internal, "corrupt timestamp in storage").with_source(e))
}

fn parse_uuid(s: &str) -> Result<Uuid, NotaryError> {
    Uuid::parse_str(s)
        .map_err(|e| NotaryError::new(ErrorCode::Internal, "corrupt uuid in storage").with_source(e))
}

pub(crate) fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get("id")?,
        agent_name: row.get("agent_name")?,
        program: row.get("program")?,
        model: row.get("model")?,
        project_path: row.get("project_path")?,
        session_key: row.get("session_key")?,
        started_at: row.get("started_at")?,
        last_active_at: row.get("last_active_at")?,
        ended_at: row.get("ended_at")?,
        rate_limit_reset_at: row.get("rate_limit_reset_at")?,
    })
}

/// Raw string/column form pulled straight out of SQLite, converted to
/// [`Session`] by [`SessionRow::into_session`]. Kept as an intermediate
/// step so `rusqlite`'s `?` conversions (all plain `String`/`i64`/`Option`)
/// never have to know about `chrono`/`uuid` parsing, which can fail in
/// ways `rusqlite::Error` can't represent directly.
pub(crate) struct SessionRow {
    pub id: String,
    pub agent_name: String,
    pub program: String,
    pub model: String,
    pub project_path: String,
    pub session_key: String,
    pub started_at: String,
    pub last_active_at: String,
    pub ended_at: Option<String>,
    pub rate_limit_reset_at: Option<String>,
}

impl SessionRow {
    pub(crate) fn into_session(self) -> Result<Session, NotaryError> {
        Ok(Session {
            id: parse_uuid(&self.id)?,
            agent_name: self.agent_name,
            program: self.program,
            model: self.model,
            project_path: self.project_path,
            session_key: self.session_key,
            started_at: parse_dt(&self.started_at)?,
            last_active_at: parse_dt(&self.last_active_at)?,
            ended_at: self.ended_at.as_deref().map(parse_dt).transpose()?,
            rate_limit_reset_at: self.rate_limit_reset_at.as_deref().map(parse_dt).transpose()?,
        })
    }
}

pub(crate) struct RequestRow {
    pub id: String,
    pub project_path: String,
    pub command_raw: String,
    pub command_argv: Option<String>,
    pub command_cwd: String,
    pub command_shell: bool,
    pub command_hash: String,
    pub command_display_redacted: Option<String>,
    pub command_contains_sensitive: bool,
    pub risk_tier: String,
    pub requestor_session_id: String,
    pub requestor_agent: String,
    pub requestor_model: String,
    pub justification_reason: String,
    pub justification_expected_effect: Option<String>,
    pub justification_goal: Option<String>,
    pub justification_safety_argument: Option<String>,
    pub dry_run: bool,
    pub attachments: Option<String>,
    pub status: String,
    pub min_approvals: i64,
    pub require_different_model: bool,
    pub execution_log_path: Option<String>,
    pub execution_exit_code: Option<i64>,
    pub execution_duration_ms: Option<i64>,
    pub execution_executor_session_id: Option<String>,
    pub execution_executed_at: Option<String>,
    pub rollback_captured_state_path: Option<String>,
    pub rollback_rolled_back_at: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
    pub expires_at: Option<String>,
    pub approval_expires_at: Option<String>,
}

pub(crate) fn request_from_row(row: &Row<'_>) -> rusqlite::Result<RequestRow> {
    Ok(RequestRow {
        id: row.get("id")?,
        project_path: row.get("project_path")?,
        command_raw: row.get("command_raw")?,
        command_argv: row.get("command_argv")?,
        command_cwd: row.get("command_cwd")?,
        command_shell: row.get("command_shell")?,
        command_hash: row.get("command_hash")?,
        command_display_redacted: row.get("command_display_redacted")?,
        command_contains_sensitive: row.get("command_contains_sensitive")?,
        risk_tier: row.get("risk_tier")?,
        requestor_session_id: row.get("requestor_session_id")?,
        requestor_agent: row.get("requestor_agent")?,
        requestor_model: row.get("requestor_model")?,
        justification_reason: row.get("justification_reason")?,
        justification_expected_effect: row.get("justification_expected_effect")?,
        justification_goal: row.get("justification_goal")?,
        justification_safety_argument: row.get("justification_safety_argument")?,
        dry_run: row.get("dry_run")?,
        attachments: row.get("attachments")?,
        status: row.get("status")?,
        min_approvals: row.get("min_approvals")?,
        require_different_model: row.get("require_different_model")?,
        execution_log_path: row.get("execution_log_path")?,
        execution_exit_code: row.get("execution_exit_code")?,
        execution_duration_ms: row.get("execution_duration_ms")?,
        execution_executor_session_id: row.get("execution_executor_session_id")?,
        execution_executed_at: row.get("execution_executed_at")?,
        rollback_captured_state_path: row.get("rollback_captured_state_path")?,
        rollback_rolled_back_at: row.get("rollback_rolled_back_at")?,
        created_at: row.get("created_at")?,
        resolved_at: row.get("resolved_at")?,
        expires_at: row.get("expires_at")?,
        approval_expires_at: row.get("approval_expires_at")?,
    })
}

impl RequestRow {
    pub(crate) fn into_request(self) -> Result<Request, NotaryError> {
        let risk_tier = match self.risk_tier.as_str() {
            "critical" => RiskTier::Critical,
            "dangerous" => RiskTier::Dangerous,
            "caution" => RiskTier::Caution,
            other => {
                return Err(NotaryError::new(
                    ErrorCode::Internal,
                    format!("corrupt risk_tier {other:?} in storage"),
                ))
            }
        };
        let status: RequestStatus = self
            .status
            .parse()
            .map_err(|_| NotaryError::new(ErrorCode::Internal, format!("corrupt status {:?} in storage", self.status)))?;
        let argv = self
            .command_argv
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| NotaryError::new(ErrorCode::Internal, "corrupt argv json in storage").with_source(e))?;
        let attachments: Vec<Attachment> = self
            .attachments
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| NotaryError::new(ErrorCode::Internal, "corrupt attachments json in storage").with_source(e))?
            .unwrap_or_default();

        let execution = self.execution_executed_at.as_deref().map(parse_dt).transpose()?.map(|executed_at| {
            Ok::<_, NotaryError>(ExecutionRecord {
                log_path: self.execution_log_path.clone(),
                exit_code: self.execution_exit_code.map(|c| c as i32),
                duration_ms: self.execution_duration_ms,
                executor_session_id: self
                    .execution_executor_session_id
                    .as_deref()
                    .map(parse_uuid)
                    .transpose()?
                    .unwrap_or_default(),
                executed_at,
            })
        }).transpose()?;

        let rollback = self.rollback_captured_state_path.clone().map(|captured_state_path| {
            Ok::<_, NotaryError>(RollbackRecord {
                captured_state_path,
                rolled_back_at: self.rollback_rolled_back_at.as_deref().map(parse_dt).transpose()?,
            })
        }).transpose()?;

        Ok(Request {
            id: parse_uuid(&self.id)?,
            project_path: self.project_path,
            command: CommandSpec {
                raw: self.command_raw,
                argv,
                cwd: self.command_cwd,
                shell: self.command_shell,
                hash: self.command_hash,
                display_redacted: self.command_display_redacted,
                contains_sensitive: self.command_contains_sensitive,
            },
            risk_tier,
            requestor_session_id: parse_uuid(&self.requestor_session_id)?,
            requestor_agent: self.requestor_agent,
            requestor_model: self.requestor_model,
            justification: Justification {
                reason: self.justification_reason,
                expected_effect: self.justification_expected_effect,
                goal: self.justification_goal,
                safety_argument: self.justification_safety_argument,
            },
            dry_run: self.dry_run,
            attachments,
            status,
            min_approvals: self.min_approvals as u32,
            require_different_model: self.require_different_model,
            execution,
            rollback,
            created_at: parse_dt(&self.created_at)?,
            resolved_at: self.resolved_at.as_deref().map(parse_dt).transpose()?,
            expires_at: self.expires_at.as_deref().map(parse_dt).transpose()?,
            approval_expires_at: self.approval_expires_at.as_deref().map(parse_dt).transpose()?,
        })
    }
}

pub(crate) struct ReviewRow {
    pub id: String,
    pub request_id: String,
    pub reviewer_session_id: String,
    pub reviewer_agent: String,
    pub reviewer_model: String,
    pub decision: String,
    pub signature: String,
    pub signature_timestamp: String,
    pub responses: Option<String>,
    pub comments: Option<String>,
    pub created_at: String,
}

pub(crate) fn review_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewRow> {
    Ok(ReviewRow {
        id: row.get("id")?,
        request_id: row.get("request_id")?,
        reviewer_session_id: row.get("reviewer_session_id")?,
        reviewer_agent: row.get("reviewer_agent")?,
        reviewer_model: row.get("reviewer_model")?,
        decision: row.get("decision")?,
        signature: row.get("signature")?,
        signature_timestamp: row.get("signature_timestamp")?,
        responses: row.get("responses")?,
        comments: row.get("comments")?,
        created_at: row.get("created_at")?,
    })
}

impl ReviewRow {
    pub(crate) fn into_review(self) -> Result<Review, NotaryError> {
        use slb_core::entities::ReviewDecision;
        let decision = match self.decision.as_str() {
            "approve" => ReviewDecision::Approve,
            "reject" => ReviewDecision::Reject,
            other => {
                return Err(NotaryError::new(
                    ErrorCode::Internal,
                    format!("corrupt decision {other:?} in storage"),
                ))
            }
        };
        let responses = self
            .responses
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| NotaryError::new(ErrorCode::Internal, "corrupt responses json in storage").with_source(e))?
            .unwrap_or_default();
        Ok(Review {
            id: parse_uuid(&self.id)?,
            request_id: parse_uuid(&self.request_id)?,
            reviewer_session_id: parse_uuid(&self.reviewer_session_id)?,
            reviewer_agent: self.reviewer_agent,
            reviewer_model: self.reviewer_model,
            decision,
            signature: self.signature,
            signature_timestamp: parse_dt(&self.signature_timestamp)?,
            responses,
            comments: self.comments,
            created_at: parse_dt(&self.created_at)?,
        })
    }
}

pub(crate) fn outcome_from_row(row: &Row<'_>) -> rusqlite::Result<OutcomeRow> {
    Ok(OutcomeRow {
        id: row.get("id")?,
        request_id: row.get("request_id")?,
        caused_problems: row.get("caused_problems")?,
        problem_description: row.get("problem_description")?,
        human_rating: row.get("human_rating")?,
        human_notes: row.get("human_notes")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) struct OutcomeRow {
    pub id: String,
    pub request_id: String,
    pub caused_problems: bool,
    pub problem_description: Option<String>,
    pub human_rating: Option<i64>,
    pub human_notes: Option<String>,
    pub created_at: String,
}

impl OutcomeRow {
    pub(crate) fn into_outcome(self) -> Result<ExecutionOutcome, NotaryError> {
        Ok(ExecutionOutcome {
            id: parse_uuid(&self.id)?,
            request_id: parse_uuid(&self.request_id)?,
            caused_problems: self.caused_problems,
            problem_description: self.problem_description,
            human_rating: self.human_rating.map(|r| r as u8),
            human_notes: self.human_notes,
            created_at: parse_dt(&self.created_at)?,
        })
    }
}

/// Approval/rejection tally for one request, as computed by
/// [`crate::reviews`] quorum evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewCounts {
    /// Number of `approve` reviews.
    pub approvals: u32,
    /// Number of `reject` reviews.
    pub rejections: u32,
    /// Whether at least one approval came from a model different from the
    /// requestor's.
    pub has_different_model_approval: bool,
}

/// The outcome of [`crate::Store::verify_execution_allowed`] /
/// [`crate::Store::verify_and_mark_executing`].
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// The request snapshot as of the check.
    pub request: Request,
    /// Remaining time-to-live on the approval window, zero if already
    /// elapsed (callers should treat `<= 0` as expired).
    pub approval_ttl_secs: i64,
}
