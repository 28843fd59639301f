//! Value types embedded in or attached to [`crate::Request`].

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::compute_command_hash;

/// A live attachment of one agent to one project.
///
/// Invariant: at most one row with `ended_at == None` exists per
/// `(agent_name, project_path)` — enforced by `slb-store` via a partial
/// unique index, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Session {
    /// Unique identifier for this session.
    pub id: Uuid,
    /// Name of the agent attached (e.g. `"claude-code"`).
    pub agent_name: String,
    /// Host program running the agent (e.g. `"cli"`, `"vscode-extension"`).
    pub program: String,
    /// Model backing the agent at the time of session creation.
    pub model: String,
    /// Absolute path of the project this session is attached to.
    pub project_path: String,
    /// 32 random bytes, hex-encoded. Secret; never emitted over the wire
    /// except at session creation.
    #[serde(skip_serializing)]
    pub session_key: String,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
    /// Last time this session performed an action (heartbeat).
    pub last_active_at: DateTime<Utc>,
    /// When the session ended, if it has. `None` means live.
    pub ended_at: Option<DateTime<Utc>>,
    /// When this session's rate-limit window resets, if currently limited.
    pub rate_limit_reset_at: Option<DateTime<Utc>>,
}

impl Session {
    /// `true` if this session has not yet ended.
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// A raw shell command together with enough structure to hash and safely
/// display it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommandSpec {
    /// The command exactly as requested.
    pub raw: String,
    /// Parsed argument vector, when the caller supplied one.
    pub argv: Option<Vec<String>>,
    /// Working directory the command would run in.
    pub cwd: String,
    /// Whether the command needs shell parsing (pipes, globs, redirection)
    /// rather than direct `exec`.
    pub shell: bool,
    /// SHA-256 over `raw "\n" cwd "\n" json(argv) "\n" "true"|"false"`,
    /// hex-encoded. Computed at creation if absent.
    pub hash: String,
    /// Safe-to-print form, present when `contains_sensitive` is true.
    pub display_redacted: Option<String>,
    /// Whether `raw` is believed to contain secrets (API keys, tokens) that
    /// should not be logged or displayed verbatim.
    pub contains_sensitive: bool,
}

impl CommandSpec {
    /// Build a `CommandSpec`, computing `hash` from the other fields.
    pub fn new(
        raw: impl Into<String>,
        argv: Option<Vec<String>>,
        cwd: impl Into<String>,
        shell: bool,
    ) -> Self {
        let raw = raw.into();
        let cwd = cwd.into();
        let hash = compute_command_hash(&raw, &cwd, argv.as_deref(), shell);
        Self {
            raw,
            argv,
            cwd,
            shell,
            hash,
            display_redacted: None,
            contains_sensitive: false,
        }
    }

    /// Recompute `hash` from the current field values, overwriting it.
    pub fn recompute_hash(&mut self) {
        self.hash = compute_command_hash(&self.raw, &self.cwd, self.argv.as_deref(), self.shell);
    }
}

/// Why a requesting agent wants to run a command.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Justification {
    /// Required, non-empty: the reason for the request.
    pub reason: String,
    /// What the agent expects this command to accomplish.
    pub expected_effect: Option<String>,
    /// The broader goal this command serves.
    pub goal: Option<String>,
    /// Why the agent believes this command is safe to run.
    pub safety_argument: Option<String>,
}

/// Coarse severity class assigned by the (out-of-scope) risk classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Requires the most scrutiny; defaults to two approvals.
    Critical,
    /// Requires one approval by default.
    Dangerous,
    /// No approval required by default; still notarized and logged.
    Caution,
}

/// Approve or reject a [`crate::Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// The reviewer approves execution.
    Approve,
    /// The reviewer rejects execution.
    Reject,
}

/// A reviewer's reply to one field of the requestor's [`Justification`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReviewResponse {
    /// Which justification field this responds to (`"reason"`, `"goal"`, ...).
    pub field: String,
    /// The reviewer's reply text.
    pub comment: String,
}

/// A file or blob supplied alongside a request (e.g. a diff or log excerpt).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Attachment {
    /// Display name of the attachment.
    pub name: String,
    /// Media type, e.g. `"text/x-diff"`.
    pub content_type: String,
    /// Inline content. Large attachments are expected to be small enough to
    /// store inline; the notary does not chunk or stream them.
    pub content: String,
}

/// Execution bookkeeping attached to an approved [`crate::Request`] once an
/// executor begins running it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionRecord {
    /// Path to the captured execution log, if any.
    pub log_path: Option<String>,
    /// Process exit code, once execution has completed.
    pub exit_code: Option<i32>,
    /// Wall-clock duration of execution, in milliseconds.
    pub duration_ms: Option<i64>,
    /// Session id of the executor that crossed the verifier gate.
    pub executor_session_id: Uuid,
    /// When execution began (the moment `VerifyAndMarkExecuting` succeeded).
    pub executed_at: DateTime<Utc>,
}

/// Rollback bookkeeping for a request whose effects were captured before
/// execution and later reverted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RollbackRecord {
    /// Path to the captured pre-execution state snapshot.
    pub captured_state_path: String,
    /// When the rollback was performed, if it was.
    pub rolled_back_at: Option<DateTime<Utc>>,
}

/// Post-execution feedback attached to a [`crate::Request`].
///
/// Many outcomes may exist for one request; "the outcome for a request" is
/// the most recently recorded one.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionOutcome {
    /// Unique identifier for this outcome row.
    pub id: Uuid,
    /// Request this outcome describes.
    pub request_id: Uuid,
    /// Whether execution caused problems.
    pub caused_problems: bool,
    /// Free-form description of the problem, if any.
    pub problem_description: Option<String>,
    /// Optional 1-5 human satisfaction rating.
    pub human_rating: Option<u8>,
    /// Optional free-form human notes.
    pub human_notes: Option<String>,
    /// When this outcome was recorded.
    pub created_at: DateTime<Utc>,
}

/// Audit-trail row for a suggested or approved addition/removal of a
/// risk-classifier pattern. Opaque to the core: the `payload` is never
/// interpreted, only stored and retrieved.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PatternChange {
    /// Unique identifier for this change row.
    pub id: Uuid,
    /// Session that proposed the change.
    pub proposed_by_session_id: Uuid,
    /// Opaque JSON payload describing the change.
    pub payload: serde_json::Value,
    /// Whether the change has been approved, rejected, or is still pending.
    pub status: String,
    /// When the change row was created.
    pub created_at: DateTime<Utc>,
}

/// A custom risk-classifier pattern registered out-of-band. Opaque to the
/// core.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CustomPattern {
    /// Unique identifier for this pattern row.
    pub id: Uuid,
    /// Opaque JSON payload describing the pattern.
    pub payload: serde_json::Value,
    /// When the pattern row was created.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_spec_hash_is_computed() {
        let spec = CommandSpec::new("ls -la", None, "/tmp", false);
        assert_eq!(spec.hash.len(), 64);
    }

    #[test]
    fn recompute_hash_reflects_field_change() {
        let mut spec = CommandSpec::new("ls -la", None, "/tmp", false);
        let before = spec.hash.clone();
        spec.raw = "rm -rf /tmp".into();
        spec.recompute_hash();
        assert_ne!(before, spec.hash);
    }

    #[test]
    fn session_is_active_until_ended() {
        let now = Utc::now();
        let mut s = Session {
            id: Uuid::new_v4(),
            agent_name: "claude-code".into(),
            program: "cli".into(),
            model: "opus-4.5".into(),
            project_path: "/tmp/proj".into(),
            session_key: "deadbeef".into(),
            started_at: now,
            last_active_at: now,
            ended_at: None,
            rate_limit_reset_at: None,
        };
        assert!(s.is_active());
        s.ended_at = Some(now);
        assert!(!s.is_active());
    }
}
