//! slb-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for the command notary: the entities durable in the
//! Store (Session, Request, Review, ExecutionOutcome, ...), the risk tier
//! enum, and the request status state machine.
//!
//! If you only take one dependency to talk to the notary's data model, take
//! this one.

/// Entity types durable in the Store.
pub mod entities;
/// Command-hash computation.
pub mod hash;
/// Request status state machine.
pub mod state_machine;

pub use entities::{
    Attachment, CommandSpec, CustomPattern, ExecutionOutcome, ExecutionRecord, Justification,
    PatternChange, ReviewDecision, ReviewResponse, RiskTier, RollbackRecord, Session,
};
pub use state_machine::RequestStatus;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema version this binary compiles against. Compared against
/// `max(schema_migrations.version)` by `slb-store`'s `open_validate`.
pub const SCHEMA_VERSION: i64 = 3;

/// Default lifetime of a pending request before the reaper considers it
/// expired (`created_at + 30 min`, per the Request invariants).
pub const DEFAULT_REQUEST_TTL_SECS: i64 = 30 * 60;

/// A proposed command awaiting approval.
///
/// The Store exclusively owns all rows; callers hold values that are
/// snapshots taken at read time.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Request {
    /// Unique identifier for this request.
    pub id: Uuid,
    /// Absolute path of the project this request belongs to.
    pub project_path: String,
    /// The command being requested.
    pub command: CommandSpec,
    /// Coarse severity classification supplied by the (out-of-scope) risk
    /// classifier.
    pub risk_tier: RiskTier,
    /// Session that created this request.
    pub requestor_session_id: Uuid,
    /// Denormalized requestor agent name, for display without a join.
    pub requestor_agent: String,
    /// Denormalized requestor model name, used by the different-model rule.
    pub requestor_model: String,
    /// Why the requesting agent wants to run this command.
    pub justification: Justification,
    /// Whether this is a dry run (no real side effects expected).
    pub dry_run: bool,
    /// Optional attachments (e.g. diffs, logs) supplied with the request.
    pub attachments: Vec<Attachment>,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Minimum number of approvals required. Defaults are tier-derived:
    /// `critical=2, dangerous=1, caution=0`.
    pub min_approvals: u32,
    /// Whether at least one approval must come from a different model than
    /// the requestor's.
    pub require_different_model: bool,
    /// Execution bookkeeping, present once execution has started.
    pub execution: Option<ExecutionRecord>,
    /// Rollback bookkeeping, present if a rollback snapshot was captured.
    pub rollback: Option<RollbackRecord>,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// When the request entered a terminal state, if it has.
    pub resolved_at: Option<DateTime<Utc>>,
    /// When the request expires if still pending. Defaults to
    /// `created_at + 30min`.
    pub expires_at: Option<DateTime<Utc>>,
    /// When an `approved` status's execution window expires.
    pub approval_expires_at: Option<DateTime<Utc>>,
}

impl Request {
    /// Default `min_approvals` for a given risk tier, used when a caller does
    /// not supply an explicit value at creation time.
    pub fn default_min_approvals(tier: RiskTier) -> u32 {
        match tier {
            RiskTier::Critical => 2,
            RiskTier::Dangerous => 1,
            RiskTier::Caution => 0,
        }
    }

    /// `true` once `status` has reached a terminal state (mirrors
    /// `resolved_at.is_some()`).
    pub fn is_resolved(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A signed vote (approve/reject) on a [`Request`] by a non-originating
/// [`Session`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Review {
    /// Unique identifier for this review.
    pub id: Uuid,
    /// Request being reviewed.
    pub request_id: Uuid,
    /// Session that submitted this review.
    pub reviewer_session_id: Uuid,
    /// Denormalized reviewer agent name.
    pub reviewer_agent: String,
    /// Denormalized reviewer model name.
    pub reviewer_model: String,
    /// Approve or reject.
    pub decision: ReviewDecision,
    /// Hex-encoded HMAC-SHA256 signature over `(request_id, decision, signature_timestamp)`.
    pub signature: String,
    /// Timestamp bound into the signature. MUST be preserved bit-exactly
    /// (RFC 3339, second precision) or verification fails.
    pub signature_timestamp: DateTime<Utc>,
    /// Optional per-justification-field replies.
    pub responses: Vec<ReviewResponse>,
    /// Optional free-form reviewer comments.
    pub comments: Option<String>,
    /// When the review was recorded.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_min_approvals_by_tier() {
        assert_eq!(Request::default_min_approvals(RiskTier::Critical), 2);
        assert_eq!(Request::default_min_approvals(RiskTier::Dangerous), 1);
        assert_eq!(Request::default_min_approvals(RiskTier::Caution), 0);
    }
}
