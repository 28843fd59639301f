//! Request lifecycle state machine.
//!
//! A pure `can_transition` match table, mirroring the allowed-edges list
//! exactly. `slb-store` consults this before issuing the optimistic UPDATE
//! that actually performs a transition; a pre-check miss short-circuits
//! without a query, and a post-check miss (a lost race against a concurrent
//! writer) is surfaced by the store as `InvalidTransition` regardless.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a [`crate::Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Created, awaiting reviews.
    Pending,
    /// Quorum reached; waiting for an executor.
    Approved,
    /// At least one reviewer rejected.
    Rejected,
    /// An executor has crossed the verifier gate and is running the command.
    Executing,
    /// Execution completed successfully.
    Executed,
    /// Execution completed with failure.
    ExecutionFailed,
    /// The agent cancelled the request before resolution.
    Cancelled,
    /// The request's `expires_at` passed while pending.
    Timeout,
    /// A terminal alias of `Timeout` surfaced after the reaper escalates.
    TimedOut,
    /// The reaper escalated a timed-out request for human attention.
    Escalated,
}

impl RequestStatus {
    /// `true` if this status has no outgoing edges.
    ///
    /// Terminal: `executed, execution_failed, cancelled, rejected, timed_out, escalated`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Executed
                | Self::ExecutionFailed
                | Self::Cancelled
                | Self::Rejected
                | Self::TimedOut
                | Self::Escalated
        )
    }

    /// All status values, for exhaustive iteration in tests and schema
    /// generation.
    pub fn all() -> [RequestStatus; 10] {
        [
            Self::Pending,
            Self::Approved,
            Self::Rejected,
            Self::Executing,
            Self::Executed,
            Self::ExecutionFailed,
            Self::Cancelled,
            Self::Timeout,
            Self::TimedOut,
            Self::Escalated,
        ]
    }
}

/// Error returned by [`RequestStatus`]'s [`std::str::FromStr`] impl.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid request status {0:?}")]
pub struct ParseRequestStatusError(String);

impl std::str::FromStr for RequestStatus {
    type Err = ParseRequestStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "executing" => Self::Executing,
            "executed" => Self::Executed,
            "execution_failed" => Self::ExecutionFailed,
            "cancelled" => Self::Cancelled,
            "timeout" => Self::Timeout,
            "timed_out" => Self::TimedOut,
            "escalated" => Self::Escalated,
            other => return Err(ParseRequestStatusError(other.to_string())),
        })
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::ExecutionFailed => "execution_failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::TimedOut => "timed_out",
            Self::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

/// Returns `true` if transitioning from `from` to `to` is a legal edge.
///
/// Edges:
/// - `pending -> approved | rejected | cancelled | timeout`
/// - `approved -> executing | cancelled`
/// - `executing -> executed | execution_failed | timed_out`
/// - `timeout -> escalated`
pub fn can_transition(from: RequestStatus, to: RequestStatus) -> bool {
    use RequestStatus::*;
    matches!(
        (from, to),
        (Pending, Approved)
            | (Pending, Rejected)
            | (Pending, Cancelled)
            | (Pending, Timeout)
            | (Approved, Executing)
            | (Approved, Cancelled)
            | (Executing, Executed)
            | (Executing, ExecutionFailed)
            | (Executing, TimedOut)
            | (Timeout, Escalated)
            | (Timeout, Rejected)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestStatus::*;

    #[test]
    fn legal_edges_allowed() {
        assert!(can_transition(Pending, Approved));
        assert!(can_transition(Pending, Rejected));
        assert!(can_transition(Pending, Cancelled));
        assert!(can_transition(Pending, Timeout));
        assert!(can_transition(Approved, Executing));
        assert!(can_transition(Approved, Cancelled));
        assert!(can_transition(Executing, Executed));
        assert!(can_transition(Executing, ExecutionFailed));
        assert!(can_transition(Executing, TimedOut));
        assert!(can_transition(Timeout, Escalated));
        assert!(can_transition(Timeout, Rejected));
    }

    #[test]
    fn illegal_edges_rejected() {
        assert!(!can_transition(Executing, Approved));
        assert!(!can_transition(Executing, Timeout));
        assert!(!can_transition(Rejected, Pending));
        assert!(!can_transition(Executed, Executing));
        assert!(!can_transition(Pending, Executing));
    }

    #[test]
    fn terminal_states() {
        assert!(Executed.is_terminal());
        assert!(ExecutionFailed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(Rejected.is_terminal());
        assert!(TimedOut.is_terminal());
        assert!(Escalated.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!Approved.is_terminal());
        assert!(!Executing.is_terminal());
        assert!(!Timeout.is_terminal());
    }

    #[test]
    fn no_outgoing_edges_from_terminal_states() {
        for from in RequestStatus::all() {
            if from.is_terminal() {
                for to in RequestStatus::all() {
                    assert!(!can_transition(from, to), "{from} -> {to} should be illegal");
                }
            }
        }
    }

    #[test]
    fn display_matches_snake_case_tag() {
        assert_eq!(Pending.to_string(), "pending");
        assert_eq!(ExecutionFailed.to_string(), "execution_failed");
        assert_eq!(TimedOut.to_string(), "timed_out");
    }
}
