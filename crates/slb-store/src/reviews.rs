//! Review CRUD and the signed, validated creation path.

use chrono::Utc;
use rusqlite::{params, Connection};
use slb_core::entities::{ReviewDecision, ReviewResponse};
use slb_core::state_machine::RequestStatus;
use slb_core::Review;
use slb_error::ErrorCode;
use uuid::Uuid;

use crate::rows::{review_from_row, ReviewCounts};
use crate::{map_sqlite_err, not_found, Store, StoreError};

/// Input to [`Store::create_review_with_validation`].
pub struct NewReview {
    pub request_id: Uuid,
    pub reviewer_session_id: Uuid,
    pub reviewer_agent: String,
    pub reviewer_model: String,
    pub decision: ReviewDecision,
    /// Hex HMAC signature, as produced by `slb_crypto::sign`.
    pub signature: String,
    pub signature_timestamp: chrono::DateTime<Utc>,
    pub responses: Vec<ReviewResponse>,
    pub comments: Option<String>,
}

impl Store {
    /// Low-level insert with no validation — used by tests and by
    /// [`Store::create_review_with_validation`] once every check passes.
    pub async fn create_review(&self, review: NewReview) -> Result<Review, StoreError> {
        let conn = self.writer.lock().await;
        insert_review(&*conn, &review)
    }

    /// Same as [`Store::create_review`], driven from inside a caller-held
    /// connection (used by [`Store::create_review_with_validation`]).
    pub(crate) fn create_review_tx(conn: &Connection, review: &NewReview) -> Result<Review, StoreError> {
        insert_review(conn, review)
    }

    /// The full checked path from distilled §4.3: load request, require
    /// pending, reject self-review, verify the HMAC signature against the
    /// reviewer's session key, insert (unique per `(request_id,
    /// reviewer_session_id)`), evaluate quorum, and transition the request.
    pub async fn create_review_with_validation(&self, input: NewReview) -> Result<(Review, RequestStatus), StoreError> {
        let conn = self.writer.lock().await;

        let request = crate::requests::fetch_request(&*conn, input.request_id)?;

        if request.status != RequestStatus::Pending {
            return Err(StoreError::new(
                ErrorCode::InvalidTransition,
                format!("request is not pending (currently {})", request.status),
            ));
        }

        if input.reviewer_session_id == request.requestor_session_id {
            return Err(StoreError::new(
                ErrorCode::SelfReview,
                "a session may not review its own request",
            ));
        }

        let reviewer_key = session_key_for(&*conn, input.reviewer_session_id)?;
        let decision_str = match input.decision {
            ReviewDecision::Approve => "approve",
            ReviewDecision::Reject => "reject",
        };
        let valid = slb_crypto::verify(
            &reviewer_key,
            input.request_id,
            decision_str,
            input.signature_timestamp,
            &input.signature,
        )
        .map_err(|e| StoreError::new(ErrorCode::InvalidSignature, "malformed signature").with_source(e))?;
        if !valid {
            return Err(StoreError::new(ErrorCode::InvalidSignature, "signature does not verify"));
        }

        let review = insert_review(&*conn, &input)?;

        let counts = count_by_decision(&*conn, input.request_id)?;
        let next_status = if counts.rejections > 0 {
            RequestStatus::Rejected
        } else if counts.approvals >= request.min_approvals
            && (!request.require_different_model || counts.has_different_model_approval)
        {
            RequestStatus::Approved
        } else {
            RequestStatus::Pending
        };

        if next_status != RequestStatus::Pending {
            Store::update_request_status_tx(&*conn, input.request_id, next_status)?;
        }

        Ok((review, next_status))
    }

    /// Fetch one review by id.
    pub async fn get_review(&self, id: Uuid) -> Result<Review, StoreError> {
        let conn = self.readers.checkout().await?;
        conn.query_row("SELECT * FROM reviews WHERE id = ?1", params![id.to_string()], review_from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => not_found(ErrorCode::ReviewNotFound, "review", id),
                other => map_sqlite_err(other),
            })?
            .into_review()
    }

    /// Every review filed against a request, oldest first.
    pub async fn list_reviews_for_request(&self, request_id: Uuid) -> Result<Vec<Review>, StoreError> {
        let conn = self.readers.checkout().await?;
        let mut stmt = conn
            .prepare("SELECT * FROM reviews WHERE request_id = ?1 ORDER BY created_at")
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(params![request_id.to_string()], review_from_row)
            .map_err(map_sqlite_err)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite_err)?
            .into_iter()
            .map(|r| r.into_review())
            .collect()
    }

    /// Approval/rejection tally, plus whether any approval came from a
    /// model different from `exclude_model`.
    pub async fn count_reviews_by_decision(&self, request_id: Uuid) -> Result<ReviewCounts, StoreError> {
        let conn = self.readers.checkout().await?;
        count_by_decision(&*conn, request_id)
    }

    /// `true` if `reviewer_session_id` already has a review on file for
    /// `request_id`.
    pub async fn has_reviewer_already_reviewed(&self, request_id: Uuid, reviewer_session_id: Uuid) -> Result<bool, StoreError> {
        let conn = self.readers.checkout().await?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM reviews WHERE request_id = ?1 AND reviewer_session_id = ?2",
                params![request_id.to_string(), reviewer_session_id.to_string()],
                |row| row.get(0),
            )
            .map_err(map_sqlite_err)?;
        Ok(count > 0)
    }

    /// `true` if an `approve` review exists whose `reviewer_model` differs
    /// from `requestor_model`.
    pub async fn has_different_model_approval(&self, request_id: Uuid, requestor_model: &str) -> Result<bool, StoreError> {
        let conn = self.readers.checkout().await?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM reviews WHERE request_id = ?1 AND decision = 'approve' AND reviewer_model != ?2",
                params![request_id.to_string(), requestor_model],
                |row| row.get(0),
            )
            .map_err(map_sqlite_err)?;
        Ok(count > 0)
    }

    /// Summarize where a pending request stands against its quorum
    /// requirement, without mutating anything.
    pub async fn check_request_approval_status(&self, request_id: Uuid) -> Result<ApprovalStatus, StoreError> {
        let request = self.get_request(request_id).await?;
        let counts = self.count_reviews_by_decision(request_id).await?;
        Ok(ApprovalStatus {
            min_approvals: request.min_approvals,
            approvals: counts.approvals,
            rejections: counts.rejections,
            require_different_model: request.require_different_model,
            has_different_model_approval: counts.has_different_model_approval,
            quorum_met: counts.rejections == 0
                && counts.approvals >= request.min_approvals
                && (!request.require_different_model || counts.has_different_model_approval),
        })
    }

    /// `true` if `reviewer_session_id` is the same session that filed
    /// `request_id`.
    pub async fn is_requestor_same_as_reviewer(&self, request_id: Uuid, reviewer_session_id: Uuid) -> Result<bool, StoreError> {
        let request = self.get_request(request_id).await?;
        Ok(request.requestor_session_id == reviewer_session_id)
    }
}

/// Snapshot of quorum progress, returned by
/// [`Store::check_request_approval_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ApprovalStatus {
    pub min_approvals: u32,
    pub approvals: u32,
    pub rejections: u32,
    pub require_different_model: bool,
    pub has_different_model_approval: bool,
    pub quorum_met: bool,
}

fn session_key_for(conn: &Connection, session_id: Uuid) -> Result<String, StoreError> {
    conn.query_row(
        "SELECT session_key FROM sessions WHERE id = ?1",
        params![session_id.to_string()],
        |row| row.get(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => not_found(ErrorCode::SessionNotFound, "session", session_id),
        other => map_sqlite_err(other),
    })
}

fn count_by_decision(conn: &Connection, request_id: Uuid) -> Result<ReviewCounts, StoreError> {
    let mut stmt = conn
        .prepare("SELECT decision, reviewer_model FROM reviews WHERE request_id = ?1")
        .map_err(map_sqlite_err)?;
    let rows = stmt
        .query_map(params![request_id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(map_sqlite_err)?;

    let requestor_model: Option<String> = conn
        .query_row(
            "SELECT requestor_model FROM requests WHERE id = ?1",
            params![request_id.to_string()],
            |row| row.get(0),
        )
        .ok();

    let mut counts = ReviewCounts::default();
    for row in rows {
        let (decision, reviewer_model) = row.map_err(map_sqlite_err)?;
        match decision.as_str() {
            "approve" => {
                counts.approvals += 1;
                if requestor_model.as_deref() != Some(reviewer_model.as_str()) {
                    counts.has_different_model_approval = true;
                }
            }
            "reject" => counts.rejections += 1,
            _ => {}
        }
    }
    Ok(counts)
}

fn insert_review(conn: &Connection, review: &NewReview) -> Result<Review, StoreError> {
    let id = Uuid::new_v4();
    let created_at = Utc::now();
    let decision_str = match review.decision {
        ReviewDecision::Approve => "approve",
        ReviewDecision::Reject => "reject",
    };
    let responses_json = (!review.responses.is_empty())
        .then(|| serde_json::to_string(&review.responses).expect("responses serialize"));

    let result = conn.execute(
        "INSERT INTO reviews (id, request_id, reviewer_session_id, reviewer_agent, reviewer_model,
         decision, signature, signature_timestamp, responses, comments, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            id.to_string(),
            review.request_id.to_string(),
            review.reviewer_session_id.to_string(),
            review.reviewer_agent,
            review.reviewer_model,
            decision_str,
            review.signature,
            review.signature_timestamp.to_rfc3339(),
            responses_json,
            review.comments,
            created_at.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => Ok(Review {
            id,
            request_id: review.request_id,
            reviewer_session_id: review.reviewer_session_id,
            reviewer_agent: review.reviewer_agent.clone(),
            reviewer_model: review.reviewer_model.clone(),
            decision: review.decision,
            signature: review.signature.clone(),
            signature_timestamp: review.signature_timestamp,
            responses: review.responses.clone(),
            comments: review.comments.clone(),
            created_at,
        }),
        Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("UNIQUE") => {
            Err(StoreError::new(ErrorCode::ReviewExists, "this session has already reviewed this request"))
        }
        Err(e) => Err(map_sqlite_err(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_for_tests;
    use crate::requests::NewRequest;
    use slb_core::entities::RiskTier;
    use slb_core::Justification;

    async fn setup_request(store: &Store) -> (Uuid, Uuid, String) {
        let requestor = store.create_session("claude", "claude-code", "opus-4", "/repo").await.unwrap();
        let reviewer = store.create_session("codex", "codex-cli", "gpt-5", "/repo").await.unwrap();
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
                requestor_session_id: requestor.id,
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
                min_approvals: Some(1),
            })
            .await
            .unwrap();
        (request.id, reviewer.id, reviewer.session_key)
    }

    #[tokio::test]
    async fn valid_review_approves_request() {
        let (_dir, store) = open_for_tests();
        let (request_id, reviewer_id, key) = setup_request(&store).await;

        let ts = Utc::now();
        let sig = slb_crypto::sign(&key, request_id, "approve", ts).unwrap();
        let (review, status) = store
            .create_review_with_validation(NewReview {
                request_id,
                reviewer_session_id: reviewer_id,
                reviewer_agent: "codex".into(),
                reviewer_model: "gpt-5".into(),
                decision: ReviewDecision::Approve,
                signature: sig,
                signature_timestamp: ts,
                responses: vec![],
                comments: None,
            })
            .await
            .unwrap();

        assert_eq!(review.decision, ReviewDecision::Approve);
        assert_eq!(status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn self_review_rejected() {
        let (_dir, store) = open_for_tests();
        let (request_id, _reviewer_id, _key) = setup_request(&store).await;
        let requestor_session = store.get_request(request_id).await.unwrap().requestor_session_id;
        let requestor_key = store.get_session(requestor_session).await.unwrap().session_key;

        let ts = Utc::now();
        let sig = slb_crypto::sign(&requestor_key, request_id, "approve", ts).unwrap();
        let err = store
            .create_review_with_validation(NewReview {
                request_id,
                reviewer_session_id: requestor_session,
                reviewer_agent: "claude".into(),
                reviewer_model: "opus-4".into(),
                decision: ReviewDecision::Approve,
                signature: sig,
                signature_timestamp: ts,
                responses: vec![],
                comments: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SelfReview);
    }

    #[tokio::test]
    async fn invalid_signature_rejected() {
        let (_dir, store) = open_for_tests();
        let (request_id, reviewer_id, _key) = setup_request(&store).await;

        let err = store
            .create_review_with_validation(NewReview {
                request_id,
                reviewer_session_id: reviewer_id,
                reviewer_agent: "codex".into(),
                reviewer_model: "gpt-5".into(),
                decision: ReviewDecision::Approve,
                signature: "00".repeat(32),
                signature_timestamp: Utc::now(),
                responses: vec![],
                comments: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidSignature);
    }

    #[tokio::test]
    async fn duplicate_review_rejected() {
        let (_dir, store) = open_for_tests();
        let (request_id, reviewer_id, key) = setup_request(&store).await;

        let ts = Utc::now();
        let sig = slb_crypto::sign(&key, request_id, "approve", ts).unwrap();
        store
            .create_review_with_validation(NewReview {
                request_id,
                reviewer_session_id: reviewer_id,
                reviewer_agent: "codex".into(),
                reviewer_model: "gpt-5".into(),
                decision: ReviewDecision::Approve,
                signature: sig.clone(),
                signature_timestamp: ts,
                responses: vec![],
                comments: None,
            })
            .await
            .unwrap();

        // Already approved and terminal-adjacent; a second attempt against
        // the same (request, reviewer) must fail even though the request
        // moved out of pending, since the unique index is independent of
        // status.
        let err = store
            .create_review_with_validation(NewReview {
                request_id,
                reviewer_session_id: reviewer_id,
                reviewer_agent: "codex".into(),
                reviewer_model: "gpt-5".into(),
                decision: ReviewDecision::Approve,
                signature: sig,
                signature_timestamp: ts,
                responses: vec![],
                comments: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err.code, ErrorCode::InvalidTransition | ErrorCode::ReviewExists));
    }

    #[tokio::test]
    async fn rejection_transitions_request_to_rejected() {
        let (_dir, store) = open_for_tests();
        let (request_id, reviewer_id, key) = setup_request(&store).await;

        let ts = Utc::now();
        let sig = slb_crypto::sign(&key, request_id, "reject", ts).unwrap();
        let (_review, status) = store
            .create_review_with_validation(NewReview {
                request_id,
                reviewer_session_id: reviewer_id,
                reviewer_agent: "codex".into(),
                reviewer_model: "gpt-5".into(),
                decision: ReviewDecision::Reject,
                signature: sig,
                signature_timestamp: ts,
                responses: vec![],
                comments: None,
            })
            .await
            .unwrap();
        assert_eq!(status, RequestStatus::Rejected);
    }
}
