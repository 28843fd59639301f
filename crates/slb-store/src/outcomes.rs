//! Post-execution feedback and simple analytics over requests and reviews.

use chrono::Utc;
use rusqlite::params;
use slb_core::entities::ExecutionOutcome;
use slb_error::ErrorCode;
use uuid::Uuid;

use crate::rows::outcome_from_row;
use crate::{map_sqlite_err, not_found, Store, StoreError};

/// Input to [`Store::create_outcome`] / [`Store::record_outcome`].
pub struct NewOutcome {
    pub request_id: Uuid,
    pub caused_problems: bool,
    pub problem_description: Option<String>,
    pub human_rating: Option<u8>,
    pub human_notes: Option<String>,
}

impl Store {
    /// Insert a new outcome row. Many outcomes may exist per request; the
    /// most recent is "the" outcome.
    pub async fn create_outcome(&self, input: NewOutcome) -> Result<ExecutionOutcome, StoreError> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let conn = self.writer.lock().await;
        conn.execute(
            "INSERT INTO execution_outcomes (id, request_id, caused_problems, problem_description, human_rating, human_notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                input.request_id.to_string(),
                input.caused_problems,
                input.problem_description,
                input.human_rating.map(|r| r as i64),
                input.human_notes,
                created_at.to_rfc3339(),
            ],
        )
        .map_err(map_sqlite_err)?;

        Ok(ExecutionOutcome {
            id,
            request_id: input.request_id,
            caused_problems: input.caused_problems,
            problem_description: input.problem_description,
            human_rating: input.human_rating,
            human_notes: input.human_notes,
            created_at,
        })
    }

    /// Most recent outcome recorded for a request, if any.
    pub async fn get_outcome_for_request(&self, request_id: Uuid) -> Result<Option<ExecutionOutcome>, StoreError> {
        let conn = self.readers.checkout().await?;
        let row = conn
            .query_row(
                "SELECT * FROM execution_outcomes WHERE request_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![request_id.to_string()],
                outcome_from_row,
            )
            .map(Some)
            .or_else(|e| if matches!(e, rusqlite::Error::QueryReturnedNoRows) { Ok(None) } else { Err(map_sqlite_err(e)) })?;
        row.map(|r| r.into_outcome()).transpose()
    }

    /// Update an existing outcome row in place.
    pub async fn update_outcome(&self, id: Uuid, human_rating: Option<u8>, human_notes: Option<String>) -> Result<(), StoreError> {
        let conn = self.writer.lock().await;
        let changed = conn
            .execute(
                "UPDATE execution_outcomes SET human_rating = ?1, human_notes = ?2 WHERE id = ?3",
                params![human_rating.map(|r| r as i64), human_notes, id.to_string()],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(not_found(ErrorCode::OutcomeNotFound, "outcome", id));
        }
        Ok(())
    }

    /// Convenience wrapper matching distilled §4.1's `RecordOutcome` name —
    /// identical to [`Store::create_outcome`].
    pub async fn record_outcome(&self, input: NewOutcome) -> Result<ExecutionOutcome, StoreError> {
        self.create_outcome(input).await
    }

    /// Every outcome ever recorded, newest first.
    pub async fn list_outcomes(&self) -> Result<Vec<ExecutionOutcome>, StoreError> {
        let conn = self.readers.checkout().await?;
        let mut stmt = conn
            .prepare("SELECT * FROM execution_outcomes ORDER BY created_at DESC")
            .map_err(map_sqlite_err)?;
        let rows = stmt.query_map([], outcome_from_row).map_err(map_sqlite_err)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite_err)?
            .into_iter()
            .map(|r| r.into_outcome())
            .collect()
    }

    /// Outcomes flagged `caused_problems`, newest first.
    pub async fn list_problematic_outcomes(&self) -> Result<Vec<ExecutionOutcome>, StoreError> {
        let conn = self.readers.checkout().await?;
        let mut stmt = conn
            .prepare("SELECT * FROM execution_outcomes WHERE caused_problems = 1 ORDER BY created_at DESC")
            .map_err(map_sqlite_err)?;
        let rows = stmt.query_map([], outcome_from_row).map_err(map_sqlite_err)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite_err)?
            .into_iter()
            .map(|r| r.into_outcome())
            .collect()
    }

    /// Aggregate outcome counters across every recorded outcome.
    pub async fn get_outcome_stats(&self) -> Result<OutcomeStats, StoreError> {
        let conn = self.readers.checkout().await?;
        let (total, problematic, avg_rating): (i64, i64, Option<f64>) = conn
            .query_row(
                "SELECT COUNT(*), SUM(caused_problems), AVG(human_rating) FROM execution_outcomes",
                [],
                |row| Ok((row.get(0)?, row.get::<_, Option<i64>>(1)?.unwrap_or(0), row.get(2)?)),
            )
            .map_err(map_sqlite_err)?;
        Ok(OutcomeStats {
            total_outcomes: total as u64,
            problematic_outcomes: problematic as u64,
            average_human_rating: avg_rating,
        })
    }

    /// Per-agent request counters (total filed, approved, rejected).
    pub async fn get_request_stats_by_agent(&self, agent: &str) -> Result<RequestStats, StoreError> {
        let conn = self.readers.checkout().await?;
        let (total, approved, rejected): (i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*),
                        SUM(CASE WHEN status IN ('approved','executing','executed') THEN 1 ELSE 0 END),
                        SUM(CASE WHEN status IN ('rejected','timed_out') THEN 1 ELSE 0 END)
                 FROM requests WHERE requestor_agent = ?1",
                params![agent],
                |row| Ok((row.get(0)?, row.get::<_, Option<i64>>(1)?.unwrap_or(0), row.get::<_, Option<i64>>(2)?.unwrap_or(0))),
            )
            .map_err(map_sqlite_err)?;
        Ok(RequestStats {
            total_requests: total as u64,
            approved_requests: approved as u64,
            rejected_requests: rejected as u64,
        })
    }

    /// Average and max seconds between `created_at` and `resolved_at` for
    /// requests that reached `approved` or a terminal state from approval.
    pub async fn get_time_to_approval_stats(&self) -> Result<TimeToApprovalStats, StoreError> {
        let conn = self.readers.checkout().await?;
        let mut stmt = conn
            .prepare(
                "SELECT created_at, resolved_at FROM requests
                 WHERE resolved_at IS NOT NULL AND status IN ('approved', 'executed', 'execution_failed')",
            )
            .map_err(map_sqlite_err)?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(map_sqlite_err)?
            .collect::<Result<_, _>>()
            .map_err(map_sqlite_err)?;

        if rows.is_empty() {
            return Ok(TimeToApprovalStats::default());
        }

        let mut total_secs = 0i64;
        let mut max_secs = 0i64;
        for (created, resolved) in &rows {
            let created = chrono::DateTime::parse_from_rfc3339(created)
                .map_err(|e| StoreError::new(ErrorCode::Internal, "corrupt timestamp").with_source(e))?;
            let resolved = chrono::DateTime::parse_from_rfc3339(resolved)
                .map_err(|e| StoreError::new(ErrorCode::Internal, "corrupt timestamp").with_source(e))?;
            let secs = (resolved - created).num_seconds().max(0);
            total_secs += secs;
            max_secs = max_secs.max(secs);
        }

        Ok(TimeToApprovalStats {
            sample_size: rows.len() as u64,
            average_secs: total_secs as f64 / rows.len() as f64,
            max_secs,
        })
    }
}

/// Aggregate counters from [`Store::get_outcome_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OutcomeStats {
    pub total_outcomes: u64,
    pub problematic_outcomes: u64,
    pub average_human_rating: Option<f64>,
}

/// Per-agent request counters from [`Store::get_request_stats_by_agent`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RequestStats {
    pub total_requests: u64,
    pub approved_requests: u64,
    pub rejected_requests: u64,
}

/// Time-to-approval summary from [`Store::get_time_to_approval_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeToApprovalStats {
    pub sample_size: u64,
    pub average_secs: f64,
    pub max_secs: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_for_tests;
    use crate::requests::NewRequest;
    use slb_core::entities::RiskTier;
    use slb_core::Justification;

    async fn make_request(store: &Store) -> Uuid {
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
        request.id
    }

    #[tokio::test]
    async fn outcome_roundtrip_and_stats() {
        let (_dir, store) = open_for_tests();
        let request_id = make_request(&store).await;

        store
            .create_outcome(NewOutcome {
                request_id,
                caused_problems: true,
                problem_description: Some("flaky".into()),
                human_rating: Some(2),
                human_notes: None,
            })
            .await
            .unwrap();

        let outcome = store.get_outcome_for_request(request_id).await.unwrap().unwrap();
        assert!(outcome.caused_problems);

        let stats = store.get_outcome_stats().await.unwrap();
        assert_eq!(stats.total_outcomes, 1);
        assert_eq!(stats.problematic_outcomes, 1);

        let problematic = store.list_problematic_outcomes().await.unwrap();
        assert_eq!(problematic.len(), 1);
    }

    #[tokio::test]
    async fn request_stats_by_agent() {
        let (_dir, store) = open_for_tests();
        let request_id = make_request(&store).await;
        store.update_request_status(request_id, slb_core::state_machine::RequestStatus::Approved).await.unwrap();

        let stats = store.get_request_stats_by_agent("claude").await.unwrap();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.approved_requests, 1);
    }
}
