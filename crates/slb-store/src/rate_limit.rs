//! Per-session rate limiting counters, consulted by request creation.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::{map_sqlite_err, Store, StoreError};

impl Store {
    /// Number of requests in `status = pending` filed by `session_id`.
    pub async fn count_pending_by_session(&self, session_id: uuid::Uuid) -> Result<u32, StoreError> {
        let conn = self.readers.checkout().await?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM requests WHERE requestor_session_id = ?1 AND status = 'pending'",
                params![session_id.to_string()],
                |row| row.get(0),
            )
            .map_err(map_sqlite_err)?;
        Ok(count as u32)
    }

    /// Number of requests filed by `session_id` since `since`.
    pub async fn count_requests_since(&self, session_id: uuid::Uuid, since: DateTime<Utc>) -> Result<u32, StoreError> {
        let conn = self.readers.checkout().await?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM requests WHERE requestor_session_id = ?1 AND created_at >= ?2",
                params![session_id.to_string(), since.to_rfc3339()],
                |row| row.get(0),
            )
            .map_err(map_sqlite_err)?;
        Ok(count as u32)
    }

    /// `created_at` of the oldest request by `session_id` since `since`,
    /// used to compute when a sliding window next has room.
    pub async fn oldest_request_created_at_since(
        &self,
        session_id: uuid::Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.readers.checkout().await?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT MIN(created_at) FROM requests WHERE requestor_session_id = ?1 AND created_at >= ?2",
                params![session_id.to_string(), since.to_rfc3339()],
                |row| row.get(0),
            )
            .map_err(map_sqlite_err)?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    StoreError::new(slb_error::ErrorCode::Internal, "corrupt timestamp in storage").with_source(e)
                })
        })
        .transpose()
    }

    /// Requests filed by `session_id` in the trailing `window_secs`.
    pub async fn count_recent_requests_by_session(&self, session_id: uuid::Uuid, window_secs: i64) -> Result<u32, StoreError> {
        let since = Utc::now() - chrono::Duration::seconds(window_secs);
        self.count_requests_since(session_id, since).await
    }

    /// `true` if `count_recent_requests_by_session` is under the Store's
    /// configured per-window limit.
    pub async fn is_within_rate_limit(&self, session_id: uuid::Uuid) -> Result<bool, StoreError> {
        let count = self
            .count_recent_requests_by_session(session_id, self.rate_limit_window_secs)
            .await?;
        Ok(count < self.rate_limit_per_window)
    }

    /// Clear a session's rate-limit cooldown marker (operator override).
    pub async fn reset_session_rate_limits(&self, session_id: uuid::Uuid) -> Result<(), StoreError> {
        let conn = self.writer.lock().await;
        conn.execute(
            "UPDATE sessions SET rate_limit_reset_at = NULL WHERE id = ?1",
            params![session_id.to_string()],
        )
        .map_err(map_sqlite_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_for_tests;
    use crate::requests::NewRequest;
    use slb_core::entities::RiskTier;
    use slb_core::Justification;

    #[tokio::test]
    async fn rate_limit_counts_recent_requests() {
        let (_dir, store) = open_for_tests();
        let session = store.create_session("claude", "claude-code", "opus-4", "/repo").await.unwrap();

        for i in 0..3 {
            store
                .create_request(NewRequest {
                    project_path: "/repo".into(),
                    raw_command: format!("echo {i}"),
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
        }

        let count = store.count_recent_requests_by_session(session.id, 3600).await.unwrap();
        assert_eq!(count, 3);
        assert!(store.is_within_rate_limit(session.id).await.unwrap());
    }

    #[tokio::test]
    async fn rate_limit_trips_past_window() {
        let (_dir, store) = open_for_tests();
        let store = store.with_rate_limit(2, 3600);
        let session = store.create_session("claude", "claude-code", "opus-4", "/repo").await.unwrap();
        for i in 0..2 {
            store
                .create_request(NewRequest {
                    project_path: "/repo".into(),
                    raw_command: format!("echo {i}"),
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
        }
        assert!(!store.is_within_rate_limit(session.id).await.unwrap());
    }
}
