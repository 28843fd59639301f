//! Audit-trail rows for risk-classifier pattern proposals. Payloads are
//! opaque JSON blobs — the Store persists and lists them but never
//! interprets their contents.

use chrono::Utc;
use rusqlite::params;
use slb_core::entities::{CustomPattern, PatternChange};
use slb_error::ErrorCode;
use serde_json::Value;
use uuid::Uuid;

use crate::{map_sqlite_err, not_found, Store, StoreError};

impl Store {
    /// Record a proposed pattern change (`status` starts `"proposed"`).
    pub async fn propose_pattern_change(&self, proposed_by_session_id: Uuid, payload: Value) -> Result<PatternChange, StoreError> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let conn = self.writer.lock().await;
        conn.execute(
            "INSERT INTO pattern_changes (id, proposed_by_session_id, payload, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                proposed_by_session_id.to_string(),
                payload.to_string(),
                "proposed",
                created_at.to_rfc3339(),
            ],
        )
        .map_err(map_sqlite_err)?;
        Ok(PatternChange {
            id,
            proposed_by_session_id,
            payload,
            status: "proposed".to_string(),
            created_at,
        })
    }

    /// Move a pattern change to `"approved"` or `"rejected"`.
    pub async fn resolve_pattern_change(&self, id: Uuid, status: &str) -> Result<(), StoreError> {
        let conn = self.writer.lock().await;
        let changed = conn
            .execute(
                "UPDATE pattern_changes SET status = ?1 WHERE id = ?2",
                params![status, id.to_string()],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(not_found(ErrorCode::PatternChangeNotFound, "pattern change", id));
        }
        Ok(())
    }

    /// Every pattern change, oldest first.
    pub async fn list_pattern_changes(&self) -> Result<Vec<PatternChange>, StoreError> {
        let conn = self.readers.checkout().await?;
        let mut stmt = conn
            .prepare("SELECT id, proposed_by_session_id, payload, status, created_at FROM pattern_changes ORDER BY created_at")
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(map_sqlite_err)?;
        let mut out = Vec::new();
        for row in rows {
            let (id, proposed_by, payload, status, created_at) = row.map_err(map_sqlite_err)?;
            out.push(PatternChange {
                id: Uuid::parse_str(&id).map_err(|e| StoreError::new(ErrorCode::Internal, "corrupt uuid").with_source(e))?,
                proposed_by_session_id: Uuid::parse_str(&proposed_by)
                    .map_err(|e| StoreError::new(ErrorCode::Internal, "corrupt uuid").with_source(e))?,
                payload: serde_json::from_str(&payload)
                    .map_err(|e| StoreError::new(ErrorCode::Internal, "corrupt payload json").with_source(e))?,
                status,
                created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .map_err(|e| StoreError::new(ErrorCode::Internal, "corrupt timestamp").with_source(e))?,
            });
        }
        Ok(out)
    }

    /// Record an accepted custom pattern.
    pub async fn record_custom_pattern(&self, payload: Value) -> Result<CustomPattern, StoreError> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let conn = self.writer.lock().await;
        conn.execute(
            "INSERT INTO custom_patterns (id, payload, created_at) VALUES (?1, ?2, ?3)",
            params![id.to_string(), payload.to_string(), created_at.to_rfc3339()],
        )
        .map_err(map_sqlite_err)?;
        Ok(CustomPattern { id, payload, created_at })
    }

    /// Every custom pattern on file, oldest first.
    pub async fn list_custom_patterns(&self) -> Result<Vec<CustomPattern>, StoreError> {
        let conn = self.readers.checkout().await?;
        let mut stmt = conn
            .prepare("SELECT id, payload, created_at FROM custom_patterns ORDER BY created_at")
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)))
            .map_err(map_sqlite_err)?;
        let mut out = Vec::new();
        for row in rows {
            let (id, payload, created_at) = row.map_err(map_sqlite_err)?;
            out.push(CustomPattern {
                id: Uuid::parse_str(&id).map_err(|e| StoreError::new(ErrorCode::Internal, "corrupt uuid").with_source(e))?,
                payload: serde_json::from_str(&payload)
                    .map_err(|e| StoreError::new(ErrorCode::Internal, "corrupt payload json").with_source(e))?,
                created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .map_err(|e| StoreError::new(ErrorCode::Internal, "corrupt timestamp").with_source(e))?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_for_tests;

    #[tokio::test]
    async fn pattern_change_lifecycle() {
        let (_dir, store) = open_for_tests();
        let session = store.create_session("claude", "claude-code", "opus-4", "/repo").await.unwrap();
        let change = store
            .propose_pattern_change(session.id, serde_json::json!({"add": "rm -rf *"}))
            .await
            .unwrap();
        assert_eq!(change.status, "proposed");

        store.resolve_pattern_change(change.id, "approved").await.unwrap();
        let all = store.list_pattern_changes().await.unwrap();
        assert_eq!(all[0].status, "approved");
    }

    #[tokio::test]
    async fn custom_pattern_roundtrip() {
        let (_dir, store) = open_for_tests();
        store.record_custom_pattern(serde_json::json!({"pattern": "curl.*\\|.*sh"})).await.unwrap();
        let all = store.list_custom_patterns().await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
