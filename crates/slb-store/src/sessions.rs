//! Session CRUD and the different-model quorum helpers.

use chrono::{Duration, Utc};
use rusqlite::params;
use slb_core::entities::Session;
use slb_error::ErrorCode;
use uuid::Uuid;

use crate::rows::session_from_row;
use crate::{map_sqlite_err, not_found, Store, StoreError};

impl Store {
    /// Create a new session, minting its secret key via `slb-crypto`.
    ///
    /// Fails with [`ErrorCode::ActiveSessionExists`] if `(agent_name,
    /// project_path)` already has a live row (`ended_at IS NULL`).
    pub async fn create_session(
        &self,
        agent_name: &str,
        program: &str,
        model: &str,
        project_path: &str,
    ) -> Result<Session, StoreError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            agent_name: agent_name.to_string(),
            program: program.to_string(),
            model: model.to_string(),
            project_path: project_path.to_string(),
            session_key: slb_crypto::generate_session_key(),
            started_at: now,
            last_active_at: now,
            ended_at: None,
            rate_limit_reset_at: None,
        };

        let conn = self.writer.lock().await;
        let result = conn.execute(
            "INSERT INTO sessions (id, agent_name, program, model, project_path, session_key, started_at, last_active_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session.id.to_string(),
                session.agent_name,
                session.program,
                session.model,
                session.project_path,
                session.session_key,
                session.started_at.to_rfc3339(),
                session.last_active_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(session),
            Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("UNIQUE") => {
                Err(StoreError::new(
                    ErrorCode::ActiveSessionExists,
                    format!("active session already exists for {agent_name} in {project_path}"),
                ))
            }
            Err(e) => Err(map_sqlite_err(e)),
        }
    }

    /// Fetch a session by id, active or ended.
    pub async fn get_session(&self, id: Uuid) -> Result<Session, StoreError> {
        let conn = self.readers.checkout().await?;
        conn.query_row("SELECT * FROM sessions WHERE id = ?1", params![id.to_string()], session_from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => not_found(ErrorCode::SessionNotFound, "session", id),
                other => map_sqlite_err(other),
            })?
            .into_session()
    }

    /// The live session (if any) for `(agent_name, project_path)`.
    pub async fn get_active_session(&self, agent_name: &str, project_path: &str) -> Result<Option<Session>, StoreError> {
        let conn = self.readers.checkout().await?;
        let row = conn
            .query_row(
                "SELECT * FROM sessions WHERE agent_name = ?1 AND project_path = ?2 AND ended_at IS NULL",
                params![agent_name, project_path],
                session_from_row,
            )
            .map(Some)
            .or_else(|e| if matches!(e, rusqlite::Error::QueryReturnedNoRows) { Ok(None) } else { Err(map_sqlite_err(e)) })?;
        row.map(|r| r.into_session()).transpose()
    }

    /// All live sessions in one project.
    pub async fn list_active_sessions(&self, project_path: &str) -> Result<Vec<Session>, StoreError> {
        let conn = self.readers.checkout().await?;
        let mut stmt = conn
            .prepare("SELECT * FROM sessions WHERE project_path = ?1 AND ended_at IS NULL ORDER BY started_at")
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(params![project_path], session_from_row)
            .map_err(map_sqlite_err)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite_err)?
            .into_iter()
            .map(|r| r.into_session())
            .collect()
    }

    /// All live sessions across every project.
    pub async fn list_all_active_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let conn = self.readers.checkout().await?;
        let mut stmt = conn
            .prepare("SELECT * FROM sessions WHERE ended_at IS NULL ORDER BY started_at")
            .map_err(map_sqlite_err)?;
        let rows = stmt.query_map([], session_from_row).map_err(map_sqlite_err)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite_err)?
            .into_iter()
            .map(|r| r.into_session())
            .collect()
    }

    /// Bump `last_active_at` to now.
    pub async fn update_session_heartbeat(&self, id: Uuid) -> Result<(), StoreError> {
        let conn = self.writer.lock().await;
        let changed = conn
            .execute(
                "UPDATE sessions SET last_active_at = ?1 WHERE id = ?2 AND ended_at IS NULL",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(not_found(ErrorCode::SessionNotFound, "active session", id));
        }
        Ok(())
    }

    /// Stamp `ended_at`, retiring a session.
    pub async fn end_session(&self, id: Uuid) -> Result<(), StoreError> {
        let conn = self.writer.lock().await;
        let changed = conn
            .execute(
                "UPDATE sessions SET ended_at = ?1 WHERE id = ?2 AND ended_at IS NULL",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(not_found(ErrorCode::SessionNotFound, "active session", id));
        }
        Ok(())
    }

    /// Live sessions whose `last_active_at` is older than `threshold`.
    pub async fn find_stale_sessions(&self, threshold: Duration) -> Result<Vec<Session>, StoreError> {
        let cutoff = Utc::now() - threshold;
        let conn = self.readers.checkout().await?;
        let mut stmt = conn
            .prepare("SELECT * FROM sessions WHERE ended_at IS NULL AND last_active_at < ?1 ORDER BY last_active_at")
            .map_err(map_sqlite_err)?;
        let rows = stmt.query_map(params![cutoff.to_rfc3339()], session_from_row).map_err(map_sqlite_err)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite_err)?
            .into_iter()
            .map(|r| r.into_session())
            .collect()
    }

    /// Live sessions in `project_path` whose model differs from
    /// `exclude_model` — used to satisfy `require_different_model` quorum.
    pub async fn list_active_sessions_with_different_model(
        &self,
        project_path: &str,
        exclude_model: &str,
    ) -> Result<Vec<Session>, StoreError> {
        let conn = self.readers.checkout().await?;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM sessions WHERE project_path = ?1 AND ended_at IS NULL AND model != ?2 ORDER BY started_at",
            )
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(params![project_path, exclude_model], session_from_row)
            .map_err(map_sqlite_err)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite_err)?
            .into_iter()
            .map(|r| r.into_session())
            .collect()
    }

    /// `true` if at least one live session in `project_path` has a model
    /// different from `exclude_model`.
    pub async fn has_active_session_with_different_model(
        &self,
        project_path: &str,
        exclude_model: &str,
    ) -> Result<bool, StoreError> {
        Ok(!self
            .list_active_sessions_with_different_model(project_path, exclude_model)
            .await?
            .is_empty())
    }

    /// Human-readable summary of different-model session availability, for
    /// the `status`/diagnostics surface.
    pub async fn get_different_model_status(
        &self,
        project_path: &str,
        exclude_model: &str,
    ) -> Result<DifferentModelStatus, StoreError> {
        let sessions = self
            .list_active_sessions_with_different_model(project_path, exclude_model)
            .await?;
        Ok(DifferentModelStatus {
            available: !sessions.is_empty(),
            distinct_models: {
                let mut models: Vec<String> = sessions.into_iter().map(|s| s.model).collect();
                models.sort();
                models.dedup();
                models
            },
        })
    }
}

/// Summary returned by [`Store::get_different_model_status`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DifferentModelStatus {
    /// Whether any live session in the project can satisfy a
    /// different-model review.
    pub available: bool,
    /// The distinct models currently attached, excluding the requestor's.
    pub distinct_models: Vec<String>,
}
