//! Durable, transactional store for sessions, requests, and reviews.
//!
//! The Store is the only component that touches durable state. It owns one
//! writer connection, serialized behind a `tokio::sync::Mutex`, and a small
//! pool of read-only connections for concurrent reads that never block a
//! writer. See [`migrations`] for the schema and [`pool`] for the reader
//! pool.
#![deny(unsafe_code)]

mod migrations;
/// Post-execution feedback and analytics queries.
pub mod outcomes;
mod patterns;
mod pool;
mod rate_limit;
/// Request CRUD, search, and status-transition queries.
pub mod requests;
/// Review submission, validation, and quorum evaluation.
pub mod reviews;
mod rows;
/// Session CRUD and different-model helpers.
pub mod sessions;
mod verify;

pub use migrations::SCHEMA_VERSION;
pub use outcomes::{NewOutcome, OutcomeStats, RequestStats, TimeToApprovalStats};
pub use requests::NewRequest;
pub use reviews::{ApprovalStatus, NewReview};
pub use rows::{ReviewCounts, VerificationResult};
pub use sessions::DifferentModelStatus;

use std::path::Path;

use rusqlite::Connection;
use slb_error::{ErrorCode, NotaryError};
use tokio::sync::Mutex as AsyncMutex;

use pool::ReadPool;

/// Error type produced by every fallible [`Store`] operation. An alias of
/// the shared taxonomy so callers handling store errors and protocol/RPC
/// errors go through the same `ErrorCode` match arms.
pub type StoreError = NotaryError;

/// Default number of concurrent read-only connections held by the pool.
pub const DEFAULT_READ_POOL_SIZE: usize = 4;

/// A durable, thread-safe handle to the notary's SQLite-backed state.
///
/// Cheap to clone-by-reference: callers typically hold the `Store` behind
/// an `Arc` shared across the IPC/TCP servers, the reaper, and the
/// notifier. The struct itself has no interior `Arc` — wrap it once at
/// construction time (`slb-daemon` does this).
pub struct Store {
    writer: AsyncMutex<Connection>,
    readers: ReadPool,
    /// Requests-per-window rate limit consulted by request creation;
    /// an ambient policy knob rather than a hardcoded constant, matching
    /// the corpus's preference for configuration over hardcoding.
    rate_limit_per_window: u32,
    rate_limit_window_secs: i64,
}

impl Store {
    /// Open (creating if absent) the database at `path`, applying any
    /// pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_pool_size(path, DEFAULT_READ_POOL_SIZE)
    }

    /// Open the database and additionally fail if its recorded schema
    /// version does not match this binary's [`SCHEMA_VERSION`].
    pub fn open_validate(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self::open(path)?;
        let version = {
            let conn = store.writer.blocking_lock();
            migrations::current_version(&conn).map_err(map_sqlite_err)?
        };
        if version != SCHEMA_VERSION {
            return Err(NotaryError::new(
                ErrorCode::ConfigInvalid,
                format!("database schema version {version} does not match binary's {SCHEMA_VERSION}"),
            ));
        }
        Ok(store)
    }

    fn open_with_pool_size(path: impl AsRef<Path>, pool_size: usize) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut conn = Connection::open(path).map_err(map_sqlite_err)?;
        configure_connection(&conn).map_err(map_sqlite_err)?;
        migrations::apply_pending(&mut conn).map_err(map_sqlite_err)?;

        let readers = ReadPool::open(path, pool_size)?;

        Ok(Self {
            writer: AsyncMutex::new(conn),
            readers,
            rate_limit_per_window: 20,
            rate_limit_window_secs: 60,
        })
    }

    /// Override the sliding-window rate limit consulted by
    /// [`Store::create_request`] (default: 20 requests per 60s per session).
    pub fn with_rate_limit(mut self, per_window: u32, window_secs: i64) -> Self {
        self.rate_limit_per_window = per_window;
        self.rate_limit_window_secs = window_secs;
        self
    }
}

/// Open a store backed by a fresh temp file, for tests across this crate.
#[cfg(test)]
pub(crate) fn open_for_tests() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("state.db");
    let store = Store::open_with_pool_size(&path, 2).expect("open store");
    (dir, store)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.pragma_update(None, "busy_timeout", 5_000)?;
    Ok(())
}

/// Map a `rusqlite::Error` onto the shared error taxonomy. Constraint
/// violations are callers' responsibility to pre-empt or translate
/// (`ActiveSessionExists`, `ReviewExists`); anything reaching here is an
/// opaque storage failure.
pub(crate) fn map_sqlite_err(err: rusqlite::Error) -> NotaryError {
    NotaryError::new(ErrorCode::Internal, "storage error").with_source(err)
}

pub(crate) fn not_found(code: ErrorCode, entity: &str, id: impl std::fmt::Display) -> NotaryError {
    NotaryError::new(code, format!("{entity} {id} not found"))
}
