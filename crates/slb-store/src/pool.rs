//! Read-only connection pool.
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, so a single shared
//! connection cannot serve concurrent readers. Many concurrent readers
//! should not block writers; this wraps `r2d2` with `r2d2_sqlite`'s
//! connection manager, opening every pooled connection read-only.
//! `r2d2::Pool::get` blocks the calling thread, so checkout runs on a
//! blocking-pool thread rather than stalling a tokio worker.

use std::path::Path;

use r2d2_sqlite::rusqlite::OpenFlags;
use r2d2_sqlite::SqliteConnectionManager;
use slb_error::ErrorCode;

use crate::StoreError;

pub(crate) type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

pub(crate) struct ReadPool {
    pool: r2d2::Pool<SqliteConnectionManager>,
}

impl ReadPool {
    pub(crate) fn open(path: &Path, size: usize) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
            .with_init(|conn| conn.pragma_update(None, "busy_timeout", 5_000));
        let pool = r2d2::Pool::builder().max_size(size as u32).build(manager).map_err(map_pool_err)?;
        Ok(Self { pool })
    }

    /// Check out one reader, blocking (on a blocking-pool thread) until a
    /// connection is free.
    pub(crate) async fn checkout(&self) -> Result<PooledConnection, StoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || pool.get())
            .await
            .expect("read pool checkout task panicked")
            .map_err(map_pool_err)
    }
}

fn map_pool_err(err: r2d2::Error) -> StoreError {
    StoreError::new(ErrorCode::Internal, "read pool error").with_source(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection as RusqliteConnection;

    fn prepared_db() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let conn = RusqliteConnection::open(&path).unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", []).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn checkout_returns_a_working_read_only_connection() {
        let (_dir, path) = prepared_db();
        let pool = ReadPool::open(&path, 2).unwrap();
        let conn = pool.checkout().await.unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn pool_serves_more_checkouts_than_its_size_sequentially() {
        let (_dir, path) = prepared_db();
        let pool = ReadPool::open(&path, 1).unwrap();
        for _ in 0..3 {
            let conn = pool.checkout().await.unwrap();
            conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get::<_, i64>(0)).unwrap();
        }
    }
}
