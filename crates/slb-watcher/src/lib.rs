//! Debounced filesystem watcher over a project's `.slb` state directory.
//!
//! Wraps `notify`'s raw, synchronously-delivered events in a hand-rolled
//! debouncer: a per-path op-mask accumulator, reset on every new event for
//! that path and flushed once the debounce window elapses with no further
//! activity. Only `state.db`/`-wal`/`-shm` and the `pending/`/`sessions/`
//! directories are watched — everything else under `.slb/` is filtered out
//! at the raw-event callback before it ever reaches the debouncer.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default debounce window: flush a path's accumulated ops after this much
/// quiet time.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Bitwise-OR-able operation kinds. Coalescing N raw events on one path
/// within the debounce window into a single flush unions their op-masks
/// rather than emitting one event per raw change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpMask(u8);

impl OpMask {
    /// No operation recorded yet.
    pub const NONE: OpMask = OpMask(0);
    /// A file or directory was created.
    pub const CREATE: OpMask = OpMask(1 << 0);
    /// A file's contents or metadata were written.
    pub const WRITE: OpMask = OpMask(1 << 1);
    /// A file or directory was removed.
    pub const REMOVE: OpMask = OpMask(1 << 2);
    /// A file or directory was renamed (notify's `Modify(Name(_))`).
    pub const RENAME: OpMask = OpMask(1 << 3);
    /// Permissions or other metadata changed.
    pub const CHMOD: OpMask = OpMask(1 << 4);

    /// Build a mask from a raw `notify::EventKind`. Event kinds this
    /// watcher doesn't care about (e.g. `Other`) map to [`OpMask::NONE`].
    pub fn from_event_kind(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => Self::CREATE,
            EventKind::Modify(notify::event::ModifyKind::Name(_)) => Self::RENAME,
            EventKind::Modify(notify::event::ModifyKind::Metadata(_)) => Self::CHMOD,
            EventKind::Modify(_) => Self::WRITE,
            EventKind::Remove(_) => Self::REMOVE,
            _ => Self::NONE,
        }
    }

    /// `true` if no bit is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// `true` if `other`'s bits are a subset of this mask.
    pub fn contains(self, other: OpMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpMask {
    type Output = OpMask;
    fn bitor(self, rhs: Self) -> Self::Output {
        OpMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for OpMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One coalesced, debounced filesystem change.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// The path that changed.
    pub path: PathBuf,
    /// The union of every operation observed on `path` during the
    /// debounce window.
    pub op: OpMask,
}

/// Errors surfaced on the watcher's error channel.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The underlying `notify` backend reported an error.
    #[error("filesystem watch error: {0}")]
    Notify(#[from] notify::Error),
}

/// Bound on the error channel; `sendError` on a full buffer drops the
/// error silently rather than blocking the raw-event callback.
const ERROR_BUFFER: usize = 64;

/// Does `path` fall under one of the names this watcher cares about
/// (`state.db` and its WAL/SHM siblings, or anything inside `pending/` or
/// `sessions/`)? Everything else under `.slb/` is noise — lock files,
/// editor swap files, the config TOML being re-saved — and is dropped
/// before it ever reaches the debouncer.
fn is_watched_path(path: &Path) -> bool {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if matches!(file_name, "state.db" | "state.db-wal" | "state.db-shm") {
        return true;
    }
    path.ancestors().skip(1).any(|ancestor| matches!(ancestor.file_name().and_then(|n| n.to_str()), Some("pending") | Some("sessions")))
}

struct Debouncer {
    pending_ops: Mutex<HashMap<PathBuf, OpMask>>,
    timers: Mutex<HashMap<PathBuf, JoinHandle<()>>>,
    events_tx: mpsc::UnboundedSender<WatchEvent>,
    window: Duration,
    runtime: tokio::runtime::Handle,
}

impl Debouncer {
    fn record(self: &Arc<Self>, path: PathBuf, op: OpMask) {
        {
            let mut pending = self.pending_ops.lock().expect("debouncer mutex poisoned");
            *pending.entry(path.clone()).or_insert(OpMask::NONE) |= op;
        }

        let mut timers = self.timers.lock().expect("debouncer mutex poisoned");
        if let Some(previous) = timers.remove(&path) {
            previous.abort();
        }

        let this = self.clone();
        let flush_path = path.clone();
        let window = self.window;
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(window).await;
            this.flush(&flush_path);
        });
        timers.insert(path, handle);
    }

    fn flush(&self, path: &Path) {
        let op = { self.pending_ops.lock().expect("debouncer mutex poisoned").remove(path) };
        self.timers.lock().expect("debouncer mutex poisoned").remove(path);
        if let Some(op) = op {
            let _ = self.events_tx.send(WatchEvent { path: path.to_path_buf(), op });
        }
    }
}

/// A running debounced watch over one project's `.slb` directory.
///
/// Dropping this stops the underlying `notify` watch and aborts any
/// pending debounce timers.
pub struct FsWatcher {
    _inner: Option<RecommendedWatcher>,
    events_rx: mpsc::UnboundedReceiver<WatchEvent>,
    errors_rx: mpsc::Receiver<WatchError>,
}

impl FsWatcher {
    /// Start watching `slb_dir` (a project's `.slb` directory) with the
    /// given debounce window. Must be called from within a Tokio runtime —
    /// the debouncer schedules its per-path timers onto the calling
    /// runtime's handle.
    pub fn start(slb_dir: impl Into<PathBuf>, window: Duration) -> Result<Self, WatchError> {
        let slb_dir = slb_dir.into();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_BUFFER);

        let debouncer = Arc::new(Debouncer {
            pending_ops: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            events_tx,
            window,
            runtime: tokio::runtime::Handle::current(),
        });

        let watcher_debouncer = debouncer.clone();
        let mut inner = notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                let op = OpMask::from_event_kind(&event.kind);
                if op.is_empty() {
                    return;
                }
                for path in event.paths.iter().filter(|p| is_watched_path(p)) {
                    watcher_debouncer.record(path.clone(), op);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "filesystem watch error");
                if errors_tx.try_send(WatchError::Notify(e)).is_err() {
                    tracing::warn!("watch error buffer full, dropping error");
                }
            }
        })?;
        inner.watch(&slb_dir, RecursiveMode::Recursive)?;
        tracing::debug!(path = %slb_dir.display(), window_ms = window.as_millis(), "filesystem watch started");

        Ok(Self { _inner: Some(inner), events_rx, errors_rx })
    }

    /// A watcher that never starts: a stand-in for the "no directory to
    /// watch" / "watching disabled" case. Its channels are already closed,
    /// matching the Go idiom of a nil channel reporting closed rather than
    /// blocking forever.
    pub fn closed() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_BUFFER);
        drop(events_tx);
        drop(errors_tx);
        Self { _inner: None, events_rx, errors_rx }
    }

    /// The coalesced event stream. Closes when the watcher is dropped or
    /// stopped.
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<WatchEvent> {
        &mut self.events_rx
    }

    /// The error stream, bounded to [`ERROR_BUFFER`]. A full buffer drops
    /// the error silently rather than applying backpressure to the
    /// `notify` callback thread.
    pub fn errors(&mut self) -> &mut mpsc::Receiver<WatchError> {
        &mut self.errors_rx
    }

    /// Stop watching. Equivalent to dropping the watcher, spelled out for
    /// call sites that want to be explicit about lifecycle.
    pub fn stop(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_mask_unions_bits() {
        let combined = OpMask::CREATE | OpMask::WRITE;
        assert!(combined.contains(OpMask::CREATE));
        assert!(combined.contains(OpMask::WRITE));
        assert!(!combined.contains(OpMask::REMOVE));
    }

    #[test]
    fn watched_path_matches_state_db_and_its_wal_shm_siblings() {
        assert!(is_watched_path(Path::new("/repo/.slb/state.db")));
        assert!(is_watched_path(Path::new("/repo/.slb/state.db-wal")));
        assert!(is_watched_path(Path::new("/repo/.slb/state.db-shm")));
        assert!(!is_watched_path(Path::new("/repo/.slb/config.toml")));
    }

    #[test]
    fn watched_path_matches_pending_and_sessions_subtrees() {
        assert!(is_watched_path(Path::new("/repo/.slb/pending/abc123.json")));
        assert!(is_watched_path(Path::new("/repo/.slb/sessions/xyz.json")));
        assert!(!is_watched_path(Path::new("/repo/.slb/logs/daemon.log")));
    }

    #[tokio::test]
    async fn closed_watcher_channels_are_already_closed() {
        let mut watcher = FsWatcher::closed();
        assert!(watcher.events().recv().await.is_none());
        assert!(watcher.errors().recv().await.is_none());
    }

    #[tokio::test]
    async fn rapid_events_on_one_path_coalesce_into_one_flush() {
        let dir = tempfile::tempdir().unwrap();
        let pending_dir = dir.path().join("pending");
        std::fs::create_dir_all(&pending_dir).unwrap();

        let mut watcher = FsWatcher::start(dir.path(), Duration::from_millis(30)).unwrap();
        let file_path = pending_dir.join("req.json");

        std::fs::write(&file_path, b"{}").unwrap();
        std::fs::write(&file_path, b"{\"a\":1}").unwrap();
        std::fs::remove_file(&file_path).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), watcher.events().recv()).await.unwrap().unwrap();
        assert_eq!(event.path, file_path);
        assert!(event.op.contains(OpMask::CREATE) || event.op.contains(OpMask::WRITE) || event.op.contains(OpMask::REMOVE));
    }

    #[tokio::test]
    async fn unwatched_files_produce_no_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = FsWatcher::start(dir.path(), Duration::from_millis(30)).unwrap();
        std::fs::write(dir.path().join("config.toml"), b"ignored").unwrap();

        let result = tokio::time::timeout(Duration::from_millis(300), watcher.events().recv()).await;
        assert!(result.is_err(), "unwatched file change should not produce an event");
    }
}
