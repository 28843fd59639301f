//! slb-daemon
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The command notary daemon: PID/socket path derivation, PID file
//! lifecycle, fork/detach for `start`, the service loop wiring the store
//! to the reaper, notifier, watcher, and front-door servers, and a thin
//! status-check client. `src/main.rs` is a thin CLI shell over this
//! library so the wiring can be exercised in tests without forking.

/// PID file and socket path derivation from a project path.
pub mod paths;
/// PID file read/write/remove and liveness probing.
pub mod pidfile;
/// The daemon's service loop: store, verifier, background tasks, servers.
pub mod run;
/// A minimal client for `slbd status`.
pub mod client;

pub use paths::DaemonPaths;
pub use run::{run_daemon, RunError};
