//! PID file lifecycle: write on daemon start, probe for liveness, remove
//! on clean shutdown.

use std::path::Path;

use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Errors reading, writing, or removing a PID file.
#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    /// I/O failure reading or writing the file itself.
    #[error("pid file i/o error at {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file's contents were not a valid decimal PID.
    #[error("pid file at {path} contains invalid content")]
    Corrupt {
        /// Path that failed to parse.
        path: String,
    },
}

/// Write `pid` to `path` as an ASCII decimal, trailing newline.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<(), PidFileError> {
    std::fs::write(path, format!("{pid}\n")).map_err(|source| PidFileError::Io { path: path.display().to_string(), source })
}

/// Read the PID recorded at `path`.
pub fn read_pid_file(path: &Path) -> Result<u32, PidFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| PidFileError::Io { path: path.display().to_string(), source })?;
    content.trim().parse::<u32>().map_err(|_| PidFileError::Corrupt { path: path.display().to_string() })
}

/// Remove the PID file if present. Missing is not an error — the daemon
/// may be cleaning up after a previous run that never wrote one.
pub fn remove_pid_file(path: &Path) -> Result<(), PidFileError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PidFileError::Io { path: path.display().to_string(), source }),
    }
}

/// Probe whether `pid` names a live process via a signal-0 send. Does not
/// actually deliver a signal; `kill` with `None` only checks permission and
/// existence.
pub fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}
