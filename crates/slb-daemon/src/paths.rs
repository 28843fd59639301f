//! PID file and socket path derivation.
//!
//! Both default under `std::env::temp_dir()`, named from a hash of the
//! project's absolute path so multiple projects can each run a daemon
//! concurrently without colliding on a single well-known path.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// The PID file and socket path for one project's daemon.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    /// `<tmp>/slb-<hash>.pid`
    pub pid_file: PathBuf,
    /// `<tmp>/slb-<hash>.sock`
    pub socket_path: PathBuf,
}

impl DaemonPaths {
    /// Derive paths for `project_path`. Two different project paths
    /// collide only in the astronomically unlikely event of a SHA-256
    /// prefix collision.
    pub fn for_project(project_path: &Path) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(project_path.to_string_lossy().as_bytes());
        let digest = hasher.finalize();
        let short_hash = hex_prefix(&digest, 16);

        let tmp = std::env::temp_dir();
        Self {
            pid_file: tmp.join(format!("slb-{short_hash}.pid")),
            socket_path: tmp.join(format!("slb-{short_hash}.sock")),
        }
    }
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut s = String::with_capacity(chars);
    for byte in bytes {
        if s.len() >= chars {
            break;
        }
        s.push_str(&format!("{byte:02x}"));
    }
    s.truncate(chars);
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_project_path_yields_stable_paths() {
        let a = DaemonPaths::for_project(Path::new("/repo/one"));
        let b = DaemonPaths::for_project(Path::new("/repo/one"));
        assert_eq!(a.pid_file, b.pid_file);
        assert_eq!(a.socket_path, b.socket_path);
    }

    #[test]
    fn different_project_paths_yield_different_paths() {
        let a = DaemonPaths::for_project(Path::new("/repo/one"));
        let b = DaemonPaths::for_project(Path::new("/repo/two"));
        assert_ne!(a.pid_file, b.pid_file);
    }

    #[test]
    fn paths_live_under_the_temp_dir_with_expected_extensions() {
        let paths = DaemonPaths::for_project(Path::new("/repo/one"));
        assert_eq!(paths.pid_file.parent(), Some(std::env::temp_dir().as_path()));
        assert_eq!(paths.pid_file.extension().and_then(|e| e.to_str()), Some("pid"));
        assert_eq!(paths.socket_path.extension().and_then(|e| e.to_str()), Some("sock"));
    }
}
