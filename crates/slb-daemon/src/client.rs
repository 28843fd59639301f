//! A minimal line-oriented client for the daemon's own `status`
//! subcommand: connect over Unix socket, send one `ping` (or `status`)
//! request, print the response, disconnect.
//!
//! This is intentionally not a general-purpose RPC client — that is
//! `slb-cli`'s job. This one exists so `slbd status` can answer "is the
//! daemon for this project actually alive and responding" without
//! shelling out to a separate binary.

use std::path::Path;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};

use crate::pidfile;

/// Env var naming a remote daemon's `host:port` for TCP discovery.
const HOST_ENV: &str = "host";
/// Env var carrying the hex session key to present in the TCP auth
/// handshake.
const SESSION_KEY_ENV: &str = "session_key";

/// Errors querying a running daemon over its Unix socket.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Could not connect to the socket (daemon not running, or stale
    /// socket file left by a crashed process).
    #[error("failed to connect to {path}: {source}")]
    Connect {
        /// Socket path that refused the connection.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The connection dropped before a response line arrived.
    #[error("connection closed before a response was received")]
    ClosedEarly,
    /// I/O failure writing the request or reading the response.
    #[error("i/o error talking to daemon: {0}")]
    Io(#[from] std::io::Error),
    /// The response was not valid JSON.
    #[error("invalid response json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Send `{"method": "status"}` over the Unix socket at `socket_path` and
/// return the raw response JSON.
pub async fn query_status(socket_path: &Path) -> Result<Value, ClientError> {
    call_unix(socket_path, "status", None).await
}

/// Send `{"method": "ping"}` over the Unix socket at `socket_path`.
pub async fn ping(socket_path: &Path) -> Result<Value, ClientError> {
    call_unix(socket_path, "ping", None).await
}

async fn call_unix(socket_path: &Path, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|source| ClientError::Connect { path: socket_path.display().to_string(), source })?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    request_response(&mut reader, &mut write_half, method, params).await
}

/// Complete the auth handshake then send `{"method": "ping"}` over TCP at
/// `addr`, presenting `session_key` in the handshake line.
async fn ping_tcp(addr: &str, session_key: &str) -> Result<Value, ClientError> {
    let stream = TcpStream::connect(addr).await.map_err(|source| ClientError::Connect { path: addr.to_string(), source })?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    let mut handshake = serde_json::to_string(&json!({"auth": session_key}))?;
    handshake.push('\n');
    writer.write_all(handshake.as_bytes()).await?;

    request_response(&mut reader, &mut writer, "ping", None).await
}

async fn request_response<R, W>(reader: &mut BufReader<R>, writer: &mut W, method: &str, params: Option<Value>) -> Result<Value, ClientError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let request = json!({"method": method, "params": params, "id": 1});
    let mut line = serde_json::to_string(&request)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;

    let mut response_line = String::new();
    let bytes_read = reader.read_line(&mut response_line).await?;
    if bytes_read == 0 {
        return Err(ClientError::ClosedEarly);
    }
    Ok(serde_json::from_str(response_line.trim_end())?)
}

/// Which transport answered a [`DaemonStatus::Running`] check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// A remote daemon answered over the authenticated TCP frontend.
    Tcp,
    /// The local daemon answered over its Unix socket.
    Unix,
}

/// High-level result of a `slbd status` / `Client.GetStatus` check.
#[derive(Debug)]
pub enum DaemonStatus {
    /// Neither transport answered and no PID file (or a stale one) exists.
    NotRunning,
    /// A PID file names a live process, but neither transport answered —
    /// likely still starting up, or wedged.
    Unresponsive {
        /// The daemon's process id, from the PID file.
        pid: u32,
    },
    /// A transport answered a `ping`.
    Running {
        /// Which transport answered.
        via: Transport,
        /// The raw `ping` (TCP) or `status` (Unix) response.
        detail: Value,
    },
}

/// Determine [`DaemonStatus`] for `project_path`, following the same
/// discovery order a client would: TCP first (if `host`/`session_key` are
/// set in the environment), then the local Unix socket, then falling back
/// to a bare PID-file liveness probe.
pub async fn check_status(project_path: &Path) -> DaemonStatus {
    if let Ok(host) = std::env::var(HOST_ENV) {
        let session_key = std::env::var(SESSION_KEY_ENV).unwrap_or_default();
        if let Ok(detail) = ping_tcp(&host, &session_key).await {
            return DaemonStatus::Running { via: Transport::Tcp, detail };
        }
    }

    let paths = crate::paths::DaemonPaths::for_project(project_path);
    if let Ok(detail) = query_status(&paths.socket_path).await {
        return DaemonStatus::Running { via: Transport::Unix, detail };
    }

    match pidfile::read_pid_file(&paths.pid_file) {
        Ok(pid) if pidfile::process_alive(pid) => DaemonStatus::Unresponsive { pid },
        _ => DaemonStatus::NotRunning,
    }
}
