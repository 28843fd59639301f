//! Unix-socket accept loop: stale-socket cleanup, permission hardening,
//! per-connection `LineCodec` framing, and graceful shutdown.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use slb_protocol::codec::LineCodec;
use slb_protocol::router::{CallContext, Dispatcher};
use slb_protocol::{RpcError, RpcErrorCode, RpcRequest, RpcResponse};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::dispatcher::NotaryDispatcher;

/// How long [`IpcServer::shutdown`] waits for in-flight connections to
/// drain before it returns anyway.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Directory permission bits for the socket's parent directory
/// (`drwxr-x---`).
const SOCKET_DIR_MODE: u32 = 0o750;
/// Socket permission bits (`srw-------`): only the owning user may connect.
const SOCKET_MODE: u32 = 0o600;

/// Errors from binding or running the Unix-socket server.
#[derive(Debug, thiserror::Error)]
pub enum IpcServerError {
    /// Failed to create, chmod, or bind the socket path.
    #[error("failed to bind unix socket at {path}: {source}")]
    Bind {
        /// The socket path that failed to bind.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Owns the bound listener and the shutdown broadcast channel. One
/// `IpcServer` serves exactly one socket path for the lifetime of the
/// daemon process.
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
    dispatcher: Arc<NotaryDispatcher>,
    shutdown_tx: broadcast::Sender<()>,
    next_connection_id: AtomicU64,
    /// Join handles of in-flight per-connection tasks, so `shutdown` can
    /// actually wait for them to finish draining instead of guessing.
    connections: Mutex<Vec<JoinHandle<()>>>,
}

impl IpcServer {
    /// Bind `socket_path`, removing a stale socket file left behind by a
    /// previous, uncleanly terminated daemon. The parent directory is
    /// created with [`SOCKET_DIR_MODE`] if missing; the socket file itself
    /// is chmod'd to [`SOCKET_MODE`] immediately after binding, closing the
    /// default-permissions window other processes could otherwise race.
    pub async fn bind(socket_path: impl AsRef<Path>, dispatcher: Arc<NotaryDispatcher>) -> Result<Self, IpcServerError> {
        let socket_path = socket_path.as_ref().to_path_buf();
        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|source| IpcServerError::Bind { path: socket_path.clone(), source })?;
            let mut perms = tokio::fs::metadata(parent)
                .await
                .map_err(|source| IpcServerError::Bind { path: socket_path.clone(), source })?
                .permissions();
            perms.set_mode(SOCKET_DIR_MODE);
            tokio::fs::set_permissions(parent, perms)
                .await
                .map_err(|source| IpcServerError::Bind { path: socket_path.clone(), source })?;
        }

        if socket_path.exists() {
            tracing::warn!(path = %socket_path.display(), "removing stale socket from previous run");
            let _ = tokio::fs::remove_file(&socket_path).await;
        }

        let listener = UnixListener::bind(&socket_path).map_err(|source| IpcServerError::Bind { path: socket_path.clone(), source })?;

        let mut perms = tokio::fs::metadata(&socket_path)
            .await
            .map_err(|source| IpcServerError::Bind { path: socket_path.clone(), source })?
            .permissions();
        perms.set_mode(SOCKET_MODE);
        tokio::fs::set_permissions(&socket_path, perms)
            .await
            .map_err(|source| IpcServerError::Bind { path: socket_path.clone(), source })?;

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            listener,
            socket_path,
            dispatcher,
            shutdown_tx,
            next_connection_id: AtomicU64::new(1),
            connections: Mutex::new(Vec::new()),
        })
    }

    /// Accept connections until [`IpcServer::shutdown`] is called elsewhere,
    /// spawning one task per connection.
    pub async fn run(&self) {
        loop {
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
                            let dispatcher = self.dispatcher.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            let handle = tokio::spawn(async move {
                                handle_connection(stream, connection_id, dispatcher, shutdown_rx).await;
                            });
                            let mut connections = self.connections.lock().await;
                            connections.retain(|h| !h.is_finished());
                            connections.push(handle);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("ipc server accept loop stopping");
                    break;
                }
            }
        }
    }

    /// Signal every connection handler to stop and remove the socket file.
    /// Waits up to [`SHUTDOWN_GRACE`] for handlers to notice before
    /// returning unconditionally — the caller is shutting down the whole
    /// daemon regardless.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let connections = std::mem::take(&mut *self.connections.lock().await);
        let drain = futures::future::join_all(connections);
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            tracing::warn!("timed out waiting for connections to drain during shutdown");
        }
        let _ = tokio::fs::remove_file(&self.socket_path).await;
    }
}

async fn handle_connection(
    stream: UnixStream,
    connection_id: u64,
    dispatcher: Arc<NotaryDispatcher>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut framed = Framed::new(stream, LineCodec::new());
    let mut event_rx: Option<tokio::sync::mpsc::Receiver<String>> = None;
    let mut subscription_id: Option<u64> = None;

    loop {
        tokio::select! {
            line = framed.next() => {
                let Some(line) = line else { break };
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::debug!(connection_id, error = %e, "line decode error, closing connection");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = handle_line(&line, connection_id, &dispatcher).await;
                if framed.send(response).await.is_err() {
                    break;
                }
                if event_rx.is_none() {
                    if let Some((id, rx)) = dispatcher.take_pending_receiver(connection_id).await {
                        subscription_id = Some(id);
                        event_rx = Some(rx);
                    }
                }
            }
            Some(event_line) = recv_optional(&mut event_rx) => {
                if framed.send(event_line).await.is_err() {
                    break;
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }

    if let Some(subscription_id) = subscription_id {
        dispatcher.remove_subscriber(subscription_id).await;
    }
}

/// `tokio::select!` needs a future even when there is no active
/// subscription yet; this yields Pending forever on `None` so that branch
/// never wins the race until a receiver exists.
async fn recv_optional(rx: &mut Option<tokio::sync::mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_line(line: &str, connection_id: u64, dispatcher: &NotaryDispatcher) -> String {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            let error = RpcError::new(RpcErrorCode::ParseError, e.to_string());
            let response = RpcResponse::err(serde_json::Value::Null, error);
            return serde_json::to_string(&response).unwrap_or_default();
        }
    };

    let ctx = CallContext { connection_id };
    let response = match dispatcher.dispatch(ctx, &request.method, request.params).await {
        Ok(result) => RpcResponse::ok(request.id, result),
        Err(error) => RpcResponse::err(request.id, error),
    };
    serde_json::to_string(&response).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::NotaryDispatcher;
    use slb_store::Store;
    use slb_verifier::Verifier;
    use std::io::Write as _;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    async fn test_server() -> (tempfile::TempDir, PathBuf, Arc<IpcServer>) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db");
        let store = Arc::new(Store::open(db_path).unwrap());
        let verifier = Verifier::new(store.clone());
        let dispatcher = Arc::new(NotaryDispatcher::new(store, verifier));
        let socket_path = dir.path().join("slb.sock");
        let server = Arc::new(IpcServer::bind(&socket_path, dispatcher).await.unwrap());
        (dir, socket_path, server)
    }

    #[tokio::test]
    async fn bind_creates_socket_with_restrictive_permissions() {
        let (_dir, socket_path, _server) = test_server().await;
        let meta = tokio::fs::metadata(&socket_path).await.unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, SOCKET_MODE);
    }

    #[tokio::test]
    async fn bind_removes_a_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("slb.sock");
        std::fs::File::create(&socket_path).unwrap().write_all(b"stale").unwrap();

        let store = Arc::new(Store::open(dir.path().join("state.db")).unwrap());
        let verifier = Verifier::new(store.clone());
        let dispatcher = Arc::new(NotaryDispatcher::new(store, verifier));
        IpcServer::bind(&socket_path, dispatcher).await.unwrap();
    }

    #[tokio::test]
    async fn ping_round_trips_over_the_socket() {
        let (_dir, socket_path, server) = test_server().await;
        let server_task = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"{\"method\":\"ping\",\"id\":1}\n").await.unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response: RpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.result, Some(serde_json::json!({"pong": true})));

        server.shutdown().await;
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn unknown_method_yields_method_not_found() {
        let (_dir, socket_path, server) = test_server().await;
        let server_task = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"{\"method\":\"bogus\",\"id\":1}\n").await.unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response: RpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.error.unwrap().code, RpcErrorCode::MethodNotFound.code());

        server.shutdown().await;
        let _ = server_task.await;
    }
}
