//! Authenticated TCP accept loop: CIDR allowlist, then the auth handshake,
//! then the same per-line dispatch the IPC server uses.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use slb_protocol::codec::LineCodec;
use slb_protocol::router::{CallContext, Dispatcher};
use slb_protocol::{RpcError, RpcErrorCode, RpcRequest, RpcResponse};
use slb_store::Store;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;

use crate::auth::{validate_session_key, AuthHandshake};
use crate::cidr::Allowlist;

/// Errors from binding the TCP frontend.
#[derive(Debug, thiserror::Error)]
pub enum TcpServerError {
    /// Failed to bind `addr`.
    #[error("failed to bind tcp listener at {addr}: {source}")]
    Bind {
        /// The address that failed to bind.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// The optional authenticated TCP frontend. Shares its dispatch table with
/// `slb-ipc` via the `Dispatcher` trait object rather than owning its own
/// method table.
pub struct TcpServer {
    listener: TcpListener,
    dispatcher: Arc<dyn Dispatcher>,
    store: Arc<Store>,
    allowlist: Allowlist,
    require_auth: bool,
    shutdown_tx: broadcast::Sender<()>,
    next_connection_id: AtomicU64,
}

impl TcpServer {
    /// Bind `addr`. `require_auth = false` is accepted (and logged loudly,
    /// matching `slb-config`'s `TcpAuthDisabled` warning) but strongly
    /// discouraged: any allowlisted address can issue commands with no
    /// session-key check at all.
    pub async fn bind(
        addr: &str,
        dispatcher: Arc<dyn Dispatcher>,
        store: Arc<Store>,
        allowed_ips: &[String],
        require_auth: bool,
    ) -> Result<Self, TcpServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TcpServerError::Bind { addr: addr.to_string(), source })?;
        if !require_auth {
            tracing::warn!(addr, "tcp frontend bound with authentication disabled");
        }
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            listener,
            dispatcher,
            store,
            allowlist: Allowlist::parse(allowed_ips),
            require_auth,
            shutdown_tx,
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Accept connections until [`TcpServer::shutdown`] is called.
    pub async fn run(&self) {
        loop {
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            if !self.allowlist.allows(peer_addr.ip()) {
                                tracing::warn!(%peer_addr, "rejecting tcp connection from address outside allowlist");
                                continue;
                            }
                            let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
                            let dispatcher = self.dispatcher.clone();
                            let store = self.store.clone();
                            let require_auth = self.require_auth;
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                handle_connection(stream, peer_addr, connection_id, dispatcher, store, require_auth, shutdown_rx).await;
                            });
                        }
                        Err(e) => tracing::warn!(error = %e, "tcp accept failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("tcp server accept loop stopping");
                    break;
                }
            }
        }
    }

    /// Signal every connection handler to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    connection_id: u64,
    dispatcher: Arc<dyn Dispatcher>,
    store: Arc<Store>,
    require_auth: bool,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut framed = Framed::new(stream, LineCodec::new());

    if require_auth {
        let Some(Ok(line)) = framed.next().await else {
            tracing::debug!(%peer_addr, "connection closed before auth handshake");
            return;
        };
        let handshake = serde_json::from_str::<AuthHandshake>(&line).ok();
        let ok = match handshake {
            Some(h) => validate_session_key(&store, &h.auth).await,
            None => false,
        };
        if !ok {
            tracing::warn!(%peer_addr, "tcp auth handshake failed");
            let _ = framed.send("{\"error\":\"authentication failed\"}".to_string()).await;
            return;
        }
        let _ = framed.send("{\"authenticated\":true}".to_string()).await;
    }

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
                let response = handle_line(&line, connection_id, dispatcher.as_ref()).await;
                if framed.send(response).await.is_err() {
                    break;
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

async fn handle_line(line: &str, connection_id: u64, dispatcher: &dyn Dispatcher) -> String {
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
    use slb_ipc::NotaryDispatcher;
    use slb_verifier::Verifier;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    async fn test_server(allowed_ips: &[String], require_auth: bool) -> (tempfile::TempDir, String, Arc<TcpServer>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("state.db")).unwrap());
        let verifier = Verifier::new(store.clone());
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(NotaryDispatcher::new(store.clone(), verifier));
        let server = TcpServer::bind("127.0.0.1:0", dispatcher, store, allowed_ips, require_auth).await.unwrap();
        let addr = server.listener.local_addr().unwrap().to_string();
        (dir, addr, Arc::new(server))
    }

    #[tokio::test]
    async fn connection_from_unallowed_address_gets_no_response() {
        // 127.0.0.1 itself is never in the allowlist here, so the accept
        // loop silently drops the connection without completing any
        // handshake.
        let (_dir, addr, server) = test_server(&["10.0.0.0/8".to_string()], true).await;
        let server_task = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });

        let mut stream = TcpStream::connect(&addr).await.unwrap();
        stream.write_all(b"{\"auth\":\"whatever\"}\n").await.unwrap();
        let mut reader = BufReader::new(&mut stream);
        let mut line = String::new();
        let n = tokio::time::timeout(std::time::Duration::from_millis(200), reader.read_line(&mut line)).await;
        assert!(n.is_err() || matches!(n, Ok(Ok(0))));

        server.shutdown();
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn wrong_session_key_is_rejected() {
        let (_dir, addr, server) = test_server(&["127.0.0.1/32".to_string()], true).await;
        let server_task = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });

        let mut stream = TcpStream::connect(&addr).await.unwrap();
        stream.write_all(b"{\"auth\":\"bogus-key\"}\n").await.unwrap();
        let mut reader = BufReader::new(&mut stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.contains("error"));

        server.shutdown();
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn valid_session_key_authenticates_then_dispatches() {
        let (_dir, addr, server) = test_server(&["127.0.0.1/32".to_string()], true).await;
        let key = server.store.create_session("claude", "claude-code", "opus-4", "/repo").await.unwrap().session_key;
        let server_task = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });

        let mut stream = TcpStream::connect(&addr).await.unwrap();
        stream.write_all(format!("{{\"auth\":\"{key}\"}}\n").as_bytes()).await.unwrap();
        let mut reader = BufReader::new(&mut stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.contains("authenticated"));

        stream.write_all(b"{\"method\":\"ping\",\"id\":1}\n").await.unwrap();
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        let response: RpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.result, Some(serde_json::json!({"pong": true})));

        server.shutdown();
        let _ = server_task.await;
    }
}
