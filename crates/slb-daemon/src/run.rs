//! Wires the store, verifier, background tasks, and front-door servers
//! together for one project, and runs until a shutdown signal arrives.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use slb_ipc::{IpcServer, NotaryDispatcher};
use slb_notify::{platform_notifier, NotifierConfig, NotifierHandle};
use slb_reaper::{ReaperHandle, TimeoutAction};
use slb_store::Store;
use slb_tcp::TcpServer;
use slb_verifier::Verifier;
use slb_watcher::FsWatcher;
use tokio::signal::unix::{signal, SignalKind};

use crate::paths::DaemonPaths;
use crate::pidfile;

/// How often the reaper sweeps for expired/stale requests and sessions.
const REAPER_INTERVAL: Duration = Duration::from_secs(30);
/// How often the watcher debounces filesystem events into store reloads.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(100);

/// Errors standing up or running the daemon's service loop.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Failed to open the SQLite store.
    #[error("failed to open store: {0}")]
    Store(#[from] slb_store::StoreError),
    /// Failed to load the project's `.slb/config.toml`.
    #[error("failed to load config: {0}")]
    Config(#[from] slb_config::ConfigError),
    /// Failed to write the PID file.
    #[error("failed to write pid file: {0}")]
    PidFile(#[from] pidfile::PidFileError),
    /// Failed to bind the Unix-socket IPC server.
    #[error("failed to bind ipc server: {0}")]
    Ipc(#[from] slb_ipc::IpcServerError),
    /// Failed to bind the optional TCP frontend.
    #[error("failed to bind tcp server: {0}")]
    Tcp(#[from] slb_tcp::TcpServerError),
    /// Failed to start the filesystem watcher.
    #[error("failed to start watcher: {0}")]
    Watch(#[from] slb_watcher::WatchError),
    /// Failed to register a Unix signal handler.
    #[error("failed to register signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

/// Run the notary daemon for `project_path` until SIGINT/SIGTERM, in the
/// calling task. The caller is responsible for daemonizing (or not)
/// beforehand; this function assumes it already owns the process.
pub async fn run_daemon(project_path: PathBuf) -> Result<(), RunError> {
    let paths = DaemonPaths::for_project(&project_path);
    pidfile::write_pid_file(&paths.pid_file, std::process::id())?;

    let result = run_daemon_inner(&project_path, &paths).await;

    let _ = pidfile::remove_pid_file(&paths.pid_file);
    result
}

async fn run_daemon_inner(project_path: &Path, paths: &DaemonPaths) -> Result<(), RunError> {
    let (config, warnings) = slb_config::load_project_config(project_path)?;
    for warning in &warnings {
        tracing::warn!(%warning, "configuration warning");
    }

    let state_dir = project_path.join(".slb");
    let store = Arc::new(Store::open_validate(state_dir.join("state.db"))?);
    let verifier = Verifier::new(store.clone());

    let timeout_action = TimeoutAction::from_str(&config.general.timeout_action).unwrap_or(TimeoutAction::Escalate);
    let reaper = ReaperHandle::new();
    reaper.start(store.clone(), REAPER_INTERVAL, timeout_action)?;

    let notifier = NotifierHandle::new();
    let notifier_config = NotifierConfig {
        scan_interval: slb_notify::DEFAULT_SCAN_INTERVAL,
        desktop_delay: Duration::from_secs(config.notifications.desktop_delay_seconds),
        desktop_enabled: config.notifications.desktop_enabled,
        webhook_url: config.notifications.webhook_url.clone(),
    };
    notifier.start(store.clone(), Arc::from(platform_notifier()), reqwest::Client::new(), notifier_config)?;

    let mut watcher = FsWatcher::start(state_dir.clone(), WATCH_DEBOUNCE)?;
    let watch_log_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = watcher.events().recv() => {
                    tracing::debug!(path = %event.path.display(), op = ?event.op, "state directory change observed");
                }
                Some(err) = watcher.errors().recv() => {
                    tracing::warn!(error = %err, "filesystem watch error");
                }
                else => break,
            }
        }
        watcher.stop();
    });

    let dispatcher = Arc::new(NotaryDispatcher::new(store.clone(), verifier));
    let ipc_server = Arc::new(IpcServer::bind(&paths.socket_path, dispatcher.clone()).await?);

    let tcp_server = match &config.daemon.tcp_addr {
        Some(addr) => {
            let server = TcpServer::bind(addr, dispatcher.clone(), store.clone(), &config.daemon.tcp_allowed_ips, config.daemon.tcp_require_auth).await?;
            Some(Arc::new(server))
        }
        None => None,
    };

    let ipc_task = {
        let server = ipc_server.clone();
        tokio::spawn(async move { server.run().await })
    };
    let tcp_task = tcp_server.clone().map(|server| tokio::spawn(async move { server.run().await }));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
    }

    ipc_server.shutdown().await;
    if let Some(server) = &tcp_server {
        server.shutdown();
    }
    ipc_task.abort();
    if let Some(task) = tcp_task {
        task.abort();
    }
    watch_log_task.abort();

    notifier.stop().await;
    reaper.stop().await;

    Ok(())
}
