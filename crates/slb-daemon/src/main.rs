use std::os::unix::process::CommandExt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use slb_daemon::{client, pidfile, DaemonPaths};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "slbd", version, about = "Command notary daemon")]
struct Args {
    /// Project root to serve. Defaults to the current directory.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fork, detach from the controlling terminal, and run the service
    /// loop in the background.
    Start,
    /// Run the service loop in the foreground (no forking). Used by
    /// `start`'s child process, and useful directly for debugging.
    Run,
    /// Send SIGTERM to a running daemon for this project and wait for its
    /// PID file to disappear.
    Stop,
    /// Report whether a daemon is running for this project.
    Status,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug { EnvFilter::new("slb=debug") } else { EnvFilter::new("slb=info") };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let project_path = args.project.canonicalize().unwrap_or(args.project.clone());

    match args.command {
        Command::Run => run_foreground(project_path),
        Command::Start => start_detached(project_path),
        Command::Stop => stop(&project_path),
        Command::Status => status(&project_path),
    }
}

fn run_foreground(project_path: PathBuf) -> Result<()> {
    if matches!(std::env::var(DAEMON_MODE_ENV).as_deref(), Ok("1") | Ok("true")) {
        tracing::info!("running as re-exec'd detached daemon");
    }
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().context("building tokio runtime")?;
    runtime.block_on(slb_daemon::run_daemon(project_path)).context("running daemon")
}

/// Environment marker set on the re-exec'd child so it (and anything
/// inspecting its environment) can tell this process is the detached
/// daemon rather than a freshly invoked `slbd run`. `"1"` or `"true"`.
const DAEMON_MODE_ENV: &str = "daemon_mode";

/// Daemonize: fork once, `setsid` in the child to drop the controlling
/// terminal, then re-exec `current_exe() run --project <path>` so the
/// detached process starts with a clean single-threaded image rather than
/// continuing to run inside a process that forked out of a (possibly
/// already multi-threaded) CLI invocation.
fn start_detached(project_path: PathBuf) -> Result<()> {
    let paths = DaemonPaths::for_project(&project_path);
    if let Ok(pid) = pidfile::read_pid_file(&paths.pid_file) {
        if pidfile::process_alive(pid) {
            anyhow::bail!("daemon already running for {} (pid {pid})", project_path.display());
        }
    }

    // SAFETY: fork() is called before any threads are spawned in this
    // process (main() has not yet built a Tokio runtime) and the child
    // re-execs immediately, so no state is shared across the fork besides
    // open file descriptors, which is the intended behavior.
    match unsafe { nix::unistd::fork() }.context("fork")? {
        nix::unistd::ForkResult::Parent { child, .. } => {
            println!("slbd started for {} (pid {child})", project_path.display());
            Ok(())
        }
        nix::unistd::ForkResult::Child => {
            if let Err(e) = nix::unistd::setsid() {
                tracing::warn!(error = %e, "setsid failed, continuing attached to parent session");
            }
            let exe = std::env::current_exe().context("resolving current_exe for re-exec")?;
            let err = std::process::Command::new(exe)
                .arg("run")
                .arg("--project")
                .arg(&project_path)
                .env(DAEMON_MODE_ENV, "1")
                .exec();
            // `exec` only returns on failure; the child never reaches here
            // on success.
            tracing::error!(error = %err, "failed to re-exec into daemon mode");
            std::process::exit(1);
        }
    }
}

fn stop(project_path: &std::path::Path) -> Result<()> {
    let paths = DaemonPaths::for_project(project_path);
    let pid = match pidfile::read_pid_file(&paths.pid_file) {
        Ok(pid) => pid,
        Err(_) => {
            println!("no daemon running for {}", project_path.display());
            return Ok(());
        }
    };
    if !pidfile::process_alive(pid) {
        println!("stale pid file for {} (pid {pid} not running); removing", project_path.display());
        let _ = pidfile::remove_pid_file(&paths.pid_file);
        return Ok(());
    }

    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGTERM).context("sending SIGTERM")?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().context("building tokio runtime")?;
    runtime.block_on(async {
        for _ in 0..50 {
            if !pidfile::process_alive(pid) {
                println!("stopped");
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        println!("daemon did not exit within 5s; it may still be shutting down");
    });
    Ok(())
}

fn status(project_path: &std::path::Path) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().context("building tokio runtime")?;
    let status = runtime.block_on(client::check_status(project_path));
    match status {
        client::DaemonStatus::NotRunning => println!("not running"),
        client::DaemonStatus::Unresponsive { pid } => println!("running (pid {pid}) but not responding on either transport"),
        client::DaemonStatus::Running { via, detail } => {
            println!("running via {via:?}");
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
    }
    Ok(())
}
