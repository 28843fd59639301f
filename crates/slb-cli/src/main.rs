mod rpc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use slb_daemon::DaemonPaths;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Minimal scriptable client for the command notary daemon. Not the
/// agent-facing CLI or interactive TUI — just enough surface to drive
/// `slbd` from a shell or a smoke-test script.
#[derive(Parser, Debug)]
#[command(name = "slb", version, about = "Command notary client")]
struct Args {
    /// Project root whose daemon to talk to. Defaults to the current
    /// directory.
    #[arg(long, global = true, default_value = ".")]
    project: std::path::PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Liveness check.
    Ping,
    /// Daemon uptime and counters.
    Status,
    /// Submit a new command request.
    Request(RequestArgs),
    /// Approve or reject a pending request.
    Review {
        /// The request id to review.
        id: Uuid,
        /// The decision.
        decision: Decision,
        /// Reviewing session id.
        #[arg(long)]
        session: Uuid,
        /// Reviewing agent's name.
        #[arg(long)]
        agent: String,
        /// Reviewing agent's model.
        #[arg(long)]
        model: String,
        /// Hex HMAC signature over `request_id || decision || timestamp`.
        #[arg(long)]
        signature: String,
        /// Optional free-text comment.
        #[arg(long)]
        comment: Option<String>,
    },
    /// Atomically mark an approved request as executing, for the calling
    /// executor session. Does not itself run the command — that remains
    /// the caller's responsibility.
    Exec {
        /// The request id to execute.
        id: Uuid,
        /// Executor session id.
        #[arg(long)]
        session: Uuid,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Decision {
    Approve,
    Reject,
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// The raw command string.
    command: String,
    /// Requesting session id (must already exist — `slb` has no
    /// session-creation RPC of its own).
    #[arg(long)]
    session: Uuid,
    /// Requesting agent's name.
    #[arg(long)]
    agent: String,
    /// Requesting agent's model.
    #[arg(long)]
    model: String,
    /// Working directory the command would run in.
    #[arg(long, default_value = ".")]
    cwd: String,
    /// Risk tier.
    #[arg(long, value_enum)]
    tier: RiskTierArg,
    /// Why the command is needed.
    #[arg(long)]
    reason: String,
    /// Run through a shell rather than exec'd directly.
    #[arg(long)]
    shell: bool,
    /// Mark the request as a dry run.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RiskTierArg {
    Critical,
    Dangerous,
    Caution,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new("slb=info")).init();

    let args = Args::parse();
    let project_path = args.project.canonicalize().unwrap_or(args.project.clone());
    let paths = DaemonPaths::for_project(&project_path);

    match args.command {
        Command::Ping => {
            let result = rpc::call(&paths.socket_path, "ping", None).await?;
            println!("{result}");
        }
        Command::Status => {
            let result = rpc::call(&paths.socket_path, "status", None).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Request(request_args) => {
            let tier = match request_args.tier {
                RiskTierArg::Critical => "critical",
                RiskTierArg::Dangerous => "dangerous",
                RiskTierArg::Caution => "caution",
            };
            let params = serde_json::json!({
                "project_path": project_path.to_string_lossy(),
                "raw_command": request_args.command,
                "cwd": request_args.cwd,
                "shell": request_args.shell,
                "risk_tier": tier,
                "requestor_session_id": request_args.session,
                "requestor_agent": request_args.agent,
                "requestor_model": request_args.model,
                "justification": {"reason": request_args.reason},
                "dry_run": request_args.dry_run,
            });
            let result = rpc::call(&paths.socket_path, "create_request", Some(params)).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Review { id, decision, session, agent, model, signature, comment } => {
            let decision = match decision {
                Decision::Approve => "approve",
                Decision::Reject => "reject",
            };
            let params = serde_json::json!({
                "request_id": id,
                "reviewer_session_id": session,
                "reviewer_agent": agent,
                "reviewer_model": model,
                "decision": decision,
                "signature": signature,
                "signature_timestamp": chrono::Utc::now(),
                "comments": comment,
            });
            let result = rpc::call(&paths.socket_path, "create_review", Some(params)).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Exec { id, session } => {
            let params = serde_json::json!({"request_id": id, "executor_session_id": session});
            let result = rpc::call(&paths.socket_path, "verify_and_mark_executing", Some(params)).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
