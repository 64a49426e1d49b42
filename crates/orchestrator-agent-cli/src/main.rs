//! Runs one agent task under supervision from the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use orchestrator_agent_supervisor::prelude::*;
use orchestrator_agent_supervisor::vendors::opencode::{DEFAULT_PORT, OpenCodeLauncher};
use orchestrator_agent_supervisor::{ServerLauncher, init_observability};
use tracing::{info, warn};

const EXIT_STOPPED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "agent-supervise", about = "Run one agent task and report its progress")]
struct Args {
    /// Repository the agent works in.
    #[arg(long)]
    workspace: PathBuf,
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    description: String,
    /// Attach to a running `opencode serve` instead of spawning one.
    #[arg(long, conflicts_with_all = ["opencode_bin", "port"])]
    server_url: Option<String>,
    #[arg(long, default_value = "opencode")]
    opencode_bin: PathBuf,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Append progress entries to this JSONL file instead of the log output.
    #[arg(long)]
    progress_log: Option<PathBuf>,
    /// Report tool calls while they run, not only once they finish.
    #[arg(long)]
    verbose_tools: bool,
    /// Reuse a run id assigned elsewhere.
    #[arg(long)]
    run_id: Option<uuid::Uuid>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_observability();
    match run(Args::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let workspace = args
        .workspace
        .canonicalize()
        .with_context(|| format!("workspace {} is not accessible", args.workspace.display()))?;

    let mut config = SupervisorConfig::from_env().context("invalid supervisor configuration")?;
    if args.verbose_tools {
        config = config.tool_verbosity(ToolVerbosity::InFlight);
    }

    let launcher: Arc<dyn ServerLauncher> = match &args.server_url {
        Some(url) => Arc::new(OpenCodeLauncher::attach(url.clone())),
        None => Arc::new(OpenCodeLauncher::spawn(args.opencode_bin.clone()).port(args.port)),
    };
    let sink: Arc<dyn ProgressSink> = match &args.progress_log {
        Some(path) => Arc::new(JsonlProgressLog::new(path.clone())),
        None => Arc::new(TracingProgressLog::new()),
    };
    let control = Arc::new(MemoryControlStore::new());

    let supervisor = RunSupervisor::builder()
        .launcher(launcher)
        .progress_sink(sink)
        .control_store(control.clone())
        .config(config)
        .build()?;

    let mut request = TaskRequest::new(workspace, args.title, args.description);
    if let Some(run_id) = args.run_id {
        request = request.with_run_id(run_id);
    }
    let run_id = request.run_id;
    info!(run_id = %run_id, "supervising task");

    // Ctrl-C goes through the control store like any external stop request.
    let stopper = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(run_id = %run_id, "interrupt received; requesting stop");
            if let Err(err) = control.request_stop(run_id) {
                warn!(error = %err, "failed to record stop request");
            }
        }
    });

    let result = supervisor.run(request).await;
    stopper.abort();

    match result {
        Ok(report) => {
            println!(
                "run {} ({}) {}",
                report.run_id,
                report.session_id,
                match report.outcome {
                    RunOutcome::Completed => "completed",
                    RunOutcome::Stopped => "stopped by user",
                }
            );
            Ok(match report.outcome {
                RunOutcome::Completed => ExitCode::SUCCESS,
                RunOutcome::Stopped => ExitCode::from(EXIT_STOPPED),
            })
        }
        Err(SupervisorError::RunFailed(failure)) => {
            eprintln!("run {run_id} failed: {failure}");
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_url_conflicts_with_spawn_options() {
        let err = Args::try_parse_from([
            "agent-supervise",
            "--workspace",
            ".",
            "--title",
            "t",
            "--server-url",
            "http://127.0.0.1:4096",
            "--port",
            "5000",
        ])
        .expect_err("conflicting flags");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn spawn_defaults_apply() {
        let args = Args::try_parse_from(["agent-supervise", "--workspace", ".", "--title", "t"])
            .expect("args");
        assert_eq!(args.port, DEFAULT_PORT);
        assert_eq!(args.opencode_bin, PathBuf::from("opencode"));
        assert!(args.server_url.is_none());
        assert!(!args.verbose_tools);
    }
}
