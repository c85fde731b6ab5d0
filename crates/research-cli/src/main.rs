use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use research_core::{
    DispatchOutcome, EventSink, ExecutorConfig, FsReportStore, InMemoryReportStore,
    PipelineEngine, PipelineSettings, Principal, ReportStore, RequestExecutor, ResearchError,
    ResearchEngine, ResearchEvent, ResearchRequest, TelemetryOptions, TransportError,
    await_response, builtin_sub_agents, dispatch, init_telemetry,
};
use tokio::runtime::Runtime;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "research-cli",
    version,
    about = "Run one research execution locally and print its events"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a research request with the built-in pipeline engine.
    Run(RunArgs),
    /// List the sub-agents a request may select.
    SubAgents,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Query to research.
    #[arg(long)]
    query: String,

    /// Sub-agent to run the research with.
    #[arg(long)]
    sub_agent: Option<String>,

    /// Concurrent research units per round (1-5).
    #[arg(long)]
    units: Option<i64>,

    /// Research rounds (1-5).
    #[arg(long)]
    iterations: Option<i64>,

    /// Print only the aggregated response instead of every event.
    #[arg(long, default_value_t = false)]
    sync: bool,

    /// Give up on a `--sync` run after this many seconds.
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Persist reports below this directory instead of keeping them in memory.
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Simulated latency of each pipeline step, in milliseconds.
    #[arg(long, default_value_t = 150)]
    step_delay_ms: u64,
}

fn main() -> Result<()> {
    // stdout carries events; logs go to stderr.
    init_telemetry(TelemetryOptions::for_cli())?;

    let cli = Cli::parse();

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(args).await?,
            Command::SubAgents => list_sub_agents()?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

async fn run_command(args: RunArgs) -> Result<()> {
    let reports: Arc<dyn ReportStore> = match args.report_dir.as_ref() {
        Some(dir) => Arc::new(FsReportStore::new(dir.clone())),
        None => Arc::new(InMemoryReportStore::new()),
    };
    let engine: Arc<dyn ResearchEngine> = Arc::new(PipelineEngine::new(
        reports.clone(),
        PipelineSettings::default().with_step_delay(Duration::from_millis(args.step_delay_ms)),
    ));
    let executor = RequestExecutor::new(engine, ExecutorConfig::default());

    let request = ResearchRequest {
        query: args.query,
        sub_agent: args.sub_agent,
        max_concurrent_units: args.units,
        max_iterations: args.iterations,
        ..ResearchRequest::default()
    };
    let principal = Principal::new("cli");
    let handle = executor.start(request, &principal)?;
    info!(request_id = %handle.request_id(), "research started");

    if args.sync {
        let response = await_response(
            handle,
            reports.as_ref(),
            Duration::from_secs(args.timeout_secs),
        )
        .await
        .map_err(ResearchError::from)?;
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let mut sink = StdoutSink;
    match dispatch(handle, &mut sink).await {
        DispatchOutcome::Completed => Ok(()),
        DispatchOutcome::Failed(description) => bail!("research failed: {description}"),
        DispatchOutcome::Cancelled | DispatchOutcome::Disconnected => {
            warn!("research interrupted");
            Ok(())
        }
    }
}

fn list_sub_agents() -> Result<()> {
    for agent in builtin_sub_agents() {
        println!("{:<28} {}", agent.name, agent.description);
    }
    Ok(())
}

/// Prints each event as one JSON line; Ctrl+C counts as the caller leaving.
struct StdoutSink;

#[async_trait]
impl EventSink for StdoutSink {
    async fn deliver(&mut self, event: &ResearchEvent) -> Result<(), TransportError> {
        let line =
            serde_json::to_string(event).map_err(|err| TransportError::new(err.to_string()))?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").map_err(|err| TransportError::new(err.to_string()))
    }

    async fn disconnected(&mut self) {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
