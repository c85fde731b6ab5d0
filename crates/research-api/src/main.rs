use anyhow::{Context, Result};
use clap::Parser;
use research_api::{config::AppConfig, routes::build_router, state::AppState};
use research_core::{TelemetryOptions, init_metrics_from_env, init_telemetry};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Research execution bridge over HTTP, SSE and WebSocket")]
struct Cli {
    /// Override RESEARCH_SERVICE_HTTP_ADDR.
    #[arg(long)]
    listen_addr: Option<String>,

    /// Disable ANSI colours in log output.
    #[arg(long)]
    no_ansi: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryOptions {
        with_ansi: !cli.no_ansi,
        ..TelemetryOptions::default()
    })?;
    init_metrics_from_env("research-api")?;

    let mut config = AppConfig::from_env()?;
    if let Some(addr) = cli.listen_addr {
        config.listen_addr = addr;
    }

    let state = AppState::try_new(&config)?;
    let app = build_router(state);

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(
        addr = %config.listen_addr,
        max_concurrent_executions = config.max_concurrent_executions,
        "research bridge listening"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("research bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
