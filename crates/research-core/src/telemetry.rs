use std::sync::OnceLock;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt};

use crate::ResearchError;

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

/// Target carrying the structured per-execution events of the HTTP service.
pub const EXECUTION_EVENTS_TARGET: &str = "telemetry.api";

/// Configuration options when initialising telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    /// Explicit filter; falls back to `RUST_LOG`, then to the research defaults.
    pub env_filter: Option<String>,
    pub with_ansi: bool,
    pub with_target: bool,
    /// Emit `telemetry.api` execution events under the default filter.
    pub execution_events: bool,
    /// Write logs to stderr, leaving stdout to event output.
    pub log_to_stderr: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            env_filter: None,
            with_ansi: true,
            with_target: false,
            execution_events: true,
            log_to_stderr: false,
        }
    }
}

impl TelemetryOptions {
    /// Settings for command-line runs: stderr logs, no service events.
    pub fn for_cli() -> Self {
        Self {
            execution_events: false,
            log_to_stderr: true,
            ..Self::default()
        }
    }

    fn filter_directives(&self) -> String {
        self.env_filter
            .clone()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .unwrap_or_else(|| default_directives(self.execution_events))
    }
}

/// Default filter for the research crates.
fn default_directives(execution_events: bool) -> String {
    let events = if execution_events { "info" } else { "off" };
    format!("info,research_core=info,research_api=info,{EXECUTION_EVENTS_TARGET}={events}")
}

/// Initialise the global tracing subscriber.
///
/// Safe to call multiple times; only the first invocation installs the subscriber.
pub fn init_telemetry(options: TelemetryOptions) -> Result<(), ResearchError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(options.filter_directives()).map_err(|err| {
        ResearchError::InvalidConfiguration(format!("invalid log filter: {err}"))
    })?;
    let writer = if options.log_to_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_ansi(options.with_ansi)
        .with_target(options.with_target)
        .with_writer(writer)
        .try_init()
        .map_err(|err| {
            ResearchError::InvalidConfiguration(format!("telemetry init failed: {err}"))
        })?;

    TELEMETRY_GUARD.get_or_init(|| ());
    Ok(())
}
