//! Research bridge core: starts one engine run per request, normalizes its lifecycle
//! signals into a stable event schema and hands the stream to a transport or to the
//! synchronous aggregator.

mod aggregate;
mod auth;
mod config;
mod dispatch;
mod engine;
mod error;
mod events;
mod executor;
mod handle;
mod metrics;
mod normalize;
mod report;
mod request;
mod security;
mod telemetry;

pub use aggregate::{
    AggregateError, FoldProgress, ResearchResponse, ResponseFold, await_response, fold_events,
};
pub use auth::{AuthGate, Principal, RESEARCH_SCOPE, StaticTokenGate, bearer_token};
pub use config::ExecutorConfig;
pub use dispatch::{DispatchOutcome, EventSink, dispatch};
pub use engine::{
    EngineOutcome, EngineParams, PipelineEngine, PipelineSettings, ResearchEngine, ScriptStep,
    ScriptedEngine, SignalSink, builtin_sub_agents,
};
pub use error::{
    AuthError, EngineError, ReportError, ResearchError, TransportError, ValidationError,
};
pub use events::{EventType, ResearchEvent, UsageCounters};
pub use executor::RequestExecutor;
pub use handle::{ExecutionHandle, ExecutionState};
pub use metrics::{init_metrics_from_env, record_execution};
pub use normalize::{EngineSignal, MAX_PROGRESS_CHARS, MAX_TOOL_RESULT_CHARS, normalize};
pub use report::{FsReportStore, InMemoryReportStore, ReportStore};
pub use request::{LIMIT_RANGE, ResearchRequest, SubAgentSpec};
pub use security::{SecretValue, optional_env, require_env};
pub use telemetry::{EXECUTION_EVENTS_TARGET, TelemetryOptions, init_telemetry};
