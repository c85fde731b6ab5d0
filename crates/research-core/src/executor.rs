//! Request executor: validates a request, starts exactly one engine run and drives it
//! until a single terminal outcome is published on the execution handle.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use uuid::Uuid;

use crate::auth::Principal;
use crate::config::ExecutorConfig;
use crate::engine::{EngineOutcome, EngineParams, ResearchEngine, SignalSink};
use crate::error::{EngineError, ValidationError};
use crate::events::{EventType, ResearchEvent, UsageCounters};
use crate::handle::{EventWriter, ExecutionHandle, ExecutionState};
use crate::metrics;
use crate::normalize::normalize;
use crate::request::{ResearchRequest, SubAgentSpec};

const EMPTY_OUTCOME: &str = "engine finished without a report or final message";

pub struct RequestExecutor {
    engine: Arc<dyn ResearchEngine>,
    config: ExecutorConfig,
    sub_agents: Vec<SubAgentSpec>,
}

impl RequestExecutor {
    pub fn new(engine: Arc<dyn ResearchEngine>, config: ExecutorConfig) -> Self {
        let sub_agents = engine.sub_agents();
        Self {
            engine,
            config,
            sub_agents,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn sub_agents(&self) -> &[SubAgentSpec] {
        &self.sub_agents
    }

    /// Validate `request` and start its execution on the current Tokio runtime.
    ///
    /// An invalid request is rejected before any handle exists and the engine is never
    /// invoked.
    #[instrument(name = "executor.start", skip_all, fields(principal = %principal.subject))]
    pub fn start(
        &self,
        request: ResearchRequest,
        principal: &Principal,
    ) -> Result<ExecutionHandle, ValidationError> {
        request.validate(&self.sub_agents)?;
        let sub_agent = request.selected_sub_agent()?.map(str::to_string);

        let request_id = Uuid::new_v4();
        let started = ResearchEvent::started(
            &request_id.to_string(),
            &request.query,
            &request.metadata,
        );
        let params = EngineParams {
            request_id,
            principal: principal.subject.clone(),
            query: request.query.clone(),
            sub_agent,
            max_concurrent_units: resolve_limit(
                request.max_concurrent_units,
                self.config.default_max_concurrent_units,
            ),
            max_iterations: resolve_limit(
                request.max_iterations,
                self.config.default_max_iterations,
            ),
            metadata: request.metadata,
        };

        let (handle, writer) = ExecutionHandle::open(
            request_id,
            request.query,
            principal.subject.clone(),
            self.config.event_buffer,
        );

        info!(
            %request_id,
            sub_agent = params.sub_agent.as_deref().unwrap_or("default"),
            max_concurrent_units = params.max_concurrent_units,
            max_iterations = params.max_iterations,
            "execution accepted"
        );

        let span = info_span!("execution", %request_id, principal = %principal.subject);
        tokio::spawn(
            drive(
                self.engine.clone(),
                params,
                started,
                writer,
                self.config.event_buffer,
                self.config.cancel_grace,
            )
            .instrument(span),
        );

        Ok(handle)
    }
}

fn resolve_limit(requested: Option<i64>, default: usize) -> usize {
    requested
        .and_then(|value| usize::try_from(value).ok())
        .unwrap_or(default)
}

async fn drive(
    engine: Arc<dyn ResearchEngine>,
    params: EngineParams,
    started: ResearchEvent,
    mut writer: EventWriter,
    buffer: usize,
    grace: Duration,
) {
    let started_at = Instant::now();
    let cancel = writer.cancel_token();

    let state = run_to_terminal(
        engine.as_ref(),
        params,
        started,
        &mut writer,
        &cancel,
        buffer,
        grace,
    )
    .await;

    let duration_ms = started_at.elapsed().as_millis() as u64;
    metrics::record_execution(state.label(), duration_ms);
    info!(state = state.label(), duration_ms, "execution finished");

    writer.finish(state);
}

async fn run_to_terminal(
    engine: &dyn ResearchEngine,
    params: EngineParams,
    started: ResearchEvent,
    writer: &mut EventWriter,
    cancel: &CancellationToken,
    buffer: usize,
    grace: Duration,
) -> ExecutionState {
    let mut usage = UsageCounters::default();
    let mut announced_report: Option<String> = None;

    if !forward(writer, started, &mut usage).await {
        return ExecutionState::Cancelled;
    }

    let (signals, mut signal_rx) = SignalSink::channel(buffer, cancel.clone());
    let run = AssertUnwindSafe(engine.run(params, signals, cancel.clone())).catch_unwind();
    tokio::pin!(run);

    let finished = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return await_acknowledgement(run.as_mut(), grace).await,
            Some(signal) = signal_rx.recv() => {
                let event = normalize(signal);
                if event.event_type == EventType::ReportAvailable {
                    announced_report = event.str_field("report_ref").map(str::to_string);
                }
                if !forward(writer, event, &mut usage).await {
                    return await_acknowledgement(run.as_mut(), grace).await;
                }
            }
            finished = &mut run => break finished,
        }
    };

    // Signals emitted right before the engine returned are still queued.
    while let Ok(signal) = signal_rx.try_recv() {
        let event = normalize(signal);
        if event.event_type == EventType::ReportAvailable {
            announced_report = event.str_field("report_ref").map(str::to_string);
        }
        if !forward(writer, event, &mut usage).await {
            return ExecutionState::Cancelled;
        }
    }

    let result = finished.unwrap_or_else(|panic| {
        let description = panic_description(panic.as_ref());
        warn!(%description, "engine panicked");
        Err(EngineError::new(description))
    });

    if cancel.is_cancelled() {
        return ExecutionState::Cancelled;
    }

    match result {
        Ok(EngineOutcome::Report { report_ref }) => {
            if announced_report.as_deref() != Some(report_ref.as_str())
                && !forward(writer, ResearchEvent::report_available(&report_ref), &mut usage).await
            {
                return ExecutionState::Cancelled;
            }
            let completed = ResearchEvent::completed_with_report(&report_ref, &usage);
            if !forward(writer, completed, &mut usage).await {
                return ExecutionState::Cancelled;
            }
            ExecutionState::Completed {
                report_ref: Some(report_ref),
            }
        }
        Ok(EngineOutcome::Message(message)) if !message.trim().is_empty() => {
            let completed = ResearchEvent::completed_with_message(&message, &usage);
            if !forward(writer, completed, &mut usage).await {
                return ExecutionState::Cancelled;
            }
            ExecutionState::Completed {
                report_ref: announced_report,
            }
        }
        Ok(EngineOutcome::Message(_)) => fail(writer, EMPTY_OUTCOME.to_string()).await,
        Err(err) => {
            let description = if err.description.trim().is_empty() {
                "engine failed".to_string()
            } else {
                err.description
            };
            fail(writer, description).await
        }
    }
}

async fn forward(writer: &mut EventWriter, event: ResearchEvent, usage: &mut UsageCounters) -> bool {
    let event_type = event.event_type;
    usage.observe(event_type);
    debug!(%event_type, "forwarding event");
    let pushed = writer.push(event).await;
    if pushed {
        metrics::record_event(event_type);
    }
    pushed
}

async fn fail(writer: &mut EventWriter, description: String) -> ExecutionState {
    warn!(%description, "execution failed");
    let event = ResearchEvent::error(&description);
    if writer.push(event).await {
        metrics::record_event(EventType::Error);
        ExecutionState::Failed { description }
    } else {
        ExecutionState::Cancelled
    }
}

/// Give a cancelled engine `grace` to wind down, then drop it either way.
async fn await_acknowledgement<F: Future>(run: Pin<&mut F>, grace: Duration) -> ExecutionState {
    match tokio::time::timeout(grace, run).await {
        Ok(_) => debug!("engine acknowledged cancellation"),
        Err(_) => warn!(
            grace_ms = grace.as_millis() as u64,
            "engine ignored cancellation, dropping it"
        ),
    }
    ExecutionState::Cancelled
}

fn panic_description(panic: &(dyn Any + Send)) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("engine panicked: {message}")
}
