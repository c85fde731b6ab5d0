//! Synchronous mode: fold an event stream into one [`ResearchResponse`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{EngineError, ResearchError};
use crate::events::{EventType, ResearchEvent, UsageCounters};
use crate::handle::{ExecutionHandle, ExecutionState};
use crate::report::ReportStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResponse {
    pub query: String,
    pub report: Option<String>,
    pub final_message: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("{0}")]
    Failed(String),
    #[error("timed out")]
    TimedOut,
    #[error("cancelled")]
    Cancelled,
}

impl From<AggregateError> for ResearchError {
    fn from(err: AggregateError) -> Self {
        match err {
            AggregateError::Failed(description) => {
                ResearchError::Engine(EngineError::new(description))
            }
            AggregateError::TimedOut => ResearchError::TimedOut,
            AggregateError::Cancelled => ResearchError::Cancelled,
        }
    }
}

/// Where a fold stands after observing an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoldProgress {
    Pending,
    Completed,
    Failed(String),
}

/// Incremental fold over one execution's events.
///
/// Used by the synchronous aggregator and by streaming clients that want the same answer.
#[derive(Debug, Default)]
pub struct ResponseFold {
    usage: UsageCounters,
    report_ref: Option<String>,
    final_message: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

impl ResponseFold {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &ResearchEvent) -> FoldProgress {
        self.usage.observe(event.event_type);
        match event.event_type {
            EventType::ReportAvailable => {
                if let Some(report_ref) = event.str_field("report_ref") {
                    self.report_ref = Some(report_ref.to_string());
                }
                FoldProgress::Pending
            }
            EventType::ResearchCompleted => {
                if self.report_ref.is_none() {
                    self.report_ref = event.str_field("report_ref").map(str::to_string);
                }
                self.final_message = event.str_field("final_message").map(str::to_string);
                self.completed_at = Some(event.timestamp);
                FoldProgress::Completed
            }
            EventType::Error => FoldProgress::Failed(
                event
                    .str_field("description")
                    .unwrap_or("research failed")
                    .to_string(),
            ),
            _ => FoldProgress::Pending,
        }
    }

    /// Resolve the folded state into a response, fetching the report content if any.
    pub async fn into_response(
        self,
        query: String,
        reports: &dyn ReportStore,
    ) -> Result<ResearchResponse, AggregateError> {
        let completed_at = self.completed_at.ok_or(AggregateError::Cancelled)?;
        let (report, final_message) = match self.report_ref {
            Some(report_ref) => {
                let content = reports
                    .fetch(&report_ref)
                    .await
                    .map_err(|err| AggregateError::Failed(err.to_string()))?;
                (Some(content), None)
            }
            None => (None, self.final_message),
        };
        Ok(ResearchResponse {
            query,
            report,
            final_message,
            metadata: self.usage.to_metadata(),
            completed_at,
        })
    }
}

/// Fold an already collected event sequence, e.g. one read from a stream.
pub async fn fold_events<I>(
    query: impl Into<String>,
    events: I,
    reports: &dyn ReportStore,
) -> Result<ResearchResponse, AggregateError>
where
    I: IntoIterator<Item = ResearchEvent>,
{
    let mut fold = ResponseFold::new();
    for event in events {
        match fold.observe(&event) {
            FoldProgress::Pending => {}
            FoldProgress::Completed => break,
            FoldProgress::Failed(description) => return Err(AggregateError::Failed(description)),
        }
    }
    fold.into_response(query.into(), reports).await
}

/// Drain `handle` into one response, cancelling the execution once `timeout` elapses.
pub async fn await_response(
    mut handle: ExecutionHandle,
    reports: &dyn ReportStore,
    timeout: Duration,
) -> Result<ResearchResponse, AggregateError> {
    let request_id = handle.request_id();
    let query = handle.query().to_string();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut fold = ResponseFold::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = &mut deadline => {
                warn!(%request_id, timeout_ms = timeout.as_millis() as u64, "execution timed out");
                handle.cancel();
                return Err(AggregateError::TimedOut);
            }
            event = handle.next_event() => event,
        };

        let Some(event) = next else {
            let state = tokio::select! {
                _ = &mut deadline => {
                    handle.cancel();
                    return Err(AggregateError::TimedOut);
                }
                state = handle.closed() => state,
            };
            debug!(%request_id, state = state.label(), "channel closed before a terminal event");
            return Err(match state {
                ExecutionState::Failed { description } => AggregateError::Failed(description),
                _ => AggregateError::Cancelled,
            });
        };

        match fold.observe(&event) {
            FoldProgress::Pending => {}
            FoldProgress::Completed => break,
            FoldProgress::Failed(description) => return Err(AggregateError::Failed(description)),
        }
    }

    // The report fetch counts against the same deadline.
    tokio::select! {
        biased;
        _ = &mut deadline => {
            warn!(%request_id, timeout_ms = timeout.as_millis() as u64, "report fetch timed out");
            Err(AggregateError::TimedOut)
        }
        response = fold.into_response(query, reports) => response,
    }
}
