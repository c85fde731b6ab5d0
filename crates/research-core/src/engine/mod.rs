//! Engine contract: the opaque computation the bridge drives once per request.

mod pipeline;
mod scripted;

pub use pipeline::{PipelineEngine, PipelineSettings, builtin_sub_agents};
pub use scripted::{ScriptStep, ScriptedEngine};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::EngineError;
use crate::normalize::EngineSignal;
use crate::request::SubAgentSpec;

/// Validated parameters handed to an engine.
#[derive(Debug, Clone)]
pub struct EngineParams {
    pub request_id: Uuid,
    pub principal: String,
    pub query: String,
    pub sub_agent: Option<String>,
    pub max_concurrent_units: usize,
    pub max_iterations: usize,
    pub metadata: Map<String, Value>,
}

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    /// A report artifact exists and can be fetched from the report store.
    Report { report_ref: String },
    /// No artifact; the closing message stands in for the report.
    Message(String),
}

/// A pluggable research engine.
///
/// `run` is invoked once per accepted request. Signals emitted through `signals` are
/// forwarded in order; `cancel` fires when nobody is listening anymore and should be
/// observed cooperatively.
#[async_trait]
pub trait ResearchEngine: Send + Sync {
    /// Named variants a request may select through `sub_agent`.
    fn sub_agents(&self) -> Vec<SubAgentSpec> {
        Vec::new()
    }

    async fn run(
        &self,
        params: EngineParams,
        signals: SignalSink,
        cancel: CancellationToken,
    ) -> Result<EngineOutcome, EngineError>;
}

/// Write side of the engine's signal stream.
///
/// The queue is bounded: `emit` waits while the executor is busy delivering, and gives up
/// as soon as the execution is cancelled.
#[derive(Clone)]
pub struct SignalSink {
    sender: mpsc::Sender<EngineSignal>,
    cancel: CancellationToken,
}

impl SignalSink {
    pub fn channel(
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<EngineSignal>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender, cancel }, receiver)
    }

    /// Emit a signal. Returns `false` once the execution is cancelled or the executor
    /// stopped listening.
    pub async fn emit(&self, signal: EngineSignal) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.sender.send(signal) => match sent {
                Ok(()) => true,
                Err(err) => {
                    tracing::debug!(signal = ?err.0, "signal dropped, executor no longer listening");
                    false
                }
            },
        }
    }

    pub async fn tool_call(&self, name: impl Into<String>, arguments: Value) -> bool {
        self.emit(EngineSignal::ToolStarted {
            name: name.into(),
            arguments,
        })
        .await
    }

    pub async fn tool_result(&self, name: impl Into<String>, output: impl Into<String>) -> bool {
        self.emit(EngineSignal::ToolFinished {
            name: name.into(),
            output: output.into(),
        })
        .await
    }

    pub async fn delegated(
        &self,
        delegation_id: impl Into<String>,
        sub_agent: impl Into<String>,
        task: impl Into<String>,
    ) -> bool {
        self.emit(EngineSignal::Delegated {
            delegation_id: delegation_id.into(),
            sub_agent: sub_agent.into(),
            task: task.into(),
        })
        .await
    }

    pub async fn delegation_finished(
        &self,
        delegation_id: impl Into<String>,
        summary: impl Into<String>,
    ) -> bool {
        self.emit(EngineSignal::DelegationFinished {
            delegation_id: delegation_id.into(),
            summary: summary.into(),
        })
        .await
    }

    pub async fn progress(&self, message: impl Into<String>) -> bool {
        self.emit(EngineSignal::Progress {
            message: message.into(),
        })
        .await
    }
}
