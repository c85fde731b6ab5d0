use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{EngineOutcome, EngineParams, ResearchEngine, SignalSink};
use crate::error::EngineError;
use crate::normalize::EngineSignal;
use crate::request::SubAgentSpec;

/// One step of a scripted run.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Emit(EngineSignal),
    Sleep(Duration),
    Succeed(EngineOutcome),
    Fail(String),
    /// Block until cancelled, then acknowledge.
    Hang,
    /// Block forever, ignoring cancellation.
    Stall,
    Panic(String),
}

/// Engine that replays a fixed script. Used by tests and local demos.
///
/// Records how often it was invoked and whether it observed cancellation.
pub struct ScriptedEngine {
    steps: Vec<ScriptStep>,
    sub_agents: Vec<SubAgentSpec>,
    invocations: AtomicUsize,
    cancel_observed: AtomicBool,
    last_params: Mutex<Option<EngineParams>>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            sub_agents: Vec::new(),
            invocations: AtomicUsize::new(0),
            cancel_observed: AtomicBool::new(false),
            last_params: Mutex::new(None),
        }
    }

    pub fn with_sub_agents(mut self, sub_agents: Vec<SubAgentSpec>) -> Self {
        self.sub_agents = sub_agents;
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn cancel_observed(&self) -> bool {
        self.cancel_observed.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<EngineParams> {
        self.last_params
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }

    fn acknowledge_cancel(&self) -> EngineError {
        self.cancel_observed.store(true, Ordering::SeqCst);
        EngineError::new("cancelled")
    }
}

#[async_trait]
impl ResearchEngine for ScriptedEngine {
    fn sub_agents(&self) -> Vec<SubAgentSpec> {
        self.sub_agents.clone()
    }

    async fn run(
        &self,
        params: EngineParams,
        signals: SignalSink,
        cancel: CancellationToken,
    ) -> Result<EngineOutcome, EngineError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.last_params.lock() {
            *guard = Some(params);
        }

        for step in &self.steps {
            if cancel.is_cancelled() {
                return Err(self.acknowledge_cancel());
            }
            match step {
                ScriptStep::Emit(signal) => {
                    signals.emit(signal.clone()).await;
                }
                ScriptStep::Sleep(duration) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(self.acknowledge_cancel()),
                        _ = tokio::time::sleep(*duration) => {}
                    }
                }
                ScriptStep::Succeed(outcome) => return Ok(outcome.clone()),
                ScriptStep::Fail(description) => return Err(EngineError::new(description.clone())),
                ScriptStep::Hang => {
                    cancel.cancelled().await;
                    return Err(self.acknowledge_cancel());
                }
                ScriptStep::Stall => std::future::pending::<()>().await,
                ScriptStep::Panic(message) => panic!("{message}"),
            }
        }

        Ok(EngineOutcome::Message("script finished".to_string()))
    }
}
