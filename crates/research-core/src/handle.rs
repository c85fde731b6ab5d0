//! Per-execution handle: the cancellation token, the event channel and the terminal state.
//!
//! The executor owns the write side ([`EventWriter`]); exactly one dispatcher or aggregator
//! owns the [`ExecutionHandle`]. The terminal state is published before the channel is
//! released, so a reader that sees the channel close can always read the close reason.

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::ResearchEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    Completed { report_ref: Option<String> },
    Failed { description: String },
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionState::Running => "running",
            ExecutionState::Completed { .. } => "completed",
            ExecutionState::Failed { .. } => "failed",
            ExecutionState::Cancelled => "cancelled",
        }
    }
}

/// Read side of one execution.
///
/// Dropping the handle cancels the execution; a caller that goes away releases the engine.
pub struct ExecutionHandle {
    request_id: Uuid,
    query: String,
    principal: String,
    events: mpsc::Receiver<ResearchEvent>,
    cancel: CancellationToken,
    state: watch::Receiver<ExecutionState>,
}

impl ExecutionHandle {
    pub(crate) fn open(
        request_id: Uuid,
        query: String,
        principal: String,
        capacity: usize,
    ) -> (Self, EventWriter) {
        let (sender, events) = mpsc::channel(capacity.max(1));
        let (state_tx, state) = watch::channel(ExecutionState::Running);
        let cancel = CancellationToken::new();

        let writer = EventWriter {
            sender: Some(sender),
            cancel: cancel.clone(),
            state: state_tx,
        };
        let handle = Self {
            request_id,
            query,
            principal,
            events,
            cancel,
            state,
        };
        (handle, writer)
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> ExecutionState {
        self.state.borrow().clone()
    }

    /// Next event in emission order.
    ///
    /// Returns `None` when the channel is closed or once the execution was cancelled;
    /// nothing is delivered after cancellation.
    pub async fn next_event(&mut self) -> Option<ResearchEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Wait until the executor released the channel and return the close reason.
    pub async fn closed(&mut self) -> ExecutionState {
        let waited = self
            .state
            .wait_for(ExecutionState::is_terminal)
            .await
            .map(|state| state.clone());
        match waited {
            Ok(state) => state,
            Err(_) => {
                let last = self.state.borrow().clone();
                if last.is_terminal() {
                    last
                } else {
                    ExecutionState::Cancelled
                }
            }
        }
    }
}

impl Drop for ExecutionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("request_id", &self.request_id)
            .field("principal", &self.principal)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// Write side of one execution, owned by the executor task.
pub(crate) struct EventWriter {
    sender: Option<mpsc::Sender<ResearchEvent>>,
    cancel: CancellationToken,
    state: watch::Sender<ExecutionState>,
}

impl EventWriter {
    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Push one event, waiting for buffer space.
    ///
    /// Returns `false` when the execution is cancelled or the reader is gone; a gone reader
    /// cancels the execution.
    pub(crate) async fn push(&mut self, event: ResearchEvent) -> bool {
        let Some(sender) = self.sender.as_ref() else {
            return false;
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = sender.send(event) => match sent {
                Ok(()) => true,
                Err(_) => {
                    self.cancel.cancel();
                    false
                }
            },
        }
    }

    /// Publish the terminal state, then release the channel.
    pub(crate) fn finish(mut self, state: ExecutionState) {
        self.state.send_replace(state);
        self.sender.take();
    }
}

impl Drop for EventWriter {
    fn drop(&mut self) {
        if !self.state.borrow().is_terminal() {
            self.state.send_replace(ExecutionState::Cancelled);
        }
    }
}
