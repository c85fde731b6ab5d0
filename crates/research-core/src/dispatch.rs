//! Transport-agnostic read loop shared by every streaming renderer.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::events::ResearchEvent;
use crate::handle::{ExecutionHandle, ExecutionState};

/// How a dispatched stream ended, from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    Failed(String),
    Cancelled,
    /// The caller went away before the terminal event was delivered.
    Disconnected,
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Completed => "completed",
            DispatchOutcome::Failed(_) => "failed",
            DispatchOutcome::Cancelled => "cancelled",
            DispatchOutcome::Disconnected => "disconnected",
        }
    }
}

impl From<ExecutionState> for DispatchOutcome {
    fn from(state: ExecutionState) -> Self {
        match state {
            ExecutionState::Completed { .. } => DispatchOutcome::Completed,
            ExecutionState::Failed { description } => DispatchOutcome::Failed(description),
            ExecutionState::Running | ExecutionState::Cancelled => DispatchOutcome::Cancelled,
        }
    }
}

/// One transport's rendering of the event stream.
#[async_trait]
pub trait EventSink: Send {
    /// Write one event and flush it to the caller.
    async fn deliver(&mut self, event: &ResearchEvent) -> Result<(), TransportError>;

    /// Resolves once the caller is gone. Must be cancel safe.
    async fn disconnected(&mut self);

    /// Render the close reason, if the transport has a notion of one.
    async fn finish(&mut self, _outcome: &DispatchOutcome) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Pump `handle` into `sink` until the execution closes or the caller disconnects.
///
/// A disconnect or a failed write cancels the execution.
pub async fn dispatch<S>(mut handle: ExecutionHandle, sink: &mut S) -> DispatchOutcome
where
    S: EventSink + ?Sized,
{
    let request_id = handle.request_id();
    let mut delivered = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = sink.disconnected() => {
                info!(%request_id, delivered, "caller disconnected, cancelling execution");
                handle.cancel();
                return DispatchOutcome::Disconnected;
            }
            event = handle.next_event() => event,
        };

        let Some(event) = next else { break };
        if let Err(err) = sink.deliver(&event).await {
            warn!(%request_id, error = %err, "delivery failed, cancelling execution");
            handle.cancel();
            return DispatchOutcome::Disconnected;
        }
        delivered += 1;
    }

    let outcome = DispatchOutcome::from(handle.closed().await);
    debug!(%request_id, delivered, outcome = outcome.label(), "stream drained");
    if let Err(err) = sink.finish(&outcome).await {
        debug!(%request_id, error = %err, "close frame not delivered");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use tokio::sync::oneshot;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Vec<EventType>,
        fail_after: Option<usize>,
        gone: Option<oneshot::Receiver<()>>,
        finished: Option<DispatchOutcome>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn deliver(&mut self, event: &ResearchEvent) -> Result<(), TransportError> {
            if self.fail_after == Some(self.delivered.len()) {
                return Err(TransportError::new("broken pipe"));
            }
            self.delivered.push(event.event_type);
            Ok(())
        }

        async fn disconnected(&mut self) {
            match self.gone.as_mut() {
                Some(gone) => {
                    let _ = gone.await;
                }
                None => std::future::pending::<()>().await,
            }
        }

        async fn finish(&mut self, outcome: &DispatchOutcome) -> Result<(), TransportError> {
            self.finished = Some(outcome.clone());
            Ok(())
        }
    }

    fn open() -> (ExecutionHandle, crate::handle::EventWriter) {
        ExecutionHandle::open(Uuid::new_v4(), "q".into(), "tester".into(), 8)
    }

    #[tokio::test]
    async fn forwards_in_order_and_reports_close_reason() {
        let (handle, mut writer) = open();
        assert!(writer.push(ResearchEvent::error("boom")).await);
        writer.finish(ExecutionState::Failed {
            description: "boom".into(),
        });

        let mut sink = RecordingSink::default();
        let outcome = dispatch(handle, &mut sink).await;
        assert_eq!(outcome, DispatchOutcome::Failed("boom".into()));
        assert_eq!(sink.delivered, vec![EventType::Error]);
        assert_eq!(sink.finished, Some(outcome));
    }

    #[tokio::test]
    async fn failed_write_cancels_execution() {
        let (handle, mut writer) = open();
        let token = writer.cancel_token();
        assert!(writer.push(ResearchEvent::error("a")).await);

        let mut sink = RecordingSink {
            fail_after: Some(0),
            ..Default::default()
        };
        assert_eq!(
            dispatch(handle, &mut sink).await,
            DispatchOutcome::Disconnected
        );
        assert!(token.is_cancelled());
        assert!(sink.finished.is_none());
    }

    #[tokio::test]
    async fn disconnect_cancels_execution() {
        let (handle, writer) = open();
        let token = writer.cancel_token();
        let (gone_tx, gone_rx) = oneshot::channel();
        let mut sink = RecordingSink {
            gone: Some(gone_rx),
            ..Default::default()
        };
        drop(gone_tx);

        assert_eq!(
            dispatch(handle, &mut sink).await,
            DispatchOutcome::Disconnected
        );
        assert!(token.is_cancelled());
        drop(writer);
    }
}
