use std::convert::Infallible;
use std::pin::Pin;

use async_trait::async_trait;
use axum::response::sse::{Event, KeepAlive, Sse};
use research_core::{EventSink, ExecutionHandle, ResearchEvent, TransportError, dispatch};
use tokio::sync::{OwnedSemaphorePermit, mpsc};
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::metrics;

/// Name carried by every frame of the research stream.
pub const SSE_EVENT_NAME: &str = "research_event";

pub type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

/// Frames queued towards the HTTP body. Small: every frame is flushed as it is written.
const FRAME_BUFFER: usize = 16;

pub struct SseSink {
    frames: mpsc::Sender<Result<Event, Infallible>>,
}

impl SseSink {
    pub fn new(frames: mpsc::Sender<Result<Event, Infallible>>) -> Self {
        Self { frames }
    }
}

pub fn render_frame(event: &ResearchEvent) -> Result<Event, TransportError> {
    let data = serde_json::to_string(event)
        .map_err(|err| TransportError::new(format!("event serialization failed: {err}")))?;
    Ok(Event::default().event(SSE_EVENT_NAME).data(data))
}

#[async_trait]
impl EventSink for SseSink {
    async fn deliver(&mut self, event: &ResearchEvent) -> Result<(), TransportError> {
        let frame = render_frame(event)?;
        self.frames
            .send(Ok(frame))
            .await
            .map_err(|_| TransportError::new("event stream receiver dropped"))
    }

    async fn disconnected(&mut self) {
        self.frames.closed().await
    }
}

/// Turn an execution into an SSE response. The dispatcher runs detached and holds the
/// execution slot until the stream ends; dropping the body counts as a disconnect.
pub fn stream_response(handle: ExecutionHandle, permit: OwnedSemaphorePermit) -> Sse<SseStream> {
    let (frames, receiver) = mpsc::channel(FRAME_BUFFER);
    let request_id = handle.request_id().to_string();
    metrics::stream_opened(&request_id, "sse");

    let span = tracing::info_span!("sse", %request_id);
    tokio::spawn(
        async move {
            let _permit = permit;
            let mut sink = SseSink::new(frames);
            let outcome = dispatch(handle, &mut sink).await;
            metrics::stream_closed(&request_id, "sse", outcome.label());
        }
        .instrument(span),
    );

    let stream: SseStream = Box::pin(ReceiverStream::new(receiver));
    Sse::new(stream).keep_alive(KeepAlive::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_body_is_a_disconnect() {
        let (frames, receiver) = mpsc::channel(1);
        let mut sink = SseSink::new(frames);
        drop(receiver);
        sink.disconnected().await;
        assert!(sink.deliver(&ResearchEvent::error("x")).await.is_err());
    }
}
