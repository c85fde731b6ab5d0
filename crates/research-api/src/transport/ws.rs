//! WebSocket rendering of the research stream.
//!
//! The client opens the socket and sends one text message holding the request JSON. Every
//! event is answered with one text message. The close frame carries the outcome: 1000 on
//! completion, 1011 with the error description on failure, 1008 when the request is rejected
//! or does not arrive in time, and no payload when the execution was cancelled.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use research_core::{
    DispatchOutcome, EventSink, Principal, ResearchEvent, ResearchRequest, TransportError,
    dispatch,
};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{Instrument, debug, info_span, warn};

use crate::metrics;
use crate::state::AppState;

/// Close reasons are limited to 123 bytes by the protocol.
const MAX_CLOSE_REASON: usize = 123;

const REQUEST_NOT_RECEIVED: &str = "request not received";

pub struct WsSink {
    sender: SplitSink<WebSocket, Message>,
    receiver: SplitStream<WebSocket>,
}

#[async_trait]
impl EventSink for WsSink {
    async fn deliver(&mut self, event: &ResearchEvent) -> Result<(), TransportError> {
        let text = serde_json::to_string(event)
            .map_err(|err| TransportError::new(format!("event serialization failed: {err}")))?;
        self.sender
            .send(Message::Text(text.into()))
            .await
            .map_err(|err| TransportError::new(err.to_string()))
    }

    async fn disconnected(&mut self) {
        while let Some(message) = self.receiver.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => return,
                Ok(_) => debug!("ignoring client message after the request"),
            }
        }
    }

    async fn finish(&mut self, outcome: &DispatchOutcome) -> Result<(), TransportError> {
        let frame = match outcome {
            DispatchOutcome::Completed => Some(close_frame(close_code::NORMAL, "completed")),
            DispatchOutcome::Failed(description) => {
                Some(close_frame(close_code::ERROR, description))
            }
            DispatchOutcome::Cancelled | DispatchOutcome::Disconnected => None,
        };
        self.sender
            .send(Message::Close(frame))
            .await
            .map_err(|err| TransportError::new(err.to_string()))
    }
}

fn close_frame(code: u16, reason: &str) -> CloseFrame<'static> {
    CloseFrame {
        code,
        reason: truncate_reason(reason).into(),
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

/// Read the request message. `Err(Some(reason))` rejects it; `Err(None)` means the client left.
async fn read_request(
    receiver: &mut SplitStream<WebSocket>,
) -> Result<ResearchRequest, Option<String>> {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                return serde_json::from_str::<ResearchRequest>(&text)
                    .map_err(|err| Some(format!("invalid request: {err}")));
            }
            Ok(Message::Binary(_)) => {
                return Err(Some("expected a text message with the request".into()));
            }
            Ok(Message::Close(_)) | Err(_) => return Err(None),
            Ok(_) => continue,
        }
    }
    Err(None)
}

pub async fn serve_socket(
    socket: WebSocket,
    state: AppState,
    principal: Principal,
    permit: OwnedSemaphorePermit,
) {
    let _permit = permit;
    let (mut sender, mut receiver) = socket.split();

    let wait = state.ws_request_timeout();
    let request = match tokio::time::timeout(wait, read_request(&mut receiver)).await {
        Ok(Ok(request)) => request,
        Ok(Err(Some(reason))) => {
            reject(&mut sender, &reason).await;
            return;
        }
        Ok(Err(None)) => return,
        Err(_) => {
            debug!(wait_ms = wait.as_millis() as u64, "no request on upgraded socket");
            reject(&mut sender, REQUEST_NOT_RECEIVED).await;
            return;
        }
    };

    let handle = match state.executor().start(request, &principal) {
        Ok(handle) => handle,
        Err(err) => {
            reject(&mut sender, &err.to_string()).await;
            return;
        }
    };

    let request_id = handle.request_id().to_string();
    metrics::execution_started(
        &request_id,
        handle.principal(),
        "ws",
        state.capacity().available_executions,
    );
    metrics::stream_opened(&request_id, "ws");

    let mut sink = WsSink { sender, receiver };
    let outcome = dispatch(handle, &mut sink)
        .instrument(info_span!("ws", %request_id))
        .await;
    metrics::stream_closed(&request_id, "ws", outcome.label());
}

async fn reject(sender: &mut SplitSink<WebSocket, Message>, reason: &str) {
    warn!(%reason, "rejecting websocket request");
    let frame = close_frame(close_code::POLICY, reason);
    if let Err(err) = sender.send(Message::Close(Some(frame))).await {
        debug!(error = %err, "client left before the rejection was sent");
    }
}
