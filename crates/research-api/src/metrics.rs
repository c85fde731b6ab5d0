use research_core::EXECUTION_EVENTS_TARGET;
use tracing::info;

pub fn execution_started(request_id: &str, principal: &str, mode: &str, available_permits: usize) {
    info!(
        target: EXECUTION_EVENTS_TARGET,
        request_id,
        principal,
        mode,
        available_permits,
        event = "execution_started"
    );
}

pub fn sync_finished(request_id: &str, status: &str, duration_ms: u64) {
    info!(
        target: EXECUTION_EVENTS_TARGET,
        request_id,
        status,
        duration_ms,
        event = "sync_finished"
    );
}

pub fn stream_opened(request_id: &str, transport: &str) {
    info!(
        target: EXECUTION_EVENTS_TARGET,
        request_id,
        transport,
        event = "stream_opened"
    );
}

pub fn stream_closed(request_id: &str, transport: &str, outcome: &str) {
    info!(
        target: EXECUTION_EVENTS_TARGET,
        request_id,
        transport,
        outcome,
        event = "stream_closed"
    );
}

pub fn token_issued(subject: &str) {
    info!(target: EXECUTION_EVENTS_TARGET, subject, event = "token_issued");
}
