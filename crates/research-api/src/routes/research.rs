use std::time::Instant;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    response::{Response, sse::Sse},
    routing::{get, post},
};
use research_core::{
    AggregateError, ResearchRequest, ResearchResponse, SubAgentSpec, await_response,
};
use serde::Serialize;
use tracing::instrument;

use super::ApiJson;
use crate::auth::Authenticated;
use crate::error::AppError;
use crate::metrics;
use crate::state::AppState;
use crate::transport::{SseStream, serve_socket, stream_response};

#[derive(Debug, Serialize)]
pub struct SubAgentsResponse {
    pub sub_agents: Vec<SubAgentSpec>,
}

pub fn research_router() -> Router<AppState> {
    Router::new()
        .route("/research", post(research))
        .route("/research/stream", post(research_stream))
        .route("/research/ws", get(research_ws))
        .route("/research/sub-agents", get(list_sub_agents))
}

#[instrument(skip_all, fields(principal = %principal.subject))]
async fn research(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    ApiJson(request): ApiJson<ResearchRequest>,
) -> Result<Json<ResearchResponse>, AppError> {
    let _permit = state.acquire_permit()?;
    let handle = state.executor().start(request, &principal)?;
    let request_id = handle.request_id().to_string();
    metrics::execution_started(
        &request_id,
        handle.principal(),
        "sync",
        state.capacity().available_executions,
    );

    let started = Instant::now();
    let result = await_response(handle, state.reports(), state.sync_timeout()).await;
    let status = match &result {
        Ok(_) => "completed",
        Err(AggregateError::Failed(_)) => "failed",
        Err(AggregateError::TimedOut) => "timed_out",
        Err(AggregateError::Cancelled) => "cancelled",
    };
    metrics::sync_finished(&request_id, status, started.elapsed().as_millis() as u64);

    Ok(Json(result?))
}

#[instrument(skip_all, fields(principal = %principal.subject))]
async fn research_stream(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    ApiJson(request): ApiJson<ResearchRequest>,
) -> Result<Sse<SseStream>, AppError> {
    let permit = state.acquire_permit()?;
    let handle = state.executor().start(request, &principal)?;
    metrics::execution_started(
        &handle.request_id().to_string(),
        handle.principal(),
        "sse",
        state.capacity().available_executions,
    );
    Ok(stream_response(handle, permit))
}

async fn research_ws(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    upgrade: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let permit = state.acquire_permit()?;
    Ok(upgrade.on_upgrade(move |socket| serve_socket(socket, state, principal, permit)))
}

async fn list_sub_agents(
    State(state): State<AppState>,
    Authenticated(_principal): Authenticated,
) -> Json<SubAgentsResponse> {
    Json(SubAgentsResponse {
        sub_agents: state.executor().sub_agents().to_vec(),
    })
}
