use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::state::{AppState, CapacityReport};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    capacity: CapacityReport,
}

/// Liveness only; never touches the executor.
pub fn health_router() -> Router<AppState> {
    Router::new().route("/research/healthz", get(healthz))
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        capacity: state.capacity(),
    })
}
