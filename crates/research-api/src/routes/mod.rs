mod auth;
mod health;
mod research;

use axum::{Router, extract::FromRequest};
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::state::AppState;

pub use research::SubAgentsResponse;

/// JSON body whose rejections render as 400 with the standard error payload.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(health::health_router())
        .merge(research::research_router())
        .merge(auth::auth_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
