use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    routing::post,
};
use research_core::bearer_token;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::ApiJson;
use crate::auth::IssuedToken;
use crate::error::AppError;
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
}

pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/auth/token", post(issue_token))
        .route("/auth/verify", post(verify_token))
}

async fn issue_token(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<TokenRequest>,
) -> Result<Json<IssuedToken>, AppError> {
    let issuer = match state.token_issuer() {
        Some(issuer) if issuer.has_api_keys() => issuer,
        _ => {
            warn!("token requested but no API keys or JWT secret are configured");
            return Err(AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "authentication not configured",
            ));
        }
    };

    let token = issuer
        .issue_for_api_key(&request.api_key)
        .inspect_err(|err| warn!(error = %err, "token request rejected"))?;
    metrics::token_issued("api-key");
    Ok(Json(token))
}

async fn verify_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<VerifyResponse>, AppError> {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token);
    state.auth_gate().authenticate(credential)?;
    Ok(Json(VerifyResponse { valid: true }))
}
