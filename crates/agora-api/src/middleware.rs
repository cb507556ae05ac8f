use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use axum_extra::typed_header::TypedHeaderRejection;
use chrono::{DurationRound, TimeDelta, Utc};
use tracing::{debug, error};

use agora_types::api::Claims;

use crate::auth::decode_token;
use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate the bearer JWT, then expose its claims to handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.map_err(|_| ApiError::Unauthenticated)?;

    let claims = decode_token(&state.jwt_secret, bearer.token()).map_err(|e| {
        debug!("Rejected bearer token: {}", e);
        ApiError::Unauthenticated
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Fixed one-minute window per (user, route), counted in the shared store
/// so every server instance enforces the same budget. Runs after
/// `require_auth`.
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id = req
        .extensions()
        .get::<Claims>()
        .map(|c| c.sub)
        .ok_or(ApiError::Unauthenticated)?;
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let key = format!("{}:{} {}", user_id, req.method(), route);

    let now = Utc::now();
    let window_start = now
        .duration_trunc(TimeDelta::minutes(1))
        .map_err(|e| ApiError::Internal(e.into()))?;
    let expires_at = window_start + TimeDelta::minutes(2);

    let db = state.chat.db().clone();
    let count = tokio::task::spawn_blocking(move || db.hit_counter(&key, window_start, expires_at))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })??;

    if count > state.rate_limit_per_minute {
        debug!("Rate limit hit for user {} on {}", user_id, route);
        return Err(ApiError::RateLimited);
    }

    Ok(next.run(req).await)
}
