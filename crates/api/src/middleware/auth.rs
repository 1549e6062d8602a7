//! Shared-secret guards for the internal routes.
//!
//! The scheduled trigger presents `QUILL_CRON_SECRET` as a bearer token; the
//! on-demand trigger and the read interface present `QUILL_INTERNAL_TOKEN` in
//! `X-Internal-Token`. Both are compared in constant time.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use quill_core::signing::tokens_match;
use tracing::warn;

use crate::{
    error::{AppError, ApiError},
    middleware::request_id,
    state::AppState,
};

pub const INTERNAL_TOKEN_HEADER: &str = "X-Internal-Token";

pub async fn cron_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let request_id = request_id::current(&req);
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(parse_bearer)
        .unwrap_or_default();

    if !tokens_match(&state.settings.cron_secret, token) {
        warn!(path = %req.uri().path(), %request_id, "rejected cron trigger");
        return Err(AppError::Unauthorized.with_request_id(&request_id));
    }

    Ok(next.run(req).await)
}

pub async fn internal_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let request_id = request_id::current(&req);
    let token = req
        .headers()
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if !tokens_match(&state.settings.internal_token, token) {
        warn!(path = %req.uri().path(), %request_id, "rejected internal request");
        return Err(AppError::Unauthorized.with_request_id(&request_id));
    }

    Ok(next.run(req).await)
}

fn parse_bearer(value: &HeaderValue) -> Option<&str> {
    let value = value.to_str().ok()?;
    let mut parts = value.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default();
    if scheme != "Bearer" || token.is_empty() {
        return None;
    }
    Some(token)
}
