//! Authentication and rate-limit middleware
//!
//! Runs ahead of the versioned routes in this order: API-key validation,
//! per-key rate limit, anonymous rate limit. Keyless requests (and OPTIONS)
//! pass the auth layer untouched; enforcement of key requirements is a
//! downstream concern. A request that authenticated with a valid key never
//! reaches the anonymous limiter.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;

use crate::error::AppError;
use crate::state::AppState;

/// The validated API key of an authenticated request, stored as a request
/// extension by [`auth`].
#[derive(Debug, Clone)]
pub struct ApiKey(pub String);

/// Validate `X-API-Key` when present. An unready token store answers 503, an
/// unknown key 401.
pub async fn auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let key = req
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    if req.method() == Method::OPTIONS || key.is_empty() {
        return next.run(req).await;
    }

    if !state.tokens().ready() {
        return AppError::AuthNotReady.into_response();
    }
    if !state.tokens().validate(&key) {
        return AppError::AuthInvalid.into_response();
    }

    req.extensions_mut().insert(ApiKey(key));
    next.run(req).await
}

/// Apply per-key and anonymous rate limits, in that order. A valid key with
/// a positive limit is governed only by its own budget.
pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(ApiKey(key)) = req.extensions().get::<ApiKey>() {
        let limit = state.tokens().rate_limit(key);
        if limit > 0 && !state.rate_gate().check_key(key, limit).await {
            tracing::warn!(token = %key, path = %req.uri().path(), "Rate limit exceeded");
            return AppError::RateExceeded.into_response();
        }
    } else if state.rate_gate().anonymous_enabled() {
        let ip = client_ip(&req);
        let user_agent = req
            .headers()
            .get("user-agent")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !state.rate_gate().check_anonymous(&ip, &user_agent).await {
            tracing::warn!(path = %req.uri().path(), "Anonymous rate limit exceeded");
            return AppError::RateExceeded.into_response();
        }
    }

    next.run(req).await
}

fn client_ip(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_default()
}
