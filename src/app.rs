//! Router assembly
//!
//! The versioned API sits behind the auth and rate-limit layers; health
//! probes do not. Unknown routes fall through to a JSON 404 so every
//! response on this server shares the same error envelope.

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::middleware as mw;
use crate::routes;
use crate::state::AppState;

async fn not_found() -> AppError {
    AppError::NotFound
}

/// Build the application router around the shared state.
pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route(
            "/pdf",
            post(routes::pdf::convert_html).get(routes::pdf::convert_url),
        )
        .route("/chrome/stats", get(routes::stats::chrome_stats))
        .layer(from_fn_with_state(state.clone(), mw::rate_limit))
        .layer(from_fn_with_state(state.clone(), mw::auth));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/v1", v1)
        .merge(routes::health::router())
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}
