use crate::state::AppState;
use crate::{api, logging, middleware as mw};
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::Router;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;

/// The HTTP service. Layers, from the outside in: response compression,
/// request logging, request timeout (408), payload decoding, response
/// signing.
pub fn build_http_app(state: AppState, request_timeout: Duration) -> Router {
    api::routes()
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .layer(middleware::from_fn_with_state(state.clone(), mw::sign_response))
        .layer(middleware::from_fn_with_state(state.clone(), mw::decode_payload))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(logging::request_logging))
        .layer(CompressionLayer::new())
        .with_state(state)
}
