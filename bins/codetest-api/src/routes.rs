// Route table for the codetest API

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes(state: Arc<AppState>) -> Router {
    let body_limit = state.limits.max_body_bytes;

    Router::new()
        .route("/test_code", post(handlers::test_code))
        .route("/status", get(handlers::health_check))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
