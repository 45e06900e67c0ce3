//! HTTP route handlers for the optional local status endpoint.
//!
//! Enabled by `[status] listen`. The tunnel never depends on it.

pub mod health;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Router serving `GET /api/health`.
pub fn status_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
