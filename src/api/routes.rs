//! HTTP API route definitions.

use axum::{routing::get, Router};

use super::handlers::{health, ready, status, AppState};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/v1/status", get(status))
        .with_state(state)
}
