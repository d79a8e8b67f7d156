//! HTTP API handlers.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::controller::{ControllerStatus, SharedState, TradingStats};
use crate::risk::RiskStats;

/// State shared with the handlers.
#[derive(Clone)]
pub struct AppState {
    /// Controller-owned status snapshot.
    pub shared: Arc<SharedState>,
}

impl AppState {
    /// Wrap the controller's shared state.
    pub fn new(shared: Arc<SharedState>) -> Self {
        Self { shared }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "ok" when the process is serving.
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether the scan loop is running.
    pub ready: bool,
    /// Controller lifecycle state.
    pub controller: ControllerStatus,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Controller lifecycle state.
    pub controller: ControllerStatus,
    /// Trading counters.
    pub stats: TradingStats,
    /// Risk counters, once the loop has produced any.
    pub risk: Option<RiskStats>,
}

/// Liveness - always 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness - 200 while the scan loop runs, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let response = ReadyResponse {
        ready: state.shared.is_ready(),
        controller: state.shared.status(),
    };
    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Full status and counters.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        controller: state.shared.status(),
        stats: state.shared.stats(),
        risk: state.shared.risk_stats(),
    })
}
