// crates/server/src/routes/health.rs
//! Health check endpoint for the API.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::health_cache::HealthChecks;
use crate::state::AppState;

/// Response for the health check endpoint.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub checks: HealthChecks,
    /// Whether `checks` came from the cache.
    pub cached: bool,
}

/// GET /api/health - Health check endpoint.
///
/// Returns server status, version, uptime and the (possibly cached) checks.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (checks, cached) = state
        .health
        .get_or_refresh(|| HealthChecks::collect(&state.runner));
    Json(HealthResponse {
        status: if checks.is_healthy() { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        checks,
        cached,
    })
}

/// Create the health routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
