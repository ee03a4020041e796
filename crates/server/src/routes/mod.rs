//! API route handlers for the bizverify server.

pub mod health;
pub mod jobs;
pub mod metrics;
pub mod operations;

use std::sync::Arc;

use axum::Router;
use bizverify_server_jobs::JobKind;

use crate::state::AppState;

/// Routes served under one kind's base path.
fn kind_routes(kind: JobKind) -> Router<Arc<AppState>> {
    jobs::kind_router(kind).merge(operations::kind_router(kind))
}

/// Create the combined API router.
///
/// Routes, for each `<base>` in `/api/data-aggregation`, `/api/data-mining`,
/// `/api/data-lifecycle`:
/// - POST <base>/job - Create an async job
/// - GET  <base>/job/{id}, <base>/job?id= - Fetch a job
/// - POST <base>/job/{id}/cancel - Cancel a job
/// - GET  <base>/jobs - List jobs of the kind
/// - POST <base>/aggregate | mine | execute - Synchronous run
///
/// And:
/// - GET /api/jobs - List jobs of every kind
/// - GET /api/health - Health check
/// - GET /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .merge(metrics::router());
    for kind in JobKind::ALL {
        router = router.nest(&format!("/api/{}", kind.route_segment()), kind_routes(kind));
    }
    router.with_state(state)
}
