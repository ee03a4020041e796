// crates/server/src/lib.rs
//! bizverify server library.
//!
//! Axum HTTP facade over the in-memory job system: asynchronous jobs and
//! synchronous runs for aggregation, mining and lifecycle work.

pub mod config;
pub mod error;
pub mod health_cache;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{middleware, Router};
use bizverify_observability::{http_span, MakeRequestUlid};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Room for the request envelope around `data` (ids, type, JSON framing).
const BODY_ENVELOPE_BYTES: usize = 64 * 1024;

/// Create the Axum application with fresh state built from `config`.
pub fn create_app(config: Config) -> Router {
    create_app_with_state(AppState::new(config))
}

/// Create the Axum application around existing state.
///
/// This sets up:
/// - API routes (jobs, sync operations, health, metrics)
/// - Request metrics per matched route
/// - `x-request-id` assignment and propagation
/// - Request tracing
/// - Body limit sized to `max_payload_bytes` plus envelope
/// - CORS (allows any origin)
pub fn create_app_with_state(state: Arc<AppState>) -> Router {
    let body_limit = state
        .config
        .max_payload_bytes
        .saturating_add(BODY_ENVELOPE_BYTES);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api_routes(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(metrics::track_requests))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUlid))
                .layer(TraceLayer::new_for_http().make_span_with(http_span::<axum::body::Body>))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        (status, body_str)
    }

    #[tokio::test]
    async fn test_health_endpoint_response_structure() {
        let app = create_app(Config::default());
        let (status, body) = get(app, "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["uptime_secs"].is_number());
        assert!(json["checks"]["registry"].is_object());
    }

    #[tokio::test]
    async fn test_request_id_is_assigned() {
        let app = create_app(Config::default());
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let id = response.headers().get("x-request-id").unwrap();
        assert_eq!(id.to_str().unwrap().len(), 26);
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let app = create_app(Config::default());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("x-request-id", "caller-supplied")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-request-id"], "caller-supplied");
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let app = create_app(Config::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("Origin", "http://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let allow_origin = response.headers().get("access-control-allow-origin");
        assert_eq!(allow_origin.unwrap(), "*");
    }

    #[tokio::test]
    async fn test_404_for_unknown_route() {
        let app = create_app(Config::default());
        let (status, _body) = get(app, "/api/data-unknown/jobs").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_404_for_non_api_path() {
        let app = create_app(Config::default());
        let (status, _body) = get(app, "/health").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
