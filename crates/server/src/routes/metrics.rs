// crates/server/src/routes/metrics.rs
//! `GET /metrics`: job, sync-run and HTTP counters for Prometheus to scrape.

use std::sync::Arc;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::metrics::render_metrics;
use crate::state::AppState;

/// Render the recorder, or 503 when the binary never installed one
/// (library users and most tests).
pub async fn metrics_handler() -> Response {
    match render_metrics() {
        Some(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// Scrape route, merged at the root beside `/api`.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(metrics_handler))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use crate::config::Config;

    #[tokio::test]
    async fn test_scrape_is_prometheus_text() {
        crate::metrics::init_metrics();

        let app = crate::create_app(Config::default());
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));
    }

    #[tokio::test]
    async fn test_scrape_reports_job_and_request_counters() {
        crate::metrics::init_metrics();

        let app = crate::create_app(Config {
            stage_delay_ms: 0,
            ..Config::default()
        });
        let job = serde_json::json!({
            "business_id": "biz_1",
            "type": "summary",
            "data": {"records": [{"revenue": 1.0}]},
        });
        let created = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/data-aggregation/job")
                    .header("content-type", "application/json")
                    .body(Body::from(job.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();
        assert!(body_str.contains("http_requests_total"));
        assert!(body_str.contains("jobs_created_total"));
    }
}
