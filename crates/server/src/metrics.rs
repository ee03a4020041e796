//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Metric descriptions for the HTTP layer and the job runner
//! - `track_requests` middleware that records every request

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    // Request metrics
    describe_counter!("http_requests_total", "Total number of HTTP requests");
    describe_histogram!(
        "http_request_duration_seconds",
        "Duration of HTTP requests in seconds"
    );

    // Job metrics
    describe_counter!("jobs_created_total", "Jobs admitted to the runner");
    describe_counter!("jobs_finished_total", "Jobs that reached a terminal status");
    describe_counter!("jobs_rejected_total", "Create requests rejected because the pool was full");
    describe_counter!("jobs_evicted_total", "Finished jobs dropped by the retention sweeper");
    describe_gauge!("jobs_in_flight", "Jobs currently holding a pool slot");
    describe_histogram!("job_duration_seconds", "Wall time of background jobs in seconds");
    describe_histogram!(
        "sync_operation_duration_seconds",
        "Wall time of synchronous operations in seconds"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Record a completed API request.
///
/// # Arguments
/// * `endpoint` - The matched route, e.g. "/api/data-mining/job/{id}"
/// * `method` - HTTP method
/// * `status` - HTTP status code
/// * `duration` - Request duration
pub fn record_request(endpoint: &str, method: &str, status: u16, duration: std::time::Duration) {
    counter!(
        "http_requests_total",
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("http_request_duration_seconds", "endpoint" => endpoint.to_string())
        .record(duration.as_secs_f64());
}

/// Middleware that times every request against its matched route.
///
/// Unmatched paths are grouped under "unmatched" to keep label cardinality bounded.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;
    record_request(&endpoint, &method, response.status().as_u16(), start.elapsed());
    response
}
