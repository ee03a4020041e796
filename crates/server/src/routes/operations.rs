// crates/server/src/routes/operations.rs
//! Synchronous operations: run a kind's stage plan inside the request.
//!
//! - POST /api/data-aggregation/aggregate
//! - POST /api/data-mining/mine
//! - POST /api/data-lifecycle/execute
//!
//! Nothing is written to the registry. If the client goes away the handler
//! future is dropped and the drop guard cancels the run.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Extension, Json, Router};
use bizverify_server_jobs::{JobKind, JobRequestBody};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct OperationResponse {
    pub success: bool,
    pub operation_id: String,
    pub kind: JobKind,
    pub operation: String,
    pub business_id: String,
    pub result: serde_json::Value,
    pub stages_completed: Vec<String>,
    pub processing_time_ms: u64,
}

async fn run_operation(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<JobKind>,
    payload: Result<Json<JobRequestBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = payload?;
    let request = body.validate(kind, &state.limits())?;

    let cancel = state.runner.shutdown_token().child_token();
    let _guard = cancel.clone().drop_guard();
    let timeout = state.config.sync_timeout();

    let run = tokio::time::timeout(timeout, state.runner.run_inline(&request, &cancel))
        .await
        .map_err(|_| ApiError::Timeout(timeout.as_secs()))??;

    let processing_time_ms = run.elapsed.as_millis() as u64;
    let headers = [
        (kind.operation_header(), run.operation_id.clone()),
        ("x-processing-time", processing_time_ms.to_string()),
    ];
    let response = OperationResponse {
        success: true,
        operation_id: run.operation_id,
        kind,
        operation: request.operation,
        business_id: request.business_id,
        result: run.result,
        stages_completed: run.stages_completed.into_iter().map(String::from).collect(),
        processing_time_ms,
    };
    Ok((headers, Json(response)))
}

/// The synchronous route for one kind, to be nested under its base path.
pub fn kind_router(kind: JobKind) -> Router<Arc<AppState>> {
    Router::new()
        .route(&format!("/{}", kind.sync_action()), post(run_operation))
        .layer(Extension(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bizverify_server_jobs::{ExecutionError, Executor, Executors, JobRequest, Stage};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    use crate::config::Config;

    struct Stalling;

    #[async_trait::async_trait]
    impl Executor for Stalling {
        async fn run_stage(&self, _: &JobRequest, _: &Stage) -> Result<(), ExecutionError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn execute(&self, _: &JobRequest) -> Result<serde_json::Value, ExecutionError> {
            Ok(serde_json::Value::Null)
        }
    }

    /// Parks in the first stage; flags when that stage is torn down.
    struct Parked {
        started: Arc<Notify>,
        torn_down: Arc<AtomicBool>,
    }

    struct TornDown(Arc<AtomicBool>);

    impl Drop for TornDown {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl Executor for Parked {
        async fn run_stage(&self, _: &JobRequest, _: &Stage) -> Result<(), ExecutionError> {
            let _flag = TornDown(self.torn_down.clone());
            self.started.notify_one();
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn execute(&self, _: &JobRequest) -> Result<serde_json::Value, ExecutionError> {
            Ok(serde_json::Value::Null)
        }
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .nest("/api/data-mining", kind_router(JobKind::Mining))
            .with_state(state)
    }

    fn mine_request() -> Request<Body> {
        let body = serde_json::json!({
            "business_id": "biz_1",
            "type": "anomaly_detection",
            "data": {"records": [{"v": 1}, {"v": 2}, {"v": 3}]},
        });
        Request::builder()
            .method("POST")
            .uri("/api/data-mining/mine")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_sync_run_returns_result_and_headers() {
        let state = AppState::new(Config {
            stage_delay_ms: 0,
            ..Config::default()
        });
        let response = app(state.clone()).oneshot(mine_request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let op_id = response.headers()["x-mining-id"].to_str().unwrap().to_string();
        assert!(op_id.starts_with("mine_sync_"));
        let header_ms: u64 = response.headers()["x-processing-time"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: OperationResponse = serde_json::from_slice(&body).unwrap();
        assert!(json.success);
        assert_eq!(json.operation_id, op_id);
        assert_eq!(json.processing_time_ms, header_ms);
        assert_eq!(json.stages_completed.len(), 6);
        assert_eq!(json.stages_completed[0], "validation");
        assert!(state.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_run_times_out_with_504() {
        let state = AppState::with_executors(
            Config {
                sync_timeout_secs: 1,
                ..Config::default()
            },
            Executors::uniform(Arc::new(Stalling)),
        );
        let response = app(state).oneshot(mine_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_client_disconnect_stops_the_run() {
        let started = Arc::new(Notify::new());
        let torn_down = Arc::new(AtomicBool::new(false));
        let state = AppState::with_executors(
            Config::default(),
            Executors::uniform(Arc::new(Parked {
                started: started.clone(),
                torn_down: torn_down.clone(),
            })),
        );

        let in_flight = tokio::spawn(app(state.clone()).oneshot(mine_request()));
        started.notified().await;
        assert!(!torn_down.load(Ordering::SeqCst));

        in_flight.abort();
        assert!(in_flight.await.unwrap_err().is_cancelled());
        assert!(torn_down.load(Ordering::SeqCst));
        assert!(state.registry().is_empty());
        assert!(!state.runner.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_sync_run_rejects_foreign_operation_type() {
        let state = AppState::new(Config::default());
        let body = serde_json::json!({
            "business_id": "biz_1",
            "type": "archival",
            "data": {"a": 1},
        });
        let request = Request::builder()
            .method("POST")
            .uri("/api/data-mining/mine")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
