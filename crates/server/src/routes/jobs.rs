// crates/server/src/routes/jobs.rs
//! API routes for asynchronous jobs.
//!
//! Mounted under each kind's base (`/api/data-aggregation`, ...):
//! - POST /job              create a job, 201 + `X-Job-ID`
//! - GET  /job/{id}         fetch one job
//! - GET  /job?id=          same, id in the query
//! - POST /job/{id}/cancel  cancel a pending or processing job
//! - GET  /jobs             list jobs of the kind
//!
//! Plus `GET /api/jobs`, listing every kind.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use bizverify_server_jobs::{JobFilter, JobKind, JobRecord, JobRequestBody, JobStatus, Page};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct CreateJobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct JobIdQuery {
    pub id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub business_id: Option<String>,
    pub kind: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobRecord>,
    pub pagination: Pagination,
}

impl ListQuery {
    /// Resolve the paging window. `offset` wins over `page` when both are set.
    fn window(&self) -> (Page, usize) {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        match self.offset {
            Some(offset) => (Page { offset, limit }, offset / limit + 1),
            None => {
                let page = self.page.unwrap_or(1).max(1);
                let offset = (page - 1).saturating_mul(limit);
                (Page { offset, limit }, page)
            }
        }
    }

    fn filter(&self, kind: Option<JobKind>) -> ApiResult<JobFilter> {
        let status = self
            .status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<JobStatus>()
                    .map_err(|_| ApiError::BadRequest(format!("invalid status '{s}'")))
            })
            .transpose()?;
        let kind = match kind {
            Some(kind) => Some(kind),
            None => self
                .kind
                .as_deref()
                .filter(|k| !k.is_empty())
                .map(|k| {
                    k.parse::<JobKind>()
                        .map_err(|_| ApiError::BadRequest(format!("invalid kind '{k}'")))
                })
                .transpose()?,
        };
        Ok(JobFilter {
            kind,
            status,
            business_id: self.business_id.clone().filter(|b| !b.is_empty()),
        })
    }
}

fn list(
    state: &AppState,
    query: Result<Query<ListQuery>, QueryRejection>,
    kind: Option<JobKind>,
) -> ApiResult<Json<JobListResponse>> {
    let Query(query) = query?;
    let filter = query.filter(kind)?;
    let (window, page) = query.window();
    let result = state.registry().list(&filter, window);
    Ok(Json(JobListResponse {
        jobs: result.jobs,
        pagination: Pagination {
            page,
            limit: window.limit,
            total: result.total,
        },
    }))
}

/// A job of `kind`, or 404. Jobs of other kinds are invisible under this base.
fn find(state: &AppState, kind: JobKind, id: &str) -> ApiResult<JobRecord> {
    state
        .registry()
        .get(id)
        .filter(|rec| rec.kind == kind)
        .ok_or_else(|| ApiError::JobNotFound(id.to_string()))
}

/// POST <base>/job: validate, admit and start a job.
async fn create_job(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<JobKind>,
    payload: Result<Json<JobRequestBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = payload?;
    let request = body.validate(kind, &state.limits())?;
    let record = state.runner.submit(request)?;

    let response = CreateJobResponse {
        job_id: record.id.clone(),
        status: record.status,
        created_at: record.created_at,
        message: format!("{kind} job created; poll the job endpoint for progress"),
    };
    Ok((
        StatusCode::CREATED,
        [("x-job-id", record.id)],
        Json(response),
    ))
}

/// GET <base>/job/{id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<JobKind>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    find(&state, kind, &id).map(Json)
}

/// GET <base>/job?id=
async fn get_job_by_query(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<JobKind>,
    query: Result<Query<JobIdQuery>, QueryRejection>,
) -> ApiResult<Json<JobRecord>> {
    let Query(query) = query?;
    let id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("id is required".to_string()))?;
    find(&state, kind, &id).map(Json)
}

/// POST <base>/job/{id}/cancel
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<JobKind>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    find(&state, kind, &id)?;
    Ok(Json(state.runner.cancel(&id)?))
}

/// GET <base>/jobs
async fn list_kind_jobs(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<JobKind>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<JobListResponse>> {
    list(&state, query, Some(kind))
}

/// GET /api/jobs: list jobs across every kind.
async fn list_all_jobs(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<JobListResponse>> {
    list(&state, query, None)
}

/// Job routes for one kind, to be nested under its base path.
pub fn kind_router(kind: JobKind) -> Router<Arc<AppState>> {
    Router::new()
        .route("/job", post(create_job).get(get_job_by_query))
        .route("/job/{id}", get(get_job))
        .route("/job/{id}/cancel", post(cancel_job))
        .route("/jobs", get(list_kind_jobs))
        .layer(Extension(kind))
}

/// Build the cross-kind jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/jobs", get(list_all_jobs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn query(page: Option<usize>, limit: Option<usize>, offset: Option<usize>) -> ListQuery {
        ListQuery {
            page,
            limit,
            offset,
            ..ListQuery::default()
        }
    }

    #[test]
    fn test_window_defaults() {
        let (window, page) = query(None, None, None).window();
        assert_eq!(window, Page { offset: 0, limit: DEFAULT_PAGE_LIMIT });
        assert_eq!(page, 1);
    }

    #[test]
    fn test_window_clamps_limit() {
        let (window, _) = query(None, Some(1000), None).window();
        assert_eq!(window.limit, MAX_PAGE_LIMIT);
        let (window, _) = query(None, Some(0), None).window();
        assert_eq!(window.limit, 1);
    }

    #[test]
    fn test_window_page_to_offset() {
        let (window, page) = query(Some(3), Some(10), None).window();
        assert_eq!(window, Page { offset: 20, limit: 10 });
        assert_eq!(page, 3);
    }

    #[test]
    fn test_offset_overrides_page() {
        let (window, page) = query(Some(5), Some(10), Some(15)).window();
        assert_eq!(window, Page { offset: 15, limit: 10 });
        assert_eq!(page, 2);
    }

    #[test]
    fn test_filter_rejects_unknown_status() {
        let q = ListQuery {
            status: Some("sleeping".to_string()),
            ..ListQuery::default()
        };
        assert!(matches!(q.filter(None), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_fixed_kind_ignores_kind_param() {
        let q = ListQuery {
            kind: Some("nonsense".to_string()),
            ..ListQuery::default()
        };
        let filter = q.filter(Some(JobKind::Mining)).unwrap();
        assert_eq!(filter.kind, Some(JobKind::Mining));
    }
}
