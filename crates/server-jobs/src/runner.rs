// crates/server-jobs/src/runner.rs
//! Central job runner that admits, drives and cancels jobs.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::executor::{ExecutionError, Executor, Executors};
use super::plan::{Stage, StagePlan};
use super::registry::{JobRegistry, RetentionPolicy};
use super::request::JobRequest;
use super::types::{IdGenerator, JobId, JobRecord, JobStatus, NewJob};

/// Reason written into a job cancelled through the API.
pub const CANCELLED_BY_CLIENT: &str = "cancelled by client";
/// Reason written into jobs still running when the runner shuts down.
pub const CANCELLED_BY_SHUTDOWN: &str = "cancelled: server shutting down";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("too many in-flight jobs (limit {limit})")]
    TooManyInFlight { limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job {id} is already {status}")]
    AlreadyFinished { id: JobId, status: JobStatus },
}

/// Why a stage walk stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriveError {
    #[error(transparent)]
    Failed(#[from] ExecutionError),

    #[error("operation cancelled")]
    Cancelled,
}

/// Outcome of a synchronous run.
#[derive(Debug, Clone)]
pub struct InlineRun {
    pub operation_id: String,
    pub result: serde_json::Value,
    pub stages_completed: Vec<&'static str>,
    pub elapsed: Duration,
}

/// Walk `plan` with `executor`, calling `on_stage` as each stage begins.
///
/// The final stage runs [`Executor::execute`] and its value is returned.
/// Every executor call is raced against `cancel`.
pub async fn drive<F>(
    plan: StagePlan,
    executor: &dyn Executor,
    request: &JobRequest,
    cancel: &CancellationToken,
    mut on_stage: F,
) -> Result<serde_json::Value, DriveError>
where
    F: FnMut(usize, &Stage),
{
    let stages = plan.stages();
    let (last_index, rest) = match stages.split_last() {
        Some((_, rest)) => (rest.len(), rest),
        None => (0, stages),
    };

    for (index, stage) in rest.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(DriveError::Cancelled);
        }
        on_stage(index, stage);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DriveError::Cancelled),
            res = executor.run_stage(request, stage) => res?,
        }
    }

    if cancel.is_cancelled() {
        return Err(DriveError::Cancelled);
    }
    if let Some(last) = stages.last() {
        on_stage(last_index, last);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DriveError::Cancelled),
        res = executor.execute(request) => Ok(res?),
    }
}

/// Admits jobs into a bounded pool, spawns one runner task per job and
/// tracks a cancellation token for each.
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    executors: Executors,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    tokens: Arc<RwLock<HashMap<JobId, CancellationToken>>>,
    shutdown: CancellationToken,
    operation_ids: IdGenerator,
}

impl JobRunner {
    pub fn new(registry: Arc<JobRegistry>, executors: Executors, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            registry,
            executors,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            tokens: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            operation_ids: IdGenerator::new(),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Jobs currently holding a pool slot.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Token cancelled by [`JobRunner::shutdown`]; every job token is a child.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Insert a pending job and start its runner.
    ///
    /// Fails without touching the registry when the pool is full.
    pub fn submit(&self, request: JobRequest) -> Result<JobRecord, SubmitError> {
        let kind = request.kind;
        let permit = Arc::clone(&self.permits).try_acquire_owned().map_err(|_| {
            counter!("jobs_rejected_total", "kind" => kind.as_str()).increment(1);
            tracing::warn!(kind = %kind, limit = self.max_in_flight, "Rejecting job: pool full");
            SubmitError::TooManyInFlight {
                limit: self.max_in_flight,
            }
        })?;

        let plan = StagePlan::for_kind(kind);
        let record = self.registry.insert(NewJob {
            kind,
            business_id: request.business_id.clone(),
            operation: request.operation.clone(),
            total_stages: plan.len(),
        });
        let id = record.id.clone();

        let token = self.shutdown.child_token();
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), token.clone());

        counter!("jobs_created_total", "kind" => kind.as_str()).increment(1);
        gauge!("jobs_in_flight").set(self.in_flight() as f64);
        tracing::info!(job_id = %id, kind = %kind, business_id = %request.business_id, "Job created");

        let task = RunnerTask {
            registry: Arc::clone(&self.registry),
            tokens: Arc::clone(&self.tokens),
            permits: Arc::clone(&self.permits),
            max_in_flight: self.max_in_flight,
            executor: Arc::clone(self.executors.get(kind)),
            plan,
            id,
            token,
        };
        tokio::spawn(task.run(request, permit));

        Ok(record)
    }

    /// Mark a pending or processing job cancelled and signal its runner.
    pub fn cancel(&self, id: &str) -> Result<JobRecord, CancelError> {
        let outcome = self.registry.update(id, |rec| {
            rec.cancel(CANCELLED_BY_CLIENT, Utc::now())
                .map(|()| rec.clone())
        });
        match outcome {
            None => Err(CancelError::NotFound(id.to_string())),
            Some(Err(e)) => Err(CancelError::AlreadyFinished {
                id: id.to_string(),
                status: e.from,
            }),
            Some(Ok(record)) => {
                if let Some(token) = self
                    .tokens
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(id)
                {
                    token.cancel();
                }
                tracing::info!(job_id = %id, "Job cancelled");
                Ok(record)
            }
        }
    }

    /// Run a request inline on the caller's task; nothing touches the registry.
    pub async fn run_inline(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<InlineRun, DriveError> {
        let started = Instant::now();
        let (operation_id, _) = self
            .operation_ids
            .next(&format!("{}_sync", request.kind.id_prefix()));
        let mut stages_completed = Vec::new();

        let outcome = drive(
            StagePlan::for_kind(request.kind),
            self.executors.get(request.kind).as_ref(),
            request,
            cancel,
            |_, stage| stages_completed.push(stage.name),
        )
        .await;

        let elapsed = started.elapsed();
        histogram!("sync_operation_duration_seconds", "kind" => request.kind.as_str())
            .record(elapsed.as_secs_f64());
        match outcome {
            Ok(result) => {
                tracing::info!(
                    operation_id = %operation_id,
                    kind = %request.kind,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Inline operation completed"
                );
                Ok(InlineRun {
                    operation_id,
                    result,
                    stages_completed,
                    elapsed,
                })
            }
            Err(e) => {
                tracing::warn!(operation_id = %operation_id, kind = %request.kind, error = %e, "Inline operation failed");
                Err(e)
            }
        }
    }

    /// Periodically drop terminal jobs outside `policy` until shutdown.
    pub fn spawn_retention_sweeper(&self, policy: RetentionPolicy, every: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let evicted = registry.evict(&policy, Utc::now());
                if evicted > 0 {
                    counter!("jobs_evicted_total").increment(evicted as u64);
                }
            }
            tracing::debug!("Retention sweeper stopped");
        })
    }

    /// Cancel every in-flight job and stop background tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Everything one background runner needs, moved into its task.
struct RunnerTask {
    registry: Arc<JobRegistry>,
    tokens: Arc<RwLock<HashMap<JobId, CancellationToken>>>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    executor: Arc<dyn Executor>,
    plan: StagePlan,
    id: JobId,
    token: CancellationToken,
}

impl RunnerTask {
    async fn run(self, request: JobRequest, permit: OwnedSemaphorePermit) {
        let started = Instant::now();
        let id = self.id.as_str();

        match self.registry.update(id, |rec| rec.start(Utc::now())) {
            Some(Ok(())) => {
                tracing::debug!(job_id = %id, "Job processing");
                let registry = &self.registry;
                let outcome = drive(
                    self.plan,
                    self.executor.as_ref(),
                    &request,
                    &self.token,
                    |index, stage| {
                        let _ = registry.update(id, |rec| {
                            rec.enter_stage(index, stage.name, stage.description, stage.progress)
                        });
                    },
                )
                .await;
                self.finish(outcome);
            }
            Some(Err(e)) => tracing::debug!(job_id = %id, error = %e, "Job not started"),
            None => tracing::warn!(job_id = %id, "Job vanished before start"),
        }

        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        drop(permit);
        gauge!("jobs_in_flight").set((self.max_in_flight - self.permits.available_permits()) as f64);

        if let Some(rec) = self.registry.get(id) {
            counter!(
                "jobs_finished_total",
                "kind" => rec.kind.as_str(),
                "status" => rec.status.as_str()
            )
            .increment(1);
            histogram!("job_duration_seconds", "kind" => rec.kind.as_str())
                .record(started.elapsed().as_secs_f64());
        }
    }

    fn finish(&self, outcome: Result<serde_json::Value, DriveError>) {
        let id = self.id.as_str();
        let now = Utc::now();
        let written = match outcome {
            Ok(result) => self.registry.update(id, |rec| rec.complete(result, now)),
            Err(DriveError::Failed(e)) => {
                tracing::warn!(job_id = %id, error = %e, "Job failed");
                self.registry.update(id, |rec| rec.fail(e.to_string(), now))
            }
            Err(DriveError::Cancelled) => self.registry.update(id, |rec| {
                if rec.status.is_terminal() {
                    Ok(())
                } else {
                    rec.cancel(CANCELLED_BY_SHUTDOWN, now)
                }
            }),
        };
        match written {
            Some(Ok(())) => tracing::info!(job_id = %id, "Job finished"),
            Some(Err(e)) => tracing::debug!(job_id = %id, error = %e, "Job already terminal"),
            None => tracing::warn!(job_id = %id, "Job vanished before completion"),
        }
    }
}
