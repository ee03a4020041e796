// crates/server-jobs/src/executor.rs
//! The contract between the runner and the code that does a job's work.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::plan::Stage;
use super::request::JobRequest;
use super::types::JobKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0}")]
    Failed(String),
}

/// Work performed for one job kind.
///
/// Implementations must be safe to call from a background task. The runner
/// races every call against the job's cancellation token, so a long call is
/// simply dropped when the job is cancelled.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Work for one non-final stage.
    async fn run_stage(&self, request: &JobRequest, stage: &Stage) -> Result<(), ExecutionError>;

    /// The core computation, invoked on the final stage.
    async fn execute(&self, request: &JobRequest) -> Result<serde_json::Value, ExecutionError>;
}

/// One executor per job kind.
#[derive(Clone)]
pub struct Executors {
    aggregation: Arc<dyn Executor>,
    mining: Arc<dyn Executor>,
    lifecycle: Arc<dyn Executor>,
}

impl Executors {
    /// Use the same executor for every kind.
    pub fn uniform(executor: Arc<dyn Executor>) -> Self {
        Self {
            aggregation: Arc::clone(&executor),
            mining: Arc::clone(&executor),
            lifecycle: executor,
        }
    }

    /// Replace the executor for one kind.
    pub fn with(mut self, kind: JobKind, executor: Arc<dyn Executor>) -> Self {
        match kind {
            JobKind::Aggregation => self.aggregation = executor,
            JobKind::Mining => self.mining = executor,
            JobKind::Lifecycle => self.lifecycle = executor,
        }
        self
    }

    pub fn get(&self, kind: JobKind) -> &Arc<dyn Executor> {
        match kind {
            JobKind::Aggregation => &self.aggregation,
            JobKind::Mining => &self.mining,
            JobKind::Lifecycle => &self.lifecycle,
        }
    }
}
