// crates/server-jobs/src/lib.rs
//! In-memory job system for verification workloads.
//!
//! Provides:
//! - `JobRegistry`: thread-safe store of job records
//! - `JobRunner`: bounded pool that drives jobs through a `StagePlan`
//! - `Executor`: the per-kind work behind each stage
//! - `JobRequestBody`: request decoding and validation

pub mod builtin;
pub mod executor;
pub mod plan;
pub mod registry;
pub mod request;
pub mod runner;
pub mod types;

pub use builtin::BuiltinExecutor;
pub use executor::{ExecutionError, Executor, Executors};
pub use plan::{Stage, StagePlan};
pub use registry::{JobFilter, JobPage, JobRegistry, Page, RetentionPolicy, StatusCounts};
pub use request::{JobRequest, JobRequestBody, ValidationError, ValidationLimits};
pub use runner::{CancelError, DriveError, InlineRun, JobRunner, SubmitError};
pub use types::{JobId, JobKind, JobRecord, JobStatus, NewJob, TransitionError, UnknownVariant};
