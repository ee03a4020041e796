// crates/server-jobs/src/types.rs
//! Types for the background job system.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier for a job, formatted `<prefix>_<unix_ts>_<counter>`.
pub type JobId = String;

/// Which operation created a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Aggregation,
    Mining,
    Lifecycle,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Aggregation, JobKind::Mining, JobKind::Lifecycle];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggregation => "aggregation",
            Self::Mining => "mining",
            Self::Lifecycle => "lifecycle",
        }
    }

    /// Prefix used for job and operation identifiers.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Aggregation => "agg",
            Self::Mining => "mine",
            Self::Lifecycle => "lifecycle",
        }
    }

    /// Path segment under `/api` that serves this kind.
    pub fn route_segment(&self) -> &'static str {
        match self {
            Self::Aggregation => "data-aggregation",
            Self::Mining => "data-mining",
            Self::Lifecycle => "data-lifecycle",
        }
    }

    /// Path of the synchronous operation under the kind's segment.
    pub fn sync_action(&self) -> &'static str {
        match self {
            Self::Aggregation => "aggregate",
            Self::Mining => "mine",
            Self::Lifecycle => "execute",
        }
    }

    /// Response header carrying the operation id of a synchronous run.
    pub fn operation_header(&self) -> &'static str {
        match self {
            Self::Aggregation => "x-aggregation-id",
            Self::Mining => "x-mining-id",
            Self::Lifecycle => "x-lifecycle-id",
        }
    }

    /// Operation types accepted in the `type` field of a request.
    pub fn operations(&self) -> &'static [&'static str] {
        match self {
            Self::Aggregation => &["aggregation", "summary", "statistics", "deduplication"],
            Self::Mining => &[
                "clustering",
                "classification",
                "anomaly_detection",
                "pattern_discovery",
                "association_rules",
            ],
            Self::Lifecycle => &["archival", "retention", "purge", "restore"],
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown value '{0}'")]
pub struct UnknownVariant(pub String);

impl FromStr for JobKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// Status of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Fields the facade supplies when inserting a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: JobKind,
    pub business_id: String,
    pub operation: String,
    pub total_stages: usize,
}

/// A tracked job, as stored in the registry and served over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub business_id: String,
    pub operation: String,
    pub status: JobStatus,
    pub progress: f64,
    pub current_step: Option<String>,
    pub step_description: Option<String>,
    pub stage_index: usize,
    pub total_stages: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Insertion order within the registry.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl JobRecord {
    pub(crate) fn new(id: JobId, seq: u64, job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: job.kind,
            business_id: job.business_id,
            operation: job.operation,
            status: JobStatus::Pending,
            progress: 0.0,
            current_step: None,
            step_description: None,
            stage_index: 0,
            total_stages: job.total_stages,
            created_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            seq,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Cancelled)
        );
        if !allowed {
            return Err(TransitionError { from: self.status, to });
        }
        self.status = to;
        Ok(())
    }

    /// `pending -> processing`; stamps `started_at`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Move the stage cursor. Progress never moves backwards.
    pub fn enter_stage(
        &mut self,
        index: usize,
        name: &str,
        description: &str,
        progress: f64,
    ) -> Result<(), TransitionError> {
        if self.status != JobStatus::Processing {
            return Err(TransitionError {
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        self.stage_index = index;
        self.current_step = Some(name.to_string());
        self.step_description = Some(description.to_string());
        self.progress = self.progress.max(progress.clamp(0.0, 1.0));
        Ok(())
    }

    pub fn complete(
        &mut self,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(JobStatus::Completed)?;
        self.progress = 1.0;
        self.stage_index = self.total_stages;
        self.result = Some(result);
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Cancelled)?;
        self.error = Some(reason.into());
        self.completed_at = Some(now);
        Ok(())
    }
}

/// Generates `<prefix>_<unix_ts>_<counter>` identifiers.
///
/// The counter is process-wide for one generator, so two ids minted in the
/// same second never collide.
#[derive(Debug)]
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    /// Returns the new id and its sequence number.
    pub fn next(&self, prefix: &str) -> (String, u64) {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        (format!("{prefix}_{}_{seq}", Utc::now().timestamp()), seq)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new(
            "agg_1_1".to_string(),
            1,
            NewJob {
                kind: JobKind::Aggregation,
                business_id: "biz_1".to_string(),
                operation: "aggregation".to_string(),
                total_stages: 6,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_job_status_round_trips_through_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_kind_parse() {
        assert_eq!("mining".parse::<JobKind>(), Ok(JobKind::Mining));
        assert_eq!(
            "data-mining".parse::<JobKind>(),
            Err(UnknownVariant("data-mining".to_string()))
        );
    }

    #[test]
    fn test_record_happy_path() {
        let mut rec = record();
        assert_eq!(rec.status, JobStatus::Pending);

        rec.start(Utc::now()).unwrap();
        assert!(rec.started_at.is_some());

        rec.enter_stage(0, "validation", "Validating input", 0.1).unwrap();
        rec.enter_stage(1, "data_collection", "Collecting", 0.2).unwrap();
        assert_eq!(rec.current_step.as_deref(), Some("data_collection"));

        rec.complete(serde_json::json!({"ok": true}), Utc::now()).unwrap();
        assert_eq!(rec.status, JobStatus::Completed);
        assert_eq!(rec.progress, 1.0);
        assert!(rec.completed_at.is_some());
        assert!(rec.error.is_none());
    }

    #[test]
    fn test_record_rejects_regression() {
        let mut rec = record();
        rec.start(Utc::now()).unwrap();
        rec.fail("boom", Utc::now()).unwrap();

        let err = rec.start(Utc::now()).unwrap_err();
        assert_eq!(err.from, JobStatus::Failed);
        assert!(rec.complete(serde_json::Value::Null, Utc::now()).is_err());
        assert!(rec.cancel("late", Utc::now()).is_err());
        assert!(rec.enter_stage(2, "x", "y", 0.4).is_err());
        assert_eq!(rec.error.as_deref(), Some("boom"));
        assert!(rec.result.is_none());
    }

    #[test]
    fn test_started_at_set_once() {
        let mut rec = record();
        rec.start(Utc::now()).unwrap();
        let first = rec.started_at;
        assert!(rec.start(Utc::now()).is_err());
        assert_eq!(rec.started_at, first);
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut rec = record();
        rec.start(Utc::now()).unwrap();
        rec.enter_stage(2, "aggregation", "Aggregating", 0.4).unwrap();
        rec.enter_stage(1, "data_collection", "Collecting", 0.2).unwrap();
        assert_eq!(rec.progress, 0.4);
    }

    #[test]
    fn test_pending_job_can_be_cancelled() {
        let mut rec = record();
        rec.cancel("cancelled by client", Utc::now()).unwrap();
        assert_eq!(rec.status, JobStatus::Cancelled);
        assert!(rec.started_at.is_none());
        assert!(rec.completed_at.is_some());
    }

    #[test]
    fn test_record_serialize() {
        let rec = record();
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["id"], "agg_1_1");
        assert_eq!(json["kind"], "aggregation");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["progress"], 0.0);
        assert!(json["result"].is_null());
        assert!(json.get("seq").is_none());
    }

    #[test]
    fn test_id_generator_format_and_uniqueness() {
        let ids = IdGenerator::new();
        let (a, seq_a) = ids.next("agg");
        let (b, seq_b) = ids.next("agg");
        assert_ne!(a, b);
        assert!(seq_b > seq_a);

        let parts: Vec<&str> = a.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "agg");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2], seq_a.to_string());
    }
}
