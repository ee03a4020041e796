// crates/server-jobs/src/registry.rs
//! In-memory job registry.
//!
//! One `RwLock` guards the whole map. Readers clone records out under the
//! read lock; every mutation after insertion goes through [`JobRegistry::update`].
//! The lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::{IdGenerator, JobId, JobKind, JobRecord, JobStatus, NewJob};

/// Which records a `list` call returns. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub kind: Option<JobKind>,
    pub status: Option<JobStatus>,
    pub business_id: Option<String>,
}

impl JobFilter {
    fn matches(&self, rec: &JobRecord) -> bool {
        self.kind.map_or(true, |k| rec.kind == k)
            && self.status.map_or(true, |s| rec.status == s)
            && self
                .business_id
                .as_deref()
                .map_or(true, |b| rec.business_id == b)
    }
}

/// Offset/limit window applied after filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

/// One page of a filtered listing. `total` counts every match, not just
/// the ones in `jobs`.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<JobRecord>,
    pub total: usize,
}

/// Per-status totals across the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed + self.cancelled
    }

    pub fn in_flight(&self) -> usize {
        self.pending + self.processing
    }
}

/// How long terminal records are kept. `None` disables that bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Option<Duration>,
    pub max_terminal: Option<usize>,
}

impl RetentionPolicy {
    /// Keep every record for the life of the process.
    pub const KEEP_ALL: RetentionPolicy = RetentionPolicy {
        max_age: None,
        max_terminal: None,
    };
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Some(Duration::from_secs(3600)),
            max_terminal: Some(1000),
        }
    }
}

/// Thread-safe storage of [`JobRecord`]s keyed by id.
pub struct JobRegistry {
    ids: IdGenerator,
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            ids: IdGenerator::new(),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.read().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned reading jobs map: {e}");
            PoisonError::into_inner(e)
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.write().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned writing jobs map: {e}");
            PoisonError::into_inner(e)
        })
    }

    /// Insert a new pending job and return its id.
    pub fn create(&self, job: NewJob) -> JobId {
        self.insert(job).id
    }

    /// Like [`JobRegistry::create`], returning a copy of the inserted record.
    pub fn insert(&self, job: NewJob) -> JobRecord {
        let (id, seq) = self.ids.next(job.kind.id_prefix());
        let record = JobRecord::new(id.clone(), seq, job, Utc::now());
        self.write().insert(id, record.clone());
        record
    }

    /// Copy of the record, if present.
    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.read().get(id).cloned()
    }

    /// Snapshot of matching records in creation order.
    pub fn list(&self, filter: &JobFilter, page: Page) -> JobPage {
        let mut matched: Vec<JobRecord> = self
            .read()
            .values()
            .filter(|rec| filter.matches(rec))
            .cloned()
            .collect();
        matched.sort_by_key(|rec| rec.seq);

        let total = matched.len();
        let jobs = matched
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        JobPage { jobs, total }
    }

    /// Apply `f` to the stored record under the write lock.
    ///
    /// Returns `None` if the id is unknown.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut JobRecord) -> R) -> Option<R> {
        self.write().get_mut(id).map(f)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for rec in self.read().values() {
            match rec.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop terminal records outside `policy`. Returns how many were removed.
    pub fn evict(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> usize {
        let mut jobs = self.write();
        let before = jobs.len();

        if let Some(max_age) = policy.max_age {
            let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
            jobs.retain(|_, rec| {
                !rec.status.is_terminal()
                    || rec.completed_at.map_or(true, |done| now - done <= max_age)
            });
        }

        if let Some(max_terminal) = policy.max_terminal {
            let mut terminal: Vec<(u64, JobId)> = jobs
                .values()
                .filter(|rec| rec.status.is_terminal())
                .map(|rec| (rec.seq, rec.id.clone()))
                .collect();
            if terminal.len() > max_terminal {
                terminal.sort_unstable();
                let excess = terminal.len() - max_terminal;
                for (_, id) in terminal.into_iter().take(excess) {
                    jobs.remove(&id);
                }
            }
        }

        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = jobs.len(), "Evicted terminal jobs");
        }
        removed
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
