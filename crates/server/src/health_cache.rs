// crates/server/src/health_cache.rs
//! Memoized health checks.
//!
//! Probes hit `/api/health` often; the checks walk the whole registry, so the
//! last result is reused until it is older than the TTL.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use bizverify_server_jobs::{JobRunner, StatusCounts};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct RegistryCheck {
    pub status: String,
    #[serde(flatten)]
    pub counts: StatusCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunnerCheck {
    pub status: String,
    pub in_flight: usize,
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthChecks {
    pub registry: RegistryCheck,
    pub runner: RunnerCheck,
}

impl HealthChecks {
    /// Run every check against the live runner.
    pub fn collect(runner: &JobRunner) -> Self {
        let in_flight = runner.in_flight();
        let max_in_flight = runner.max_in_flight();
        Self {
            registry: RegistryCheck {
                status: "ok".to_string(),
                counts: runner.registry().counts(),
            },
            runner: RunnerCheck {
                status: if in_flight >= max_in_flight { "saturated" } else { "ok" }.to_string(),
                in_flight,
                max_in_flight,
            },
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.registry.status == "ok" && self.runner.status == "ok"
    }
}

struct Entry {
    checks: HealthChecks,
    taken_at: Instant,
}

pub struct HealthCache {
    ttl: Duration,
    last: Mutex<Option<Entry>>,
}

impl HealthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last: Mutex::new(None),
        }
    }

    /// The cached checks if still fresh, otherwise `refresh()`'s result.
    ///
    /// The flag is `true` when the value came from the cache.
    pub fn get_or_refresh(&self, refresh: impl FnOnce() -> HealthChecks) -> (HealthChecks, bool) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = last.as_ref() {
            if entry.taken_at.elapsed() < self.ttl {
                return (entry.checks.clone(), true);
            }
        }
        let checks = refresh();
        *last = Some(Entry {
            checks: checks.clone(),
            taken_at: Instant::now(),
        });
        (checks, false)
    }
}
