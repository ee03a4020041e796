// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use bizverify_server_jobs::{BuiltinExecutor, Executors, JobRegistry, JobRunner, ValidationLimits};

use crate::config::Config;
use crate::health_cache::HealthCache;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub config: Config,
    /// Owns the job registry and the bounded pool that drives jobs.
    pub runner: Arc<JobRunner>,
    /// Last health check result, reused for `config.health_ttl()`.
    pub health: HealthCache,
}

impl AppState {
    /// State backed by the built-in executors.
    pub fn new(config: Config) -> Arc<Self> {
        let executors = Executors::uniform(Arc::new(BuiltinExecutor::new(config.stage_delay())));
        Self::with_executors(config, executors)
    }

    /// State with caller-supplied executors.
    pub fn with_executors(config: Config, executors: Executors) -> Arc<Self> {
        let runner = JobRunner::new(Arc::new(JobRegistry::new()), executors, config.max_in_flight);
        Arc::new(Self {
            start_time: Instant::now(),
            health: HealthCache::new(config.health_ttl()),
            runner: Arc::new(runner),
            config,
        })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        self.runner.registry()
    }

    pub fn limits(&self) -> ValidationLimits {
        self.config.validation_limits()
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_new() {
        let state = AppState::new(Config::default());
        assert!(state.uptime_secs() < 1);
        assert!(state.registry().is_empty());
        assert_eq!(state.runner.max_in_flight(), 64);
    }

    #[test]
    fn test_limits_follow_config() {
        let state = AppState::new(Config {
            max_payload_bytes: 42,
            ..Config::default()
        });
        assert_eq!(state.limits().max_payload_bytes, 42);
    }
}
