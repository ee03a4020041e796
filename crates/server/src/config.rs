// crates/server/src/config.rs
//! Runtime configuration, read from flags with `BIZVERIFY_*` env fallbacks.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use bizverify_observability::LogFormat;
use bizverify_server_jobs::{RetentionPolicy, ValidationLimits};
use clap::Parser;

pub const DEFAULT_PORT: u16 = 47900;

#[derive(Debug, Clone, Parser)]
#[command(name = "bizverify", version, about = "Business verification job service")]
pub struct Config {
    /// Address to bind.
    #[arg(env = "BIZVERIFY_BIND", long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub bind: IpAddr,

    /// Port to listen on.
    #[arg(env = "BIZVERIFY_PORT", long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Jobs allowed to run at once. Creates beyond this are rejected with 429.
    #[arg(env = "BIZVERIFY_MAX_IN_FLIGHT", long, default_value_t = 64)]
    pub max_in_flight: usize,

    /// Simulated work per stage of the built-in executors.
    #[arg(env = "BIZVERIFY_STAGE_DELAY_MS", long, default_value_t = 500)]
    pub stage_delay_ms: u64,

    /// Age after which finished jobs are evicted. 0 keeps them forever.
    #[arg(env = "BIZVERIFY_RETENTION_SECS", long, default_value_t = 3600)]
    pub retention_secs: u64,

    /// Finished jobs kept before the oldest are evicted. 0 disables the cap.
    #[arg(env = "BIZVERIFY_MAX_RETAINED", long, default_value_t = 1000)]
    pub max_retained: usize,

    #[arg(env = "BIZVERIFY_RETENTION_SWEEP_SECS", long, default_value_t = 60)]
    pub retention_sweep_secs: u64,

    /// Largest accepted `data` payload, in serialized bytes.
    #[arg(env = "BIZVERIFY_MAX_PAYLOAD_BYTES", long, default_value_t = bizverify_server_jobs::request::DEFAULT_MAX_PAYLOAD_BYTES)]
    pub max_payload_bytes: usize,

    /// Deadline for the synchronous endpoints.
    #[arg(env = "BIZVERIFY_SYNC_TIMEOUT_SECS", long, default_value_t = 30)]
    pub sync_timeout_secs: u64,

    /// How long health check results are reused.
    #[arg(env = "BIZVERIFY_HEALTH_TTL_SECS", long, default_value_t = 30)]
    pub health_ttl_secs: u64,

    #[arg(env = "BIZVERIFY_LOG_FORMAT", long, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            max_in_flight: 64,
            stage_delay_ms: 500,
            retention_secs: 3600,
            max_retained: 1000,
            retention_sweep_secs: 60,
            max_payload_bytes: bizverify_server_jobs::request::DEFAULT_MAX_PAYLOAD_BYTES,
            sync_timeout_secs: 30,
            health_ttl_secs: 30,
            log_format: LogFormat::Compact,
        }
    }
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn stage_delay(&self) -> Duration {
        Duration::from_millis(self.stage_delay_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn health_ttl(&self) -> Duration {
        Duration::from_secs(self.health_ttl_secs)
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_secs.max(1))
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: (self.retention_secs > 0).then(|| Duration::from_secs(self.retention_secs)),
            max_terminal: (self.max_retained > 0).then_some(self.max_retained),
        }
    }

    pub fn validation_limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_payload_bytes: self.max_payload_bytes,
        }
    }
}
