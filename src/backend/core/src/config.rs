//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

use crate::jobs::RetryConfiguration;
use crate::queue::QueueConfig;
use crate::telemetry::LoggingConfig;

/// Main engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Job processor worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Scheduled job dispatcher configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Server heartbeat configuration
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Server-wide default retry behavior
    #[serde(default)]
    pub retry: RetryDefaults,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent job processing loops per server
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long an idle loop waits before polling the queue again
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// TTL of the per-job execution lock held while a job runs.
    /// Must outlive the queue's visibility timeout so a slow delete never
    /// races a redelivered message.
    #[serde(with = "humantime_serde", default = "default_job_lock_duration")]
    pub job_lock_duration: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval: default_poll_interval(),
            job_lock_duration: default_job_lock_duration(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// How long the dispatcher sleeps between passes over due scheduled jobs
    #[serde(with = "humantime_serde", default = "default_scheduler_interval")]
    pub interval: Duration,

    /// TTL of the per-scheduled-job dispatch lock
    #[serde(with = "humantime_serde", default = "default_scheduler_lock_duration")]
    pub lock_duration: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: default_scheduler_interval(),
            lock_duration: default_scheduler_lock_duration(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between server heartbeat records
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: default_heartbeat_interval(),
        }
    }
}

/// Server-wide retry defaults, used for job types without a registered
/// [`RetryConfiguration`] override.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryDefaults {
    /// Number of retries after the first failed attempt
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay applied before every retry
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub delay: Duration,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            delay: default_retry_delay(),
        }
    }
}

impl RetryDefaults {
    /// Convert into the engine's retry configuration.
    pub fn to_configuration(&self) -> RetryConfiguration {
        RetryConfiguration::uniform(self.retries, self.delay)
    }
}

// Default value functions
fn default_database_url() -> String {
    "sqlite://quarry.db?mode=rwc".to_string()
}
fn default_max_connections() -> u32 {
    5
}
fn default_min_connections() -> u32 {
    1
}
fn default_workers() -> usize {
    4
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_job_lock_duration() -> Duration {
    Duration::from_secs(59)
}
fn default_scheduler_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_scheduler_lock_duration() -> Duration {
    Duration::from_secs(10)
}
fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_retries() -> u32 {
    3
}
fn default_retry_delay() -> Duration {
    Duration::from_secs(30)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("QUARRY").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("QUARRY").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
