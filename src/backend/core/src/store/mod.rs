//! Persistence contracts: reader, transactional writer, resource locker, and
//! job log store.
//!
//! The store owns every persisted entity except queue messages. Writes go
//! through a transactional writer so multi-step state transitions (mark job
//! failed + bump retries, for example) become visible to other workers as one
//! unit; partial application would corrupt the state machine.
//!
//! Locks are the one place where "failure" is expected control flow:
//! [`ResourceLocker::try_lock`] returns [`LockAttempt::Contended`] instead of
//! an error so callers branch without exception-driven control flow.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::{DispatchedJobDefinition, JobError, JobStatus, ScheduledJobDefinition};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// ═══════════════════════════════════════════════════════════════════════════════
// Server / Worker Records
// ═══════════════════════════════════════════════════════════════════════════════

/// A running server process, registered at boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInstance {
    /// `{hostname}/{key}`
    pub id: String,
    pub hostname: String,
    pub key: String,
    pub created_at: DateTime<Utc>,
}

impl ServerInstance {
    /// Create the record for this process: hostname plus a fresh key, so two
    /// servers on one host stay distinguishable.
    pub fn generate() -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string());
        let key = Uuid::new_v4().to_string();
        Self {
            id: format!("{hostname}/{key}"),
            hostname,
            key,
            created_at: Utc::now(),
        }
    }
}

/// One concurrent processing loop, registered when the loop starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub id: String,
    pub server_instance_id: String,
    pub created_at: DateTime<Utc>,
}

impl WorkerRegistration {
    pub fn new(server_instance_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            server_instance_id: server_instance_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Logs
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Information,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Information => "information",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "debug" => Self::Debug,
            "warning" => Self::Warning,
            "error" => Self::Error,
            _ => Self::Information,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A log entry tied to a dispatched job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub job_id: String,
    pub level: LogLevel,
    pub message: String,
    pub exception: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-job log sink. Callers must treat writes as fire-and-forget: a failure
/// to record a log entry never fails job processing.
#[async_trait]
pub trait JobLogStore: Send + Sync {
    async fn log_entry_for_job(
        &self,
        job_id: &str,
        level: LogLevel,
        message: &str,
        error: Option<&JobError>,
    ) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resource Locker
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of a lock acquisition attempt. Contention is expected, recoverable
/// control flow, never an error.
pub enum LockAttempt {
    /// The lock was acquired; it is held until the guard is released, dropped,
    /// or the TTL lapses.
    Acquired(ResourceLockGuard),
    /// An unexpired, unreleased lock on the same resource already exists.
    Contended,
}

impl LockAttempt {
    pub fn is_contended(&self) -> bool {
        matches!(self, Self::Contended)
    }
}

impl fmt::Debug for LockAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acquired(guard) => f
                .debug_tuple("Acquired")
                .field(&guard.resource())
                .finish(),
            Self::Contended => write!(f, "Contended"),
        }
    }
}

/// Backend hook for releasing a lock; used by [`ResourceLockGuard`].
#[async_trait]
pub trait LockReleaser: Send + Sync {
    /// Mark the lock released.
    async fn release(&self, resource: &str) -> Result<()>;

    /// Best-effort release when a guard is dropped without an explicit
    /// `release` call. Backends that cannot release synchronously may leave
    /// the lock to expire by TTL.
    fn release_on_drop(&self, resource: &str);
}

/// Handle to an acquired resource lock.
///
/// [`release`](Self::release) is the primary path; dropping the guard
/// releases best-effort, and the TTL bounds the damage either way.
pub struct ResourceLockGuard {
    resource: String,
    until: DateTime<Utc>,
    released: bool,
    releaser: Arc<dyn LockReleaser>,
}

impl ResourceLockGuard {
    pub fn new(resource: String, until: DateTime<Utc>, releaser: Arc<dyn LockReleaser>) -> Self {
        Self {
            resource,
            until,
            released: false,
            releaser,
        }
    }

    /// The locked resource key.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// When the lock auto-expires regardless of release.
    pub fn until(&self) -> DateTime<Utc> {
        self.until
    }

    /// Release the lock early.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let releaser = Arc::clone(&self.releaser);
        let resource = self.resource.clone();
        releaser.release(&resource).await
    }
}

impl Drop for ResourceLockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.releaser.release_on_drop(&self.resource);
        }
    }
}

/// Named, TTL-based exclusive locks.
///
/// Used for the per-job execution lock (a worker holds it while running a
/// job, so a redelivered message cannot be double-processed) and the
/// per-scheduled-job dispatch lock (the scheduler holds it while dispatching
/// a due occurrence).
#[async_trait]
pub trait ResourceLocker: Send + Sync {
    /// Attempt to acquire an exclusive lock. Never blocks waiting for a
    /// holder: returns [`LockAttempt::Contended`] immediately.
    async fn try_lock(&self, resource: &str, ttl: Duration) -> Result<LockAttempt>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Reader
// ═══════════════════════════════════════════════════════════════════════════════

/// Point queries over persisted job records.
#[async_trait]
pub trait StoreReader: Send + Sync {
    /// Fetch a dispatched job. This is the surface through which callers
    /// observe status, retries, and finish time.
    async fn dispatched_job(&self, id: &str) -> Result<Option<DispatchedJobDefinition>>;

    /// Fetch a scheduled job by id.
    async fn scheduled_job(&self, id: &str) -> Result<Option<ScheduledJobDefinition>>;

    /// All scheduled jobs whose next run date is at or before the cutoff.
    async fn scheduled_jobs_due_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ScheduledJobDefinition>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Transactional Writer
// ═══════════════════════════════════════════════════════════════════════════════

/// Hands out transactional writers.
#[async_trait]
pub trait StoreWriterTransactionManager: Send + Sync {
    async fn begin_transaction(&self) -> Result<Box<dyn TransactionalStoreWriter>>;
}

/// Accumulates typed mutations and applies them atomically on commit.
///
/// Dropping a writer without committing discards everything it recorded.
#[async_trait]
pub trait TransactionalStoreWriter: Send {
    async fn create_server(&mut self, server: &ServerInstance) -> Result<()>;

    async fn create_server_heartbeat(&mut self, server_id: &str) -> Result<()>;

    async fn create_worker(&mut self, worker: &WorkerRegistration) -> Result<()>;

    async fn create_dispatched_job(&mut self, job: &DispatchedJobDefinition) -> Result<()>;

    /// Insert or update by the scheduled job's derived id; an existing
    /// record keeps its creation and last-run dates.
    async fn create_or_update_scheduled_job(&mut self, job: &ScheduledJobDefinition) -> Result<()>;

    async fn delete_scheduled_job(&mut self, id: &str) -> Result<()>;

    async fn update_job_status(
        &mut self,
        id: &str,
        status: JobStatus,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn update_job_retries(&mut self, id: &str, retries: u32) -> Result<()>;

    async fn update_scheduled_job_next_run(
        &mut self,
        id: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn update_scheduled_job_last_run(
        &mut self,
        id: &str,
        last_run_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Apply every recorded operation as one visible unit.
    async fn commit(self: Box<Self>) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store Bundle
// ═══════════════════════════════════════════════════════════════════════════════

/// The full persistence surface the engine consumes.
#[async_trait]
pub trait Store: Send + Sync {
    fn reader(&self) -> Arc<dyn StoreReader>;

    fn writer(&self) -> Arc<dyn StoreWriterTransactionManager>;

    fn resource_locker(&self) -> Arc<dyn ResourceLocker>;

    fn job_log_store(&self) -> Arc<dyn JobLogStore>;

    /// Prepare backing storage. Safe to call from every server at startup.
    async fn bootstrap(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_instance_id_combines_hostname_and_key() {
        let server = ServerInstance::generate();
        assert_eq!(server.id, format!("{}/{}", server.hostname, server.key));
    }

    #[test]
    fn test_log_level_round_trip() {
        for level in [
            LogLevel::Debug,
            LogLevel::Information,
            LogLevel::Warning,
            LogLevel::Error,
        ] {
            assert_eq!(LogLevel::parse(level.as_str()), level);
        }
        assert_eq!(LogLevel::parse("something-else"), LogLevel::Information);
    }
}
