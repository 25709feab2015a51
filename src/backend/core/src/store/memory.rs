//! In-memory store for development and testing.
//!
//! One coarse mutex guards every collection: correctness over throughput,
//! acceptable for its purpose. The transactional writer buffers mutations as
//! closures and applies them under a single lock acquisition on commit, so a
//! committed batch is visible to other workers as one unit.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{
    JobLogEntry, JobLogStore, LockAttempt, LockReleaser, LogLevel, ResourceLockGuard,
    ResourceLocker, ServerInstance, Store, StoreReader, StoreWriterTransactionManager,
    TransactionalStoreWriter, WorkerRegistration,
};
use crate::error::Result;
use crate::jobs::{DispatchedJobDefinition, JobError, JobStatus, ScheduledJobDefinition};

#[derive(Debug, Clone)]
struct LockRecord {
    resource: String,
    until: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct HeartbeatRecord {
    server_id: String,
}

#[derive(Default)]
struct MemoryState {
    servers: HashMap<String, ServerInstance>,
    heartbeats: Vec<HeartbeatRecord>,
    workers: HashMap<String, WorkerRegistration>,
    dispatched_jobs: HashMap<String, DispatchedJobDefinition>,
    scheduled_jobs: HashMap<String, ScheduledJobDefinition>,
    job_logs: Vec<JobLogEntry>,
    locks: Vec<LockRecord>,
}

/// In-memory [`Store`] implementation.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All dispatched job records, unordered. Inspection helper for the
    /// store's development/testing audience.
    pub fn dispatched_jobs(&self) -> Vec<DispatchedJobDefinition> {
        self.state.lock().dispatched_jobs.values().cloned().collect()
    }

    /// All scheduled job records, unordered.
    pub fn scheduled_jobs(&self) -> Vec<ScheduledJobDefinition> {
        self.state.lock().scheduled_jobs.values().cloned().collect()
    }

    /// Log entries recorded for a job, in write order.
    pub fn job_logs_for(&self, job_id: &str) -> Vec<JobLogEntry> {
        self.state
            .lock()
            .job_logs
            .iter()
            .filter(|entry| entry.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Number of heartbeats recorded for a server.
    pub fn heartbeat_count(&self, server_id: &str) -> usize {
        self.state
            .lock()
            .heartbeats
            .iter()
            .filter(|heartbeat| heartbeat.server_id == server_id)
            .count()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    fn reader(&self) -> Arc<dyn StoreReader> {
        Arc::new(MemoryStoreReader {
            state: Arc::clone(&self.state),
        })
    }

    fn writer(&self) -> Arc<dyn StoreWriterTransactionManager> {
        Arc::new(MemoryWriterTransactionManager {
            state: Arc::clone(&self.state),
        })
    }

    fn resource_locker(&self) -> Arc<dyn ResourceLocker> {
        Arc::new(MemoryResourceLocker {
            state: Arc::clone(&self.state),
        })
    }

    fn job_log_store(&self) -> Arc<dyn JobLogStore> {
        Arc::new(MemoryJobLogStore {
            state: Arc::clone(&self.state),
        })
    }

    async fn bootstrap(&self) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Reader
// ═══════════════════════════════════════════════════════════════════════════════

struct MemoryStoreReader {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait::async_trait]
impl StoreReader for MemoryStoreReader {
    async fn dispatched_job(&self, id: &str) -> Result<Option<DispatchedJobDefinition>> {
        Ok(self.state.lock().dispatched_jobs.get(id).cloned())
    }

    async fn scheduled_job(&self, id: &str) -> Result<Option<ScheduledJobDefinition>> {
        Ok(self.state.lock().scheduled_jobs.get(id).cloned())
    }

    async fn scheduled_jobs_due_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ScheduledJobDefinition>> {
        let state = self.state.lock();
        let mut due: Vec<ScheduledJobDefinition> = state
            .scheduled_jobs
            .values()
            .filter(|job| job.next_run_at.is_some_and(|next| next <= cutoff))
            .cloned()
            .collect();
        due.sort_by_key(|job| job.next_run_at);
        Ok(due)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Transactional Writer
// ═══════════════════════════════════════════════════════════════════════════════

struct MemoryWriterTransactionManager {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait::async_trait]
impl StoreWriterTransactionManager for MemoryWriterTransactionManager {
    async fn begin_transaction(&self) -> Result<Box<dyn TransactionalStoreWriter>> {
        Ok(Box::new(MemoryTransactionalStoreWriter {
            state: Arc::clone(&self.state),
            operations: Vec::new(),
        }))
    }
}

type Operation = Box<dyn FnOnce(&mut MemoryState) + Send>;

struct MemoryTransactionalStoreWriter {
    state: Arc<Mutex<MemoryState>>,
    operations: Vec<Operation>,
}

impl MemoryTransactionalStoreWriter {
    fn record(&mut self, operation: Operation) {
        self.operations.push(operation);
    }
}

#[async_trait::async_trait]
impl TransactionalStoreWriter for MemoryTransactionalStoreWriter {
    async fn create_server(&mut self, server: &ServerInstance) -> Result<()> {
        let server = server.clone();
        self.record(Box::new(move |state| {
            state.servers.insert(server.id.clone(), server);
        }));
        Ok(())
    }

    async fn create_server_heartbeat(&mut self, server_id: &str) -> Result<()> {
        let server_id = server_id.to_string();
        self.record(Box::new(move |state| {
            state.heartbeats.push(HeartbeatRecord { server_id });
        }));
        Ok(())
    }

    async fn create_worker(&mut self, worker: &WorkerRegistration) -> Result<()> {
        let worker = worker.clone();
        self.record(Box::new(move |state| {
            state.workers.insert(worker.id.clone(), worker);
        }));
        Ok(())
    }

    async fn create_dispatched_job(&mut self, job: &DispatchedJobDefinition) -> Result<()> {
        let job = job.clone();
        self.record(Box::new(move |state| {
            state.dispatched_jobs.insert(job.id.clone(), job);
        }));
        Ok(())
    }

    async fn create_or_update_scheduled_job(&mut self, job: &ScheduledJobDefinition) -> Result<()> {
        let job = job.clone();
        let now = Utc::now();
        self.record(Box::new(move |state| {
            match state.scheduled_jobs.get_mut(&job.id) {
                Some(existing) => {
                    existing.cron_expression = job.cron_expression;
                    existing.job_type = job.job_type;
                    existing.parameters_type = job.parameters_type;
                    existing.serialized_parameters = job.serialized_parameters;
                    existing.next_run_at = job.next_run_at;
                    existing.updated_at = now;
                }
                None => {
                    state.scheduled_jobs.insert(job.id.clone(), job);
                }
            }
        }));
        Ok(())
    }

    async fn delete_scheduled_job(&mut self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.record(Box::new(move |state| {
            state.scheduled_jobs.remove(&id);
        }));
        Ok(())
    }

    async fn update_job_status(
        &mut self,
        id: &str,
        status: JobStatus,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let id = id.to_string();
        let now = Utc::now();
        self.record(Box::new(move |state| {
            if let Some(job) = state.dispatched_jobs.get_mut(&id) {
                job.status = status;
                job.finished_at = finished_at;
                job.updated_at = now;
            }
        }));
        Ok(())
    }

    async fn update_job_retries(&mut self, id: &str, retries: u32) -> Result<()> {
        let id = id.to_string();
        let now = Utc::now();
        self.record(Box::new(move |state| {
            if let Some(job) = state.dispatched_jobs.get_mut(&id) {
                job.retries = retries;
                job.updated_at = now;
            }
        }));
        Ok(())
    }

    async fn update_scheduled_job_next_run(
        &mut self,
        id: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let id = id.to_string();
        let now = Utc::now();
        self.record(Box::new(move |state| {
            if let Some(job) = state.scheduled_jobs.get_mut(&id) {
                job.next_run_at = Some(next_run_at);
                job.updated_at = now;
            }
        }));
        Ok(())
    }

    async fn update_scheduled_job_last_run(
        &mut self,
        id: &str,
        last_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let id = id.to_string();
        let now = Utc::now();
        self.record(Box::new(move |state| {
            if let Some(job) = state.scheduled_jobs.get_mut(&id) {
                job.last_run_at = Some(last_run_at);
                job.updated_at = now;
            }
        }));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let operations = std::mem::take(&mut self.operations);
        let mut state = self.state.lock();
        for operation in operations {
            operation(&mut state);
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resource Locker
// ═══════════════════════════════════════════════════════════════════════════════

struct MemoryResourceLocker {
    state: Arc<Mutex<MemoryState>>,
}

struct MemoryLockReleaser {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLockReleaser {
    fn mark_released(&self, resource: &str) {
        let now = Utc::now();
        let mut state = self.state.lock();
        if let Some(record) = state
            .locks
            .iter_mut()
            .find(|record| record.resource == resource && record.released_at.is_none())
        {
            record.released_at = Some(now);
        }
    }
}

#[async_trait::async_trait]
impl LockReleaser for MemoryLockReleaser {
    async fn release(&self, resource: &str) -> Result<()> {
        self.mark_released(resource);
        Ok(())
    }

    fn release_on_drop(&self, resource: &str) {
        self.mark_released(resource);
    }
}

#[async_trait::async_trait]
impl ResourceLocker for MemoryResourceLocker {
    async fn try_lock(&self, resource: &str, ttl: Duration) -> Result<LockAttempt> {
        let now = Utc::now();
        let until = now + chrono::Duration::from_std(ttl).unwrap_or_default();

        let mut state = self.state.lock();
        let held = state
            .locks
            .iter()
            .any(|record| {
                record.resource == resource && record.released_at.is_none() && record.until > now
            });
        if held {
            return Ok(LockAttempt::Contended);
        }

        state.locks.push(LockRecord {
            resource: resource.to_string(),
            until,
            released_at: None,
        });

        Ok(LockAttempt::Acquired(ResourceLockGuard::new(
            resource.to_string(),
            until,
            Arc::new(MemoryLockReleaser {
                state: Arc::clone(&self.state),
            }),
        )))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Log Store
// ═══════════════════════════════════════════════════════════════════════════════

struct MemoryJobLogStore {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait::async_trait]
impl JobLogStore for MemoryJobLogStore {
    async fn log_entry_for_job(
        &self,
        job_id: &str,
        level: LogLevel,
        message: &str,
        error: Option<&JobError>,
    ) -> Result<()> {
        let entry = JobLogEntry {
            job_id: job_id.to_string(),
            level,
            message: message.to_string(),
            exception: error.map(|e| e.to_string()),
            created_at: Utc::now(),
        };
        self.state.lock().job_logs.push(entry);
        Ok(())
    }
}
