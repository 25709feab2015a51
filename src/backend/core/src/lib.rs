//! # Quarry Core
//!
//! A background job processing engine: clients dispatch units of work that
//! run immediately or on a cron-driven recurring schedule, and a pool of
//! worker loops executes them with at-least-once delivery, bounded retries,
//! and lock-based mutual exclusion so a given job never runs concurrently on
//! two workers.
//!
//! ## Architecture
//!
//! - **Queue**: opaque job envelopes with visibility-timeout checkout
//!   semantics (memory, SQLite, and no-op backends)
//! - **Store**: transactional writer, point-query reader, TTL resource
//!   locker, and per-job log store (memory and SQLite backends)
//! - **Jobs**: typed job registry, dispatcher, and the middleware pipeline
//!   driving the lifecycle state machine with bounded retries
//! - **Workers**: the processor, scheduled-job dispatcher, and heartbeat
//!   loops a [`Server`](server::Server) hosts
//! - **Telemetry**: structured logging infrastructure

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod queue;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod workers;

pub use error::{ErrorCode, QuarryError, Result};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, QuarryError, Result};
    pub use crate::jobs::{
        Job, JobContext, JobDispatcher, JobError, JobMiddleware, JobRegistry, JobResult,
        JobStatus, MiddlewareContinuation, RetryConfiguration,
    };
    pub use crate::queue::{MemoryQueue, NoopQueue, Queue, QueueConfig, SqliteQueue};
    pub use crate::server::{Server, ServerContext, ServerOptions};
    pub use crate::store::{
        JobLogStore, LockAttempt, LogLevel, MemoryStore, ResourceLocker, SqliteStore, Store,
        StoreReader, StoreWriterTransactionManager, TransactionalStoreWriter,
    };
}
