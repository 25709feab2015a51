//! The job model and execution pipeline.
//!
//! This module provides the heart of the engine:
//!
//! - **Job trait + registry**: typed job definitions resolved by a stable
//!   type identifier
//! - **JobDispatcher**: writes the job record and enqueues its envelope
//! - **JobExecutor + middleware pipeline**: drives the lifecycle state
//!   machine (started → completed/failed → retry/exceeded)
//! - **RetryConfiguration**: bounded retries with one delay per retry
//!
//! # Usage
//!
//! ```rust,ignore
//! use quarry_core::jobs::{Job, JobContext, JobResult, JobRegistry};
//!
//! #[derive(Serialize, Deserialize)]
//! struct EmailParams {
//!     to: String,
//! }
//!
//! struct SendEmailJob;
//!
//! #[async_trait]
//! impl Job for SendEmailJob {
//!     type Parameters = EmailParams;
//!
//!     fn job_type() -> &'static str {
//!         "send_email"
//!     }
//!
//!     async fn execute(&self, parameters: EmailParams, ctx: &JobContext) -> JobResult {
//!         ctx.log_info(&format!("sending email to {}", parameters.to)).await;
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = JobRegistry::new();
//! registry.register(SendEmailJob);
//! ```

pub mod context;
pub mod dispatcher;
pub mod executor;
pub mod job;
pub mod middleware;
pub mod registry;
pub mod retry;

pub use context::JobContext;
pub use dispatcher::JobDispatcher;
pub use executor::JobExecutor;
pub use job::{
    scheduled_job_id, DispatchedJobDefinition, Job, JobError, JobResult, JobStatus,
    ScheduledJobDefinition, SCHEDULED_JOB_ID_PREFIX,
};
pub use middleware::{
    JobFailureRetryMiddleware, JobMiddleware, JobMiddlewareRunner, JobStatusUpdateMiddleware,
    MiddlewareContinuation,
};
pub use registry::JobRegistry;
pub use retry::RetryConfiguration;
