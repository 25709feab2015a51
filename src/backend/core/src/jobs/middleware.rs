//! The job middleware pipeline.
//!
//! Built-in middlewares run first, in a fixed order — the status updater,
//! then the failure-retry middleware — followed by any user-registered
//! middlewares. The sequence is composed once per runner instance and never
//! mutated afterwards.
//!
//! A middleware's own failure is logged and the chain continues, unless that
//! middleware's [`continue_on_failure`](JobMiddleware::continue_on_failure)
//! opts out. The `job_failed` hook can additionally return
//! [`MiddlewareContinuation::Abort`] to skip the remaining middlewares for
//! that event only; the failure-retry middleware uses this when a job has
//! exhausted its retries.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use super::context::JobContext;
use super::job::{JobError, JobStatus};
use crate::error::Result;
use crate::queue::Queue;
use crate::store::LogLevel;

/// Whether the remaining middlewares for the current event should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareContinuation {
    Continue,
    Abort,
}

/// Hooks invoked around a job's lifecycle events.
#[async_trait]
pub trait JobMiddleware: Send + Sync {
    /// When false, a failure inside this middleware aborts the rest of the
    /// chain for that event instead of continuing past it.
    fn continue_on_failure(&self) -> bool {
        true
    }

    async fn job_started(&self, _ctx: &mut JobContext) -> Result<()> {
        Ok(())
    }

    async fn job_completed(&self, _ctx: &mut JobContext) -> Result<()> {
        Ok(())
    }

    async fn job_failed(
        &self,
        _ctx: &mut JobContext,
        _error: &JobError,
    ) -> Result<MiddlewareContinuation> {
        Ok(MiddlewareContinuation::Continue)
    }

    async fn job_failed_and_exceeded_retries(
        &self,
        _ctx: &mut JobContext,
        _error: &JobError,
    ) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Built-in: Status Updates
// ═══════════════════════════════════════════════════════════════════════════════

/// Advances the persisted status as the job moves through its lifecycle and
/// mirrors each event into the job log.
pub struct JobStatusUpdateMiddleware;

#[async_trait]
impl JobMiddleware for JobStatusUpdateMiddleware {
    async fn job_started(&self, ctx: &mut JobContext) -> Result<()> {
        let mut tx = ctx.begin_transaction().await?;
        tx.update_job_status(&ctx.job.id, JobStatus::InProgress, None)
            .await?;
        tx.commit().await?;

        ctx.job.status = JobStatus::InProgress;
        ctx.log(LogLevel::Information, "job processing started", None)
            .await;
        Ok(())
    }

    async fn job_completed(&self, ctx: &mut JobContext) -> Result<()> {
        let now = Utc::now();
        let mut tx = ctx.begin_transaction().await?;
        tx.update_job_status(&ctx.job.id, JobStatus::Complete, Some(now))
            .await?;
        tx.commit().await?;

        ctx.job.status = JobStatus::Complete;
        ctx.job.finished_at = Some(now);
        ctx.log(LogLevel::Information, "job completed", None).await;
        Ok(())
    }

    async fn job_failed(
        &self,
        ctx: &mut JobContext,
        error: &JobError,
    ) -> Result<MiddlewareContinuation> {
        // Status transitions on failure belong to the retry middleware; this
        // hook only records the failure.
        ctx.log(LogLevel::Error, "job execution failed", Some(error))
            .await;
        Ok(MiddlewareContinuation::Continue)
    }

    async fn job_failed_and_exceeded_retries(
        &self,
        ctx: &mut JobContext,
        error: &JobError,
    ) -> Result<()> {
        ctx.log(
            LogLevel::Error,
            "job failed and exceeded its maximum retries",
            Some(error),
        )
        .await;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Built-in: Failure Retry
// ═══════════════════════════════════════════════════════════════════════════════

/// Drives the retry state machine on failure.
///
/// With `r` retries used of `max` configured: at the limit, the job is marked
/// `FailedExceededMaximumRetries` and the failed chain aborts (the runner
/// then invokes the exceeded-retries chain). Below it, one committed store
/// transaction marks the job `Failed` and bumps the retry counter, and a
/// fresh envelope for the same job id is enqueued with the `r`-th configured
/// delay. `max` retries therefore means `max + 1` total execution attempts.
pub struct JobFailureRetryMiddleware;

#[async_trait]
impl JobMiddleware for JobFailureRetryMiddleware {
    async fn job_failed(
        &self,
        ctx: &mut JobContext,
        _error: &JobError,
    ) -> Result<MiddlewareContinuation> {
        let retries = ctx.job.retries;
        let maximum = ctx.retry_configuration().retries();

        if retries >= maximum {
            let now = Utc::now();
            let mut tx = ctx.begin_transaction().await?;
            tx.update_job_status(&ctx.job.id, JobStatus::FailedExceededMaximumRetries, Some(now))
                .await?;
            tx.commit().await?;

            ctx.job.status = JobStatus::FailedExceededMaximumRetries;
            ctx.job.finished_at = Some(now);
            return Ok(MiddlewareContinuation::Abort);
        }

        let delay = ctx.retry_configuration().delay_for_retry(retries);

        let mut tx = ctx.begin_transaction().await?;
        tx.update_job_status(&ctx.job.id, JobStatus::Failed, None)
            .await?;
        tx.update_job_retries(&ctx.job.id, retries + 1).await?;
        tx.commit().await?;

        ctx.job.status = JobStatus::Failed;
        ctx.job.retries = retries + 1;

        // Retries travel as a fresh envelope carrying the updated retry
        // count; the original message is deleted by the executor regardless.
        let envelope = serde_json::to_string(&ctx.job)?;
        ctx.server.queue.enqueue(envelope, Some(delay)).await?;

        tracing::debug!(
            job_id = %ctx.job.id,
            retry = ctx.job.retries,
            maximum,
            delay_ms = delay.as_millis() as u64,
            "job requeued for retry"
        );

        Ok(MiddlewareContinuation::Continue)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Runner
// ═══════════════════════════════════════════════════════════════════════════════

/// Executes the middleware chain for each lifecycle event: built-ins first,
/// then user-registered middlewares, as an ordered immutable sequence.
pub struct JobMiddlewareRunner {
    middlewares: Vec<Arc<dyn JobMiddleware>>,
}

impl JobMiddlewareRunner {
    pub fn new(user_middlewares: &[Arc<dyn JobMiddleware>]) -> Self {
        let mut middlewares: Vec<Arc<dyn JobMiddleware>> = vec![
            Arc::new(JobStatusUpdateMiddleware),
            Arc::new(JobFailureRetryMiddleware),
        ];
        middlewares.extend(user_middlewares.iter().cloned());
        Self { middlewares }
    }

    pub async fn job_started(&self, ctx: &mut JobContext) {
        for middleware in &self.middlewares {
            if let Err(error) = middleware.job_started(ctx).await {
                tracing::error!(job_id = %ctx.job.id, %error, "job started middleware failed");
                if !middleware.continue_on_failure() {
                    break;
                }
            }
        }
    }

    pub async fn job_completed(&self, ctx: &mut JobContext) {
        for middleware in &self.middlewares {
            if let Err(error) = middleware.job_completed(ctx).await {
                tracing::error!(job_id = %ctx.job.id, %error, "job completed middleware failed");
                if !middleware.continue_on_failure() {
                    break;
                }
            }
        }
    }

    pub async fn job_failed(&self, ctx: &mut JobContext, job_error: &JobError) {
        for middleware in &self.middlewares {
            match middleware.job_failed(ctx, job_error).await {
                Ok(MiddlewareContinuation::Continue) => {}
                Ok(MiddlewareContinuation::Abort) => break,
                Err(error) => {
                    tracing::error!(job_id = %ctx.job.id, %error, "job failed middleware failed");
                    if !middleware.continue_on_failure() {
                        break;
                    }
                }
            }
        }
    }

    pub async fn job_failed_and_exceeded_retries(&self, ctx: &mut JobContext, job_error: &JobError) {
        for middleware in &self.middlewares {
            if let Err(error) = middleware.job_failed_and_exceeded_retries(ctx, job_error).await {
                tracing::error!(
                    job_id = %ctx.job.id,
                    %error,
                    "exceeded retries middleware failed"
                );
                if !middleware.continue_on_failure() {
                    break;
                }
            }
        }
    }
}
