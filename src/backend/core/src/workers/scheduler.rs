//! Scheduled job dispatcher: polls due scheduled jobs and turns each due
//! occurrence into exactly one dispatched job.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::jobs::dispatcher::next_occurrence;
use crate::jobs::{DispatchedJobDefinition, JobDispatcher};
use crate::server::ServerContext;
use crate::store::{LockAttempt, Store};

/// The per-server scheduler loop.
///
/// Each pass looks one second ahead, and for every scheduled job due by that
/// cutoff takes the per-scheduled-job dispatch lock. The lock is held across
/// the whole dispatch-and-update sequence; releasing earlier would let a
/// second scheduler dispatch the same occurrence the moment the handle drops.
/// Because a competing scheduler may have read the due list before we updated
/// the run dates, dueness is re-checked under the lock.
pub struct ScheduledJobDispatcherWorker {
    server: Arc<ServerContext>,
    dispatcher: JobDispatcher,
}

impl ScheduledJobDispatcherWorker {
    pub fn new(server: Arc<ServerContext>) -> Self {
        let dispatcher = JobDispatcher::new(server.queue.clone(), server.store.clone());
        Self { server, dispatcher }
    }

    /// Run the scheduler loop until shutdown.
    pub async fn run(self) {
        tracing::info!("scheduled job dispatcher started");

        loop {
            if self.server.shutdown.is_cancelled() {
                break;
            }

            if let Err(error) = self.dispatch_due_jobs().await {
                tracing::error!(%error, "scheduled job dispatch pass failed");
            }

            tokio::select! {
                _ = self.server.shutdown.cancelled() => {}
                _ = tokio::time::sleep(self.server.scheduler.interval) => {}
            }
        }

        tracing::info!("scheduled job dispatcher stopped");
    }

    /// One pass: dispatch every due scheduled job. Returns how many were
    /// dispatched by *this* pass (lock contention and lost races count as
    /// skips, not errors).
    pub(crate) async fn dispatch_due_jobs(&self) -> Result<usize> {
        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let due = self
            .server
            .store
            .reader()
            .scheduled_jobs_due_before(cutoff)
            .await?;

        let mut dispatched = 0;
        for scheduled in due {
            let lock = self
                .server
                .store
                .resource_locker()
                .try_lock(&scheduled.id, self.server.scheduler.lock_duration)
                .await?;

            match lock {
                LockAttempt::Contended => {
                    tracing::debug!(
                        scheduled_job_id = %scheduled.id,
                        "scheduled job locked by another dispatcher; skipping this pass"
                    );
                }
                LockAttempt::Acquired(guard) => {
                    let outcome = self.dispatch_if_still_due(&scheduled.id, cutoff).await;

                    if let Err(error) = guard.release().await {
                        tracing::warn!(%error, "failed to release scheduled job dispatch lock");
                    }

                    match outcome {
                        Ok(true) => dispatched += 1,
                        Ok(false) => {}
                        Err(error) => {
                            tracing::error!(
                                scheduled_job_id = %scheduled.id,
                                %error,
                                "failed to dispatch scheduled job"
                            );
                        }
                    }
                }
            }
        }

        Ok(dispatched)
    }

    async fn dispatch_if_still_due(&self, id: &str, cutoff: DateTime<Utc>) -> Result<bool> {
        // Re-read under the lock: a competitor may have dispatched this
        // occurrence between our due-list read and our lock acquisition.
        let Some(scheduled) = self.server.store.reader().scheduled_job(id).await? else {
            return Ok(false);
        };
        if !scheduled.next_run_at.is_some_and(|next| next <= cutoff) {
            return Ok(false);
        }

        let definition = DispatchedJobDefinition::for_scheduled(&scheduled);
        let job_id = self.dispatcher.dispatch_definition(definition).await?;

        let now = Utc::now();
        let next = next_occurrence(&scheduled.cron_expression, now)?;

        let mut tx = self.server.store.writer().begin_transaction().await?;
        tx.update_scheduled_job_next_run(&scheduled.id, next).await?;
        tx.update_scheduled_job_last_run(&scheduled.id, now).await?;
        tx.commit().await?;

        tracing::info!(
            scheduled_job_id = %scheduled.id,
            job_id = %job_id,
            next_run_at = %next,
            "scheduled job dispatched"
        );

        Ok(true)
    }
}
