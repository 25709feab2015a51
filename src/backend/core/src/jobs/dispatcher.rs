//! Job dispatch: writing a job record and enqueueing its envelope as one
//! logical unit, plus the scheduled-job create/update/delete surface.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;

use super::job::{DispatchedJobDefinition, Job, ScheduledJobDefinition};
use crate::error::{ErrorCode, QuarryError, Result};
use crate::queue::Queue;
use crate::store::Store;

/// Dispatches jobs for immediate or scheduled execution.
///
/// No error from a dispatched job's execution ever propagates back here:
/// once `dispatch` returns, outcomes are observed through the job's
/// status/retries/finished_at fields and the job log store.
#[derive(Clone)]
pub struct JobDispatcher {
    queue: Arc<dyn Queue>,
    store: Arc<dyn Store>,
}

impl JobDispatcher {
    pub fn new(queue: Arc<dyn Queue>, store: Arc<dyn Store>) -> Self {
        Self { queue, store }
    }

    /// Dispatch a job for immediate execution, returning its id.
    pub async fn dispatch<J: Job>(&self, parameters: J::Parameters) -> Result<String> {
        let definition = DispatchedJobDefinition::for_job::<J>(&parameters)?;
        self.dispatch_definition(definition).await
    }

    /// Dispatch a pre-built definition (used by the scheduled job
    /// dispatcher).
    ///
    /// The `Created` record is committed before the envelope is enqueued, so
    /// a worker can never pick up a job whose record does not exist yet.
    pub async fn dispatch_definition(&self, definition: DispatchedJobDefinition) -> Result<String> {
        let mut tx = self.store.writer().begin_transaction().await?;
        tx.create_dispatched_job(&definition).await?;
        tx.commit().await?;

        let envelope = serde_json::to_string(&definition)?;
        self.queue.enqueue(envelope, None).await?;

        tracing::debug!(
            job_id = %definition.id,
            job_type = %definition.job_type,
            "job dispatched"
        );

        Ok(definition.id)
    }

    /// Create or update a recurring job, returning its derived id.
    ///
    /// The id is deterministic from the name, so calling this again with the
    /// same name updates the existing record. The cron expression is
    /// validated fail-fast; the first run is the next occurrence after now.
    pub async fn create_or_update_scheduled_job<J: Job>(
        &self,
        name: &str,
        cron_expression: &str,
        parameters: J::Parameters,
    ) -> Result<String> {
        let schedule = parse_cron_expression(cron_expression)?;

        let mut definition =
            ScheduledJobDefinition::for_job::<J>(name, cron_expression, &parameters)?;
        definition.next_run_at = schedule.after(&Utc::now()).next();

        let mut tx = self.store.writer().begin_transaction().await?;
        tx.create_or_update_scheduled_job(&definition).await?;
        tx.commit().await?;

        tracing::debug!(
            scheduled_job_id = %definition.id,
            cron = cron_expression,
            next_run_at = ?definition.next_run_at,
            "scheduled job created or updated"
        );

        Ok(definition.id)
    }

    /// Delete a recurring job by name.
    pub async fn delete_scheduled_job(&self, name: &str) -> Result<()> {
        let id = super::job::scheduled_job_id(name);
        let mut tx = self.store.writer().begin_transaction().await?;
        tx.delete_scheduled_job(&id).await?;
        tx.commit().await?;

        tracing::debug!(scheduled_job_id = %id, "scheduled job deleted");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cron Evaluation
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse a cron expression, accepting both classic five-field expressions
/// (minute-first) and six/seven-field expressions (seconds-first).
pub(crate) fn parse_cron_expression(expression: &str) -> Result<Schedule> {
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };

    Schedule::from_str(&normalized).map_err(|error| {
        QuarryError::with_internal(
            ErrorCode::InvalidCronExpression,
            "invalid cron expression",
            format!("{expression:?}: {error}"),
        )
    })
}

/// The next occurrence of a cron expression strictly after the given instant.
pub(crate) fn next_occurrence(
    expression: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    parse_cron_expression(expression)?
        .after(&after)
        .next()
        .ok_or_else(|| {
            QuarryError::with_internal(
                ErrorCode::InvalidCronExpression,
                "cron expression has no upcoming occurrence",
                expression.to_string(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::context::JobContext;
    use crate::jobs::job::{JobResult, JobStatus};
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;

    struct PingJob;

    #[async_trait::async_trait]
    impl Job for PingJob {
        type Parameters = ();

        fn job_type() -> &'static str {
            "ping"
        }

        async fn execute(&self, _parameters: (), _ctx: &JobContext) -> JobResult {
            Ok(())
        }
    }

    fn dispatcher_with_memory_backends() -> (JobDispatcher, Arc<MemoryQueue>, MemoryStore) {
        let queue = Arc::new(MemoryQueue::default());
        let store = MemoryStore::new();
        let dispatcher = JobDispatcher::new(queue.clone(), Arc::new(store.clone()));
        (dispatcher, queue, store)
    }

    #[tokio::test]
    async fn test_dispatch_writes_created_record_then_enqueues() {
        let (dispatcher, queue, store) = dispatcher_with_memory_backends();

        let job_id = dispatcher.dispatch::<PingJob>(()).await.unwrap();

        let record = store
            .reader()
            .dispatched_job(&job_id)
            .await
            .unwrap()
            .expect("record must exist");
        assert_eq!(record.status, JobStatus::Created);
        assert_eq!(record.retries, 0);

        let message = queue.dequeue().await.unwrap().expect("envelope must exist");
        let decoded: DispatchedJobDefinition =
            serde_json::from_str(&message.serialized_definition).unwrap();
        assert_eq!(decoded.id, job_id);
    }

    #[tokio::test]
    async fn test_dispatched_job_ids_are_unique() {
        let (dispatcher, _queue, _store) = dispatcher_with_memory_backends();

        let first = dispatcher.dispatch::<PingJob>(()).await.unwrap();
        let second = dispatcher.dispatch::<PingJob>(()).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_create_or_update_scheduled_job_validates_cron() {
        let (dispatcher, _queue, _store) = dispatcher_with_memory_backends();

        let result = dispatcher
            .create_or_update_scheduled_job::<PingJob>("broken", "not a cron", ())
            .await;
        assert_eq!(
            result.unwrap_err().code(),
            ErrorCode::InvalidCronExpression
        );
    }

    #[tokio::test]
    async fn test_create_or_update_scheduled_job_sets_next_run() {
        let (dispatcher, _queue, store) = dispatcher_with_memory_backends();

        let id = dispatcher
            .create_or_update_scheduled_job::<PingJob>("Hourly Ping", "0 * * * *", ())
            .await
            .unwrap();
        assert_eq!(id, "scheduled-job:hourly-ping");

        let stored = store.reader().scheduled_job(&id).await.unwrap().unwrap();
        let next = stored.next_run_at.expect("next run must be set");
        assert!(next > Utc::now());
        assert_eq!(next.timestamp() % 3600, 0);
    }

    #[tokio::test]
    async fn test_delete_scheduled_job() {
        let (dispatcher, _queue, store) = dispatcher_with_memory_backends();

        let id = dispatcher
            .create_or_update_scheduled_job::<PingJob>("to delete", "0 * * * *", ())
            .await
            .unwrap();
        dispatcher.delete_scheduled_job("to delete").await.unwrap();

        assert!(store.reader().scheduled_job(&id).await.unwrap().is_none());
    }

    #[test]
    fn test_five_field_expressions_are_accepted() {
        parse_cron_expression("0 * * * *").unwrap();
        parse_cron_expression("*/5 * * * *").unwrap();
        parse_cron_expression("0 0 * * * *").unwrap();
        assert!(parse_cron_expression("every tuesday").is_err());
    }

    #[test]
    fn test_next_occurrence_is_strictly_after() {
        let after = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = next_occurrence("0 * * * *", after).unwrap();
        assert_eq!(
            next,
            DateTime::parse_from_rfc3339("2026-03-01T11:00:00Z")
                .unwrap()
                .with_timezone(&Utc)
        );
    }
}
