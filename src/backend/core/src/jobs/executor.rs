//! Job execution: activates a job and drives it through the middleware
//! pipeline.

use std::sync::Arc;

use super::context::JobContext;
use super::job::{JobError, JobStatus};
use super::middleware::JobMiddlewareRunner;
use crate::error::Result;
use crate::queue::Queue;
use crate::server::ServerContext;

/// Executes one delivery of a dispatched job.
///
/// Flow: run the "job started" chain, invoke the handler resolved from the
/// registry, then run "job completed" on success or "job failed" (and, once
/// retries are exhausted, "exceeded retries") on failure. The original queue
/// message is deleted whatever the outcome — retries are delivered as a new
/// enqueue, never by letting the original message reappear.
pub struct JobExecutor {
    runner: JobMiddlewareRunner,
}

impl JobExecutor {
    pub fn new(server: &ServerContext) -> Self {
        Self {
            runner: JobMiddlewareRunner::new(&server.middlewares),
        }
    }

    /// Execute the job carried by `ctx`.
    pub async fn execute(&self, mut ctx: JobContext) -> Result<()> {
        let message_id = ctx.message_id.clone();
        let queue = Arc::clone(&ctx.server.queue);

        self.run_pipeline(&mut ctx).await;

        // Always delete the original message, success or failure; a retry
        // has already been enqueued as a fresh envelope if one is due.
        queue.delete_message(&message_id).await
    }

    async fn run_pipeline(&self, ctx: &mut JobContext) {
        self.runner.job_started(ctx).await;

        let invocation = ctx
            .server
            .registry
            .resolve(&ctx.job.job_type)
            .map(|registration| Arc::clone(&registration.invoke));

        let result = match invocation {
            Some(invoke) => invoke(ctx.job.serialized_parameters.clone(), ctx.clone()).await,
            // An unregistered type flows through the failure pipeline like
            // any handler error, so the record cannot wedge in InProgress.
            None => Err(JobError::new(format!(
                "no job registered for type `{}`",
                ctx.job.job_type
            ))),
        };

        match result {
            Ok(()) => self.runner.job_completed(ctx).await,
            Err(error) => {
                self.runner.job_failed(ctx, &error).await;
                if ctx.job.status == JobStatus::FailedExceededMaximumRetries {
                    self.runner.job_failed_and_exceeded_retries(ctx, &error).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::dispatcher::JobDispatcher;
    use crate::jobs::job::{Job, JobResult};
    use crate::jobs::middleware::{JobMiddleware, MiddlewareContinuation};
    use crate::jobs::registry::JobRegistry;
    use crate::jobs::retry::RetryConfiguration;
    use crate::queue::{MemoryQueue, Queue};
    use crate::server::ServerContext;
    use crate::store::{MemoryStore, Store};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` executions, then succeeds.
    struct FlakyJob {
        failures: u32,
        invocations: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Job for FlakyJob {
        type Parameters = ();

        fn job_type() -> &'static str {
            "flaky"
        }

        async fn execute(&self, _parameters: (), _ctx: &JobContext) -> JobResult {
            let attempt = self.invocations.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                Err(JobError::new("transient failure"))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Serialize, Deserialize)]
    struct RecordedParams {
        value: String,
    }

    struct RecordingJob {
        seen: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Job for RecordingJob {
        type Parameters = RecordedParams;

        fn job_type() -> &'static str {
            "recording"
        }

        async fn execute(&self, parameters: RecordedParams, _ctx: &JobContext) -> JobResult {
            self.seen.lock().push(parameters.value);
            Ok(())
        }
    }

    fn server_context(registry: JobRegistry) -> (Arc<ServerContext>, MemoryStore) {
        let store = MemoryStore::new();
        let context = ServerContext::new(
            "test-host/test-key".to_string(),
            Arc::new(MemoryQueue::default()),
            Arc::new(store.clone()),
            Arc::new(registry),
        );
        (Arc::new(context), store)
    }

    /// Dequeue-and-execute until the queue runs dry, the way a processor
    /// loop would (retry delays in these tests are zero).
    async fn drain(server: &Arc<ServerContext>) {
        let executor = JobExecutor::new(server);
        while let Some(message) = server.queue.dequeue().await.unwrap() {
            let job = serde_json::from_str(&message.serialized_definition).unwrap();
            let ctx = JobContext {
                job,
                message_id: message.message_id.clone(),
                server: Arc::clone(server),
            };
            executor.execute(ctx).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_successful_job_ends_complete() {
        let mut registry = JobRegistry::new();
        registry.register(FlakyJob {
            failures: 0,
            invocations: Arc::new(AtomicU32::new(0)),
        });
        let (server, store) = server_context(registry);

        let dispatcher = JobDispatcher::new(server.queue.clone(), server.store.clone());
        let job_id = dispatcher.dispatch::<FlakyJob>(()).await.unwrap();

        drain(&server).await;

        let record = store.reader().dispatched_job(&job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Complete);
        assert_eq!(record.retries, 0);
        assert!(record.finished_at.is_some());
        assert!(server.queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_always_failing_job_runs_retries_plus_one_times() {
        let invocations = Arc::new(AtomicU32::new(0));
        let mut registry = JobRegistry::new();
        registry.register_with_retries(
            FlakyJob {
                failures: u32::MAX,
                invocations: Arc::clone(&invocations),
            },
            RetryConfiguration::new(2, vec![Duration::ZERO, Duration::ZERO]).unwrap(),
        );
        let (server, store) = server_context(registry);

        let dispatcher = JobDispatcher::new(server.queue.clone(), server.store.clone());
        let job_id = dispatcher.dispatch::<FlakyJob>(()).await.unwrap();

        drain(&server).await;

        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        let record = store.reader().dispatched_job(&job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::FailedExceededMaximumRetries);
        assert_eq!(record.retries, 2);
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_job_that_recovers_ends_complete_with_retry_count() {
        let invocations = Arc::new(AtomicU32::new(0));
        let mut registry = JobRegistry::new();
        registry.register_with_retries(
            FlakyJob {
                failures: 2,
                invocations: Arc::clone(&invocations),
            },
            RetryConfiguration::uniform(5, Duration::ZERO),
        );
        let (server, store) = server_context(registry);

        let dispatcher = JobDispatcher::new(server.queue.clone(), server.store.clone());
        let job_id = dispatcher.dispatch::<FlakyJob>(()).await.unwrap();

        drain(&server).await;

        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        let record = store.reader().dispatched_job(&job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Complete);
        assert_eq!(record.retries, 2);
    }

    #[tokio::test]
    async fn test_parameters_reach_the_handler() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut registry = JobRegistry::new();
        registry.register(RecordingJob {
            seen: Arc::clone(&seen),
        });
        let (server, _store) = server_context(registry);

        let dispatcher = JobDispatcher::new(server.queue.clone(), server.store.clone());
        dispatcher
            .dispatch::<RecordingJob>(RecordedParams {
                value: "hello".to_string(),
            })
            .await
            .unwrap();

        drain(&server).await;

        assert_eq!(seen.lock().as_slice(), ["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_unregistered_job_type_exhausts_retries() {
        let (server, store) = {
            let registry = JobRegistry::new();
            let store = MemoryStore::new();
            let mut context = ServerContext::new(
                "test-host/test-key".to_string(),
                Arc::new(MemoryQueue::default()),
                Arc::new(store.clone()),
                Arc::new(registry),
            );
            context.default_retry_configuration = RetryConfiguration::uniform(1, Duration::ZERO);
            (Arc::new(context), store)
        };

        let dispatcher = JobDispatcher::new(server.queue.clone(), server.store.clone());
        let definition =
            crate::jobs::DispatchedJobDefinition::new("never_registered", "()", None);
        let job_id = dispatcher.dispatch_definition(definition).await.unwrap();

        drain(&server).await;

        let record = store.reader().dispatched_job(&job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::FailedExceededMaximumRetries);
        assert_eq!(record.retries, 1);
    }

    #[tokio::test]
    async fn test_failure_writes_job_log_entries() {
        let mut registry = JobRegistry::new();
        registry.register_with_retries(
            FlakyJob {
                failures: u32::MAX,
                invocations: Arc::new(AtomicU32::new(0)),
            },
            RetryConfiguration::new(0, Vec::new()).unwrap(),
        );
        let (server, store) = server_context(registry);

        let dispatcher = JobDispatcher::new(server.queue.clone(), server.store.clone());
        let job_id = dispatcher.dispatch::<FlakyJob>(()).await.unwrap();

        drain(&server).await;

        let logs = store.job_logs_for(&job_id);
        assert!(logs
            .iter()
            .any(|entry| entry.message.contains("job execution failed")));
        assert!(logs
            .iter()
            .any(|entry| entry.message.contains("exceeded its maximum retries")));
    }

    // ── User middleware behavior ────────────────────────────────────────────

    #[derive(Default)]
    struct EventLog {
        started: AtomicU32,
        completed: AtomicU32,
        failed: AtomicU32,
        exceeded: AtomicU32,
    }

    struct ObservingMiddleware {
        events: Arc<EventLog>,
        abort_on_failure: bool,
    }

    #[async_trait::async_trait]
    impl JobMiddleware for ObservingMiddleware {
        async fn job_started(&self, _ctx: &mut JobContext) -> crate::error::Result<()> {
            self.events.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn job_completed(&self, _ctx: &mut JobContext) -> crate::error::Result<()> {
            self.events.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn job_failed(
            &self,
            _ctx: &mut JobContext,
            _error: &JobError,
        ) -> crate::error::Result<MiddlewareContinuation> {
            self.events.failed.fetch_add(1, Ordering::SeqCst);
            if self.abort_on_failure {
                Ok(MiddlewareContinuation::Abort)
            } else {
                Ok(MiddlewareContinuation::Continue)
            }
        }

        async fn job_failed_and_exceeded_retries(
            &self,
            _ctx: &mut JobContext,
            _error: &JobError,
        ) -> crate::error::Result<()> {
            self.events.exceeded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_user_middleware_sees_lifecycle_events() {
        let events = Arc::new(EventLog::default());
        let mut registry = JobRegistry::new();
        registry.register_with_retries(
            FlakyJob {
                failures: u32::MAX,
                invocations: Arc::new(AtomicU32::new(0)),
            },
            RetryConfiguration::uniform(1, Duration::ZERO),
        );

        let store = MemoryStore::new();
        let mut context = ServerContext::new(
            "test-host/test-key".to_string(),
            Arc::new(MemoryQueue::default()),
            Arc::new(store.clone()),
            Arc::new(registry),
        );
        context.middlewares = vec![Arc::new(ObservingMiddleware {
            events: Arc::clone(&events),
            abort_on_failure: false,
        })];
        let server = Arc::new(context);

        let dispatcher = JobDispatcher::new(server.queue.clone(), server.store.clone());
        dispatcher.dispatch::<FlakyJob>(()).await.unwrap();

        drain(&server).await;

        // Two attempts: both start, neither completes.
        assert_eq!(events.started.load(Ordering::SeqCst), 2);
        assert_eq!(events.completed.load(Ordering::SeqCst), 0);
        // The first failure continues into the user middleware; the second
        // aborts the chain inside the retry middleware before reaching it.
        assert_eq!(events.failed.load(Ordering::SeqCst), 1);
        assert_eq!(events.exceeded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abort_from_user_middleware_skips_later_middlewares() {
        let aborting = Arc::new(EventLog::default());
        let downstream = Arc::new(EventLog::default());

        let mut registry = JobRegistry::new();
        registry.register_with_retries(
            FlakyJob {
                failures: u32::MAX,
                invocations: Arc::new(AtomicU32::new(0)),
            },
            RetryConfiguration::uniform(1, Duration::ZERO),
        );

        let store = MemoryStore::new();
        let mut context = ServerContext::new(
            "test-host/test-key".to_string(),
            Arc::new(MemoryQueue::default()),
            Arc::new(store.clone()),
            Arc::new(registry),
        );
        context.middlewares = vec![
            Arc::new(ObservingMiddleware {
                events: Arc::clone(&aborting),
                abort_on_failure: true,
            }),
            Arc::new(ObservingMiddleware {
                events: Arc::clone(&downstream),
                abort_on_failure: false,
            }),
        ];
        let server = Arc::new(context);

        let dispatcher = JobDispatcher::new(server.queue.clone(), server.store.clone());
        dispatcher.dispatch::<FlakyJob>(()).await.unwrap();

        drain(&server).await;

        // Abort applies to the failed event only: the downstream middleware
        // misses job_failed but still sees started and exceeded-retries.
        assert_eq!(aborting.failed.load(Ordering::SeqCst), 1);
        assert_eq!(downstream.failed.load(Ordering::SeqCst), 0);
        assert_eq!(downstream.started.load(Ordering::SeqCst), 2);
        assert_eq!(downstream.exceeded.load(Ordering::SeqCst), 1);
    }
}
