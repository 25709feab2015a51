//! The server runner: one process hosting the engine's loops.
//!
//! A server owns a single shutdown signal (a [`CancellationToken`]); every
//! loop checks it at iteration boundaries and exits cleanly when it fires.
//! That token is the only supported cancellation mechanism — it is
//! whole-server, never per-job.

use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, HeartbeatConfig, SchedulerConfig, WorkerConfig};
use crate::error::Result;
use crate::jobs::{JobDispatcher, JobMiddleware, JobRegistry, RetryConfiguration};
use crate::queue::Queue;
use crate::store::{ServerInstance, Store};
use crate::workers::{JobProcessorWorker, ScheduledJobDispatcherWorker, ServerHeartbeatWorker};

/// Shared wiring handed to every loop and job execution.
pub struct ServerContext {
    /// Id of this server's [`ServerInstance`] record.
    pub server_instance_id: String,
    pub queue: Arc<dyn Queue>,
    pub store: Arc<dyn Store>,
    pub registry: Arc<JobRegistry>,
    /// Fallback for job types without a registered retry override.
    pub default_retry_configuration: RetryConfiguration,
    /// User middlewares, appended after the built-ins in pipeline order.
    pub middlewares: Vec<Arc<dyn JobMiddleware>>,
    pub worker: WorkerConfig,
    pub scheduler: SchedulerConfig,
    pub heartbeat: HeartbeatConfig,
    /// The server's own shutdown signal.
    pub shutdown: CancellationToken,
}

impl ServerContext {
    /// Build a context with default configuration; adjust fields before
    /// sharing it.
    pub fn new(
        server_instance_id: String,
        queue: Arc<dyn Queue>,
        store: Arc<dyn Store>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            server_instance_id,
            queue,
            store,
            registry,
            default_retry_configuration: RetryConfiguration::default(),
            middlewares: Vec::new(),
            worker: WorkerConfig::default(),
            scheduler: SchedulerConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Everything needed to start a server.
pub struct ServerOptions {
    pub queue: Arc<dyn Queue>,
    pub store: Arc<dyn Store>,
    pub registry: JobRegistry,
    pub middlewares: Vec<Arc<dyn JobMiddleware>>,
    pub default_retry_configuration: RetryConfiguration,
    pub worker: WorkerConfig,
    pub scheduler: SchedulerConfig,
    pub heartbeat: HeartbeatConfig,
}

impl ServerOptions {
    pub fn new(queue: Arc<dyn Queue>, store: Arc<dyn Store>, registry: JobRegistry) -> Self {
        Self {
            queue,
            store,
            registry,
            middlewares: Vec::new(),
            default_retry_configuration: RetryConfiguration::default(),
            worker: WorkerConfig::default(),
            scheduler: SchedulerConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    /// Apply the worker/scheduler/heartbeat/retry sections of a loaded
    /// [`Config`].
    pub fn with_config(mut self, config: &Config) -> Self {
        self.worker = config.worker.clone();
        self.scheduler = config.scheduler.clone();
        self.heartbeat = config.heartbeat.clone();
        self.default_retry_configuration = config.retry.to_configuration();
        self
    }
}

/// A running server: one scheduler loop, one heartbeat loop, and N job
/// processor loops around shared context.
pub struct Server {
    context: Arc<ServerContext>,
    loops: JoinSet<()>,
}

impl Server {
    /// Bootstrap storage, register this server instance, and spawn all
    /// loops.
    pub async fn start(options: ServerOptions) -> Result<Self> {
        options.store.bootstrap().await?;
        options.queue.bootstrap().await?;

        let instance = ServerInstance::generate();
        let mut tx = options.store.writer().begin_transaction().await?;
        tx.create_server(&instance).await?;
        tx.commit().await?;

        let mut context = ServerContext::new(
            instance.id.clone(),
            options.queue,
            options.store,
            Arc::new(options.registry),
        );
        context.default_retry_configuration = options.default_retry_configuration;
        context.middlewares = options.middlewares;
        context.worker = options.worker;
        context.scheduler = options.scheduler;
        context.heartbeat = options.heartbeat;
        let context = Arc::new(context);

        let mut loops = JoinSet::new();
        loops.spawn(ServerHeartbeatWorker::new(Arc::clone(&context)).run());
        loops.spawn(ScheduledJobDispatcherWorker::new(Arc::clone(&context)).run());
        loops.spawn(JobProcessorWorker::new(Arc::clone(&context)).run());

        tracing::info!(
            server_id = %instance.id,
            workers = context.worker.workers,
            "server started"
        );

        Ok(Self { context, loops })
    }

    /// The shared server context.
    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.context)
    }

    /// A dispatcher wired to this server's queue and store.
    pub fn dispatcher(&self) -> JobDispatcher {
        JobDispatcher::new(self.context.queue.clone(), self.context.store.clone())
    }

    /// Signal every loop to exit at its next iteration boundary.
    pub fn shutdown(&self) {
        self.context.shutdown.cancel();
    }

    /// Wait for all loops to finish.
    pub async fn wait(mut self) {
        while self.loops.join_next().await.is_some() {}
        tracing::info!(server_id = %self.context.server_instance_id, "server stopped");
    }

    /// Shut down and wait.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{Job, JobContext, JobResult, JobStatus};
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct WaveJob {
        invocations: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Job for WaveJob {
        type Parameters = ();

        fn job_type() -> &'static str {
            "wave"
        }

        async fn execute(&self, _parameters: (), _ctx: &JobContext) -> JobResult {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_server_processes_dispatched_jobs_end_to_end() {
        let invocations = Arc::new(AtomicU32::new(0));
        let mut registry = JobRegistry::new();
        registry.register(WaveJob {
            invocations: Arc::clone(&invocations),
        });

        let store = MemoryStore::new();
        let mut options = ServerOptions::new(
            Arc::new(MemoryQueue::default()),
            Arc::new(store.clone()),
            registry,
        );
        options.worker.poll_interval = Duration::from_millis(10);
        options.heartbeat.interval = Duration::from_millis(50);
        options.scheduler.interval = Duration::from_millis(50);

        let server = Server::start(options).await.unwrap();
        let dispatcher = server.dispatcher();

        let job_id = dispatcher.dispatch::<WaveJob>(()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        server.stop().await;

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        let record = store.reader().dispatched_job(&job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_server_registers_instance_and_heartbeats() {
        let store = MemoryStore::new();
        let mut options = ServerOptions::new(
            Arc::new(MemoryQueue::default()),
            Arc::new(store.clone()),
            JobRegistry::new(),
        );
        options.worker.poll_interval = Duration::from_millis(10);
        options.heartbeat.interval = Duration::from_millis(20);

        let server = Server::start(options).await.unwrap();
        let server_id = server.context().server_instance_id.clone();

        tokio::time::sleep(Duration::from_millis(100)).await;
        server.stop().await;

        assert!(store.heartbeat_count(&server_id) >= 1);
    }

    #[tokio::test]
    async fn test_noop_queue_disables_processing() {
        let invocations = Arc::new(AtomicU32::new(0));
        let mut registry = JobRegistry::new();
        registry.register(WaveJob {
            invocations: Arc::clone(&invocations),
        });

        let store = MemoryStore::new();
        let mut options = ServerOptions::new(
            Arc::new(crate::queue::NoopQueue),
            Arc::new(store.clone()),
            registry,
        );
        options.worker.poll_interval = Duration::from_millis(10);

        let server = Server::start(options).await.unwrap();
        let dispatcher = server.dispatcher();
        let job_id = dispatcher.dispatch::<WaveJob>(()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        server.stop().await;

        // The record exists but nothing ever executes it.
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        let record = store.reader().dispatched_job(&job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Created);
    }
}
