//! Job processor: concurrent dequeue → lock → execute loops.

use std::sync::Arc;
use tokio::task::JoinSet;

use crate::error::Result;
use crate::jobs::{DispatchedJobDefinition, JobContext, JobExecutor};
use crate::queue::Queue;
use crate::server::ServerContext;
use crate::store::{LockAttempt, Store, WorkerRegistration};

/// Runs the configured number of independent job processing loops.
///
/// Each loop registers a worker record, then repeatedly checks the shutdown
/// signal, dequeues, acquires the per-job execution lock, and hands off to
/// the [`JobExecutor`]. Lock contention means another worker holds the job;
/// the message stays hidden and reappears after the visibility window, by
/// which time the holder has either deleted it or died.
pub struct JobProcessorWorker {
    server: Arc<ServerContext>,
}

impl JobProcessorWorker {
    pub fn new(server: Arc<ServerContext>) -> Self {
        Self { server }
    }

    /// Run all processing loops to completion (i.e. until shutdown).
    pub async fn run(self) {
        let mut loops = JoinSet::new();
        for index in 0..self.server.worker.workers {
            let server = Arc::clone(&self.server);
            loops.spawn(processing_loop(server, index));
        }
        while loops.join_next().await.is_some() {}
    }
}

async fn processing_loop(server: Arc<ServerContext>, index: usize) {
    let registration = WorkerRegistration::new(&server.server_instance_id);
    if let Err(error) = register_worker(&server, &registration).await {
        tracing::error!(
            worker_id = %registration.id,
            %error,
            "failed to register worker; processing loop not started"
        );
        return;
    }

    tracing::info!(worker_id = %registration.id, index, "job processor loop started");

    let executor = JobExecutor::new(&server);
    loop {
        if server.shutdown.is_cancelled() {
            break;
        }

        if let Err(error) = process_next(&server, &executor).await {
            tracing::error!(
                worker_id = %registration.id,
                %error,
                "job processor iteration failed"
            );
        }
    }

    tracing::info!(worker_id = %registration.id, "job processor loop stopped");
}

async fn register_worker(
    server: &Arc<ServerContext>,
    registration: &WorkerRegistration,
) -> Result<()> {
    let mut tx = server.store.writer().begin_transaction().await?;
    tx.create_worker(registration).await?;
    tx.commit().await
}

/// One loop iteration. Returns whether a message was processed.
pub(crate) async fn process_next(
    server: &Arc<ServerContext>,
    executor: &JobExecutor,
) -> Result<bool> {
    let Some(message) = server.queue.dequeue().await? else {
        // Idle: wait out the poll interval, or leave immediately on shutdown.
        tokio::select! {
            _ = server.shutdown.cancelled() => {}
            _ = tokio::time::sleep(server.worker.poll_interval) => {}
        }
        return Ok(false);
    };

    let job: DispatchedJobDefinition = match serde_json::from_str(&message.serialized_definition) {
        Ok(job) => job,
        Err(error) => {
            tracing::warn!(
                message_id = %message.message_id,
                %error,
                "discarding malformed job envelope"
            );
            server.queue.delete_message(&message.message_id).await?;
            return Ok(false);
        }
    };

    let lock = server
        .store
        .resource_locker()
        .try_lock(&job.id, server.worker.job_lock_duration)
        .await?;

    match lock {
        LockAttempt::Contended => {
            tracing::debug!(
                job_id = %job.id,
                "job locked by another worker; leaving message hidden"
            );
            Ok(false)
        }
        LockAttempt::Acquired(guard) => {
            let ctx = JobContext {
                job,
                message_id: message.message_id,
                server: Arc::clone(server),
            };
            let result = executor.execute(ctx).await;

            if let Err(error) = guard.release().await {
                tracing::warn!(%error, "failed to release job execution lock");
            }

            result.map(|()| true)
        }
    }
}
