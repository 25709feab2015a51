//! Execution context passed to jobs and middlewares.

use std::sync::Arc;

use super::job::{DispatchedJobDefinition, JobError};
use super::retry::RetryConfiguration;
use crate::error::Result;
use crate::server::ServerContext;
use crate::store::{LogLevel, Store, TransactionalStoreWriter};

/// Context for one execution attempt of a dispatched job.
///
/// Carries a snapshot of the job definition (middlewares keep it in step with
/// the committed record as they advance the state machine), the queue message
/// id of this delivery, and the shared server context.
#[derive(Clone)]
pub struct JobContext {
    /// The job being executed.
    pub job: DispatchedJobDefinition,
    /// Queue message id of this delivery; deleted when the attempt finishes.
    pub message_id: String,
    /// Shared server wiring: queue, store, registry, configuration.
    pub server: Arc<ServerContext>,
}

impl JobContext {
    /// The retry configuration for this job's type: the registered override,
    /// or the server-wide default.
    pub fn retry_configuration(&self) -> &RetryConfiguration {
        self.server
            .registry
            .retry_configuration_for(&self.job.job_type)
            .unwrap_or(&self.server.default_retry_configuration)
    }

    /// Begin a store transaction.
    pub async fn begin_transaction(&self) -> Result<Box<dyn TransactionalStoreWriter>> {
        self.server.store.writer().begin_transaction().await
    }

    /// Write a job log entry. Logging must never break job processing, so a
    /// failed write is demoted to a tracing warning and swallowed.
    pub async fn log(&self, level: LogLevel, message: &str, error: Option<&JobError>) {
        let written = self
            .server
            .store
            .job_log_store()
            .log_entry_for_job(&self.job.id, level, message, error)
            .await;

        if let Err(log_error) = written {
            tracing::warn!(
                job_id = %self.job.id,
                error = %log_error,
                "failed to write job log entry"
            );
        }
    }

    /// Log an informational message for this job.
    pub async fn log_info(&self, message: &str) {
        tracing::info!(
            job_id = %self.job.id,
            job_type = %self.job.job_type,
            retries = self.job.retries,
            message
        );
        self.log(LogLevel::Information, message, None).await;
    }

    /// Log an error for this job.
    pub async fn log_error(&self, message: &str, error: &JobError) {
        tracing::error!(
            job_id = %self.job.id,
            job_type = %self.job.job_type,
            retries = self.job.retries,
            error = %error,
            message
        );
        self.log(LogLevel::Error, message, Some(error)).await;
    }
}
