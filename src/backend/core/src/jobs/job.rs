//! Job definitions and the core job abstraction.
//!
//! - **Job trait**: the capability interface every background job implements
//! - **JobStatus**: the lifecycle state machine
//! - **DispatchedJobDefinition / ScheduledJobDefinition**: persisted records
//! - **JobError**: handler failure value driving the retry state machine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::context::JobContext;
use crate::error::Result;

/// Prefix of every derived scheduled-job id.
pub const SCHEDULED_JOB_ID_PREFIX: &str = "scheduled-job:";

/// Derive the stable id of a scheduled job from its name.
///
/// Deterministic, so repeated create-or-update calls for the same name target
/// the same record.
pub fn scheduled_job_id(name: &str) -> String {
    format!(
        "{SCHEDULED_JOB_ID_PREFIX}{}",
        name.trim().to_lowercase().replace(' ', "-")
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of a dispatched job.
///
/// Transitions only move forward:
/// `Created → InProgress → {Complete | Failed → (requeued) → InProgress |
/// FailedExceededMaximumRetries}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Record written, envelope possibly not yet picked up
    Created,
    /// A worker is executing the job
    InProgress,
    /// Terminal: the handler succeeded
    Complete,
    /// The handler failed; a retry envelope has been enqueued
    Failed,
    /// Terminal: the handler failed with no retries left
    FailedExceededMaximumRetries,
    /// Persisted value not recognized by this version.
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Created => "created",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::FailedExceededMaximumRetries => "failed_exceeded_maximum_retries",
        }
    }

    /// Parse a persisted value, mapping anything unrecognized to `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value {
            "created" => Self::Created,
            "in_progress" => Self::InProgress,
            "complete" => Self::Complete,
            "failed" => Self::Failed,
            "failed_exceeded_maximum_retries" => Self::FailedExceededMaximumRetries,
            _ => Self::Unknown,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::FailedExceededMaximumRetries)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// A job handler failure.
///
/// Captured per execution and recorded in the job log; drives the retry
/// state machine. Never crashes a worker loop and never reaches the
/// dispatching client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// What went wrong.
    pub message: String,
    /// Lower-level detail (source error text), if any.
    pub detail: Option<String>,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    /// Attach lower-level detail.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Wrap an arbitrary error value.
    pub fn from_error(message: impl Into<String>, error: &dyn fmt::Display) -> Self {
        Self::new(message).with_detail(error.to_string())
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

/// Result type for job handlers.
pub type JobResult = std::result::Result<(), JobError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Dispatched Job Definition
// ═══════════════════════════════════════════════════════════════════════════════

/// One dispatched execution attempt chain.
///
/// The id is stable across retries; every retry is a fresh queue envelope
/// carrying this same record with an incremented retry count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedJobDefinition {
    pub id: String,
    pub job_type: String,
    pub parameters_type: String,
    pub serialized_parameters: Option<String>,
    pub retries: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DispatchedJobDefinition {
    pub fn new(
        job_type: impl Into<String>,
        parameters_type: impl Into<String>,
        serialized_parameters: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            parameters_type: parameters_type.into(),
            serialized_parameters,
            retries: 0,
            status: JobStatus::Created,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Build a definition for a typed job with the given parameters.
    pub fn for_job<J: Job>(parameters: &J::Parameters) -> Result<Self> {
        let serialized = serde_json::to_string(parameters)?;
        Ok(Self::new(
            J::job_type(),
            std::any::type_name::<J::Parameters>(),
            Some(serialized),
        ))
    }

    /// Derive a one-off execution from a scheduled job's type and parameters.
    pub fn for_scheduled(scheduled: &ScheduledJobDefinition) -> Self {
        Self::new(
            scheduled.job_type.clone(),
            scheduled.parameters_type.clone(),
            scheduled.serialized_parameters.clone(),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scheduled Job Definition
// ═══════════════════════════════════════════════════════════════════════════════

/// A recurring job driven by a cron expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJobDefinition {
    /// Derived from `name`; see [`scheduled_job_id`].
    pub id: String,
    pub name: String,
    pub cron_expression: String,
    pub job_type: String,
    pub parameters_type: String,
    pub serialized_parameters: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJobDefinition {
    pub fn new(
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        job_type: impl Into<String>,
        parameters_type: impl Into<String>,
        serialized_parameters: Option<String>,
    ) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: scheduled_job_id(&name),
            name,
            cron_expression: cron_expression.into(),
            job_type: job_type.into(),
            parameters_type: parameters_type.into(),
            serialized_parameters,
            next_run_at: None,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a definition for a typed job with the given parameters.
    pub fn for_job<J: Job>(
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        parameters: &J::Parameters,
    ) -> Result<Self> {
        let serialized = serde_json::to_string(parameters)?;
        Ok(Self::new(
            name,
            cron_expression,
            J::job_type(),
            std::any::type_name::<J::Parameters>(),
            Some(serialized),
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// The capability interface all background jobs implement.
///
/// Jobs are resolved through the [`JobRegistry`](super::JobRegistry) by their
/// stable [`job_type`](Self::job_type) identifier; parameters travel as JSON
/// and are deserialized before the handler runs. Jobs without parameters use
/// `Parameters = ()`.
///
/// # Errors
///
/// Return a [`JobError`] when the job fails; the failure middleware decides
/// whether a retry envelope is enqueued or the job is marked as having
/// exceeded its retries.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Parameter payload deserialized from the dispatched definition.
    type Parameters: Serialize + DeserializeOwned + Send + Sync;

    /// Stable identifier used for registration, dispatch, and persistence.
    fn job_type() -> &'static str
    where
        Self: Sized;

    /// Execute the job.
    async fn execute(&self, parameters: Self::Parameters, ctx: &JobContext) -> JobResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduled_job_id_derivation() {
        assert_eq!(
            scheduled_job_id("Nightly Usage Report"),
            "scheduled-job:nightly-usage-report"
        );
        // Repeated derivation targets the same record.
        assert_eq!(
            scheduled_job_id("nightly usage report"),
            scheduled_job_id("Nightly Usage Report")
        );
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Created,
            JobStatus::InProgress,
            JobStatus::Complete,
            JobStatus::Failed,
            JobStatus::FailedExceededMaximumRetries,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), status);
        }
        assert_eq!(JobStatus::parse("sideways"), JobStatus::Unknown);
    }

    #[test]
    fn test_status_terminality() {
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::FailedExceededMaximumRetries.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_definition_envelope_round_trip() {
        let definition = DispatchedJobDefinition::new("send_email", "EmailParams", Some("{}".into()));
        let envelope = serde_json::to_string(&definition).unwrap();
        let decoded: DispatchedJobDefinition = serde_json::from_str(&envelope).unwrap();
        assert_eq!(decoded, definition);
        assert_eq!(decoded.status, JobStatus::Created);
    }

    #[test]
    fn test_unknown_status_deserializes_from_future_value() {
        let json = r#"{
            "id": "j-1", "job_type": "t", "parameters_type": "()",
            "serialized_parameters": null, "retries": 0,
            "status": "paused_for_inspection",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z",
            "finished_at": null
        }"#;
        let decoded: DispatchedJobDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(decoded.status, JobStatus::Unknown);
    }

    #[test]
    fn test_job_error_display_includes_detail() {
        let error = JobError::new("smtp send failed").with_detail("connection refused");
        assert_eq!(error.to_string(), "smtp send failed: connection refused");
    }
}
