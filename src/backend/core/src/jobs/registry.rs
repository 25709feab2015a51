//! Typed job registry.
//!
//! Jobs are registered under their stable [`Job::job_type`] identifier; each
//! registration erases the concrete type behind an invoke closure that
//! deserializes the parameters and calls the handler. This is the engine's
//! only activation path: a type identifier either resolves here or the
//! execution fails through the normal retry pipeline.

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

use super::context::JobContext;
use super::job::{Job, JobError, JobResult};
use super::retry::RetryConfiguration;

type InvokeFn = Arc<dyn Fn(Option<String>, JobContext) -> BoxFuture<'static, JobResult> + Send + Sync>;

pub(crate) struct JobRegistration {
    pub(crate) invoke: InvokeFn,
    retry_configuration: Option<RetryConfiguration>,
}

/// Registry of job types known to a server.
#[derive(Default)]
pub struct JobRegistry {
    registrations: HashMap<&'static str, JobRegistration>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job under its type identifier, using the server-wide
    /// default retry configuration.
    ///
    /// Registering the same type twice replaces the earlier registration.
    pub fn register<J: Job>(&mut self, job: J) -> &mut Self {
        self.insert(job, None);
        self
    }

    /// Register a job with its own retry configuration.
    pub fn register_with_retries<J: Job>(
        &mut self,
        job: J,
        retry_configuration: RetryConfiguration,
    ) -> &mut Self {
        self.insert(job, Some(retry_configuration));
        self
    }

    fn insert<J: Job>(&mut self, job: J, retry_configuration: Option<RetryConfiguration>) {
        let job = Arc::new(job);
        let invoke: InvokeFn = Arc::new(move |serialized_parameters, ctx| {
            let job = Arc::clone(&job);
            Box::pin(async move {
                let parameters =
                    deserialize_parameters::<J::Parameters>(serialized_parameters.as_deref())?;
                job.execute(parameters, &ctx).await
            })
        });

        self.registrations.insert(
            J::job_type(),
            JobRegistration {
                invoke,
                retry_configuration,
            },
        );
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.registrations.contains_key(job_type)
    }

    pub(crate) fn resolve(&self, job_type: &str) -> Option<&JobRegistration> {
        self.registrations.get(job_type)
    }

    /// Retry configuration override for a job type, if one was registered.
    pub fn retry_configuration_for(&self, job_type: &str) -> Option<&RetryConfiguration> {
        self.registrations
            .get(job_type)
            .and_then(|registration| registration.retry_configuration.as_ref())
    }
}

fn deserialize_parameters<P: DeserializeOwned>(raw: Option<&str>) -> Result<P, JobError> {
    serde_json::from_str(raw.unwrap_or("null")).map_err(|error| {
        JobError::new("failed to deserialize job parameters").with_detail(error.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    struct NoParamsJob;

    #[async_trait::async_trait]
    impl Job for NoParamsJob {
        type Parameters = ();

        fn job_type() -> &'static str {
            "no_params"
        }

        async fn execute(&self, _parameters: (), _ctx: &JobContext) -> JobResult {
            Ok(())
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct GreetParams {
        name: String,
    }

    struct GreetJob;

    #[async_trait::async_trait]
    impl Job for GreetJob {
        type Parameters = GreetParams;

        fn job_type() -> &'static str {
            "greet"
        }

        async fn execute(&self, parameters: GreetParams, _ctx: &JobContext) -> JobResult {
            if parameters.name.is_empty() {
                return Err(JobError::new("empty name"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_register_and_contains() {
        let mut registry = JobRegistry::new();
        registry.register(NoParamsJob).register(GreetJob);

        assert!(registry.contains("no_params"));
        assert!(registry.contains("greet"));
        assert!(!registry.contains("unheard_of"));
    }

    #[test]
    fn test_retry_configuration_override() {
        let mut registry = JobRegistry::new();
        registry.register(NoParamsJob);
        registry.register_with_retries(
            GreetJob,
            RetryConfiguration::uniform(5, Duration::from_secs(1)),
        );

        assert!(registry.retry_configuration_for("no_params").is_none());
        assert_eq!(
            registry.retry_configuration_for("greet").unwrap().retries(),
            5
        );
    }

    #[test]
    fn test_unit_parameters_deserialize_from_null() {
        deserialize_parameters::<()>(None).unwrap();
        deserialize_parameters::<()>(Some("null")).unwrap();
    }

    #[test]
    fn test_parameter_deserialization_failure_is_a_job_error() {
        let error = deserialize_parameters::<GreetParams>(Some("not json")).unwrap_err();
        assert!(error.message.contains("deserialize"));
    }
}
