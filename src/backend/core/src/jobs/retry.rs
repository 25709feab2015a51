//! Retry configuration: a retry count paired with one delay per retry.

use std::time::Duration;

use crate::error::{ErrorCode, QuarryError, Result};

/// Governs backoff between failed attempts of a job type.
///
/// `retries` retries means `retries + 1` total execution attempts. The `r`-th
/// retry (0-indexed) is enqueued with a visibility delay of `delays[r]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfiguration {
    retries: u32,
    delays: Vec<Duration>,
}

impl RetryConfiguration {
    /// Create a configuration with one explicit delay per retry.
    ///
    /// # Errors
    ///
    /// A count/delay-length mismatch is a configuration error, raised here so
    /// a bad configuration fails at construction instead of mid-retry.
    pub fn new(retries: u32, delays: Vec<Duration>) -> Result<Self> {
        if delays.len() != retries as usize {
            return Err(QuarryError::with_internal(
                ErrorCode::ConfigurationError,
                "retry configuration must define exactly one delay per retry",
                format!("{} retries but {} delays", retries, delays.len()),
            ));
        }
        Ok(Self { retries, delays })
    }

    /// Create a configuration repeating one delay for every retry.
    pub fn uniform(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            delays: vec![delay; retries as usize],
        }
    }

    /// Number of retries after the first failed attempt.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Delay applied before the `retry`-th retry (0-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.delays
            .get(retry as usize)
            .copied()
            .unwrap_or_default()
    }
}

impl Default for RetryConfiguration {
    /// Three retries, thirty seconds apart.
    fn default() -> Self {
        Self::uniform(3, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatched_delay_count_fails_fast() {
        let result = RetryConfiguration::new(3, vec![Duration::from_secs(1)]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().code(),
            crate::error::ErrorCode::ConfigurationError
        );
    }

    #[test]
    fn test_explicit_delays() {
        let configuration = RetryConfiguration::new(
            2,
            vec![Duration::from_secs(5), Duration::from_secs(60)],
        )
        .unwrap();
        assert_eq!(configuration.retries(), 2);
        assert_eq!(configuration.delay_for_retry(0), Duration::from_secs(5));
        assert_eq!(configuration.delay_for_retry(1), Duration::from_secs(60));
    }

    #[test]
    fn test_uniform_repeats_one_delay() {
        let configuration = RetryConfiguration::uniform(3, Duration::from_secs(10));
        for retry in 0..3 {
            assert_eq!(configuration.delay_for_retry(retry), Duration::from_secs(10));
        }
    }

    #[test]
    fn test_zero_retries_is_valid() {
        let configuration = RetryConfiguration::new(0, Vec::new()).unwrap();
        assert_eq!(configuration.retries(), 0);
    }
}
