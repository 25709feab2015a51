//! Job queue with visibility-timeout semantics.
//!
//! The queue transports opaque, JSON-serialized job envelopes. Dequeueing is
//! a *checkout*, not a destructive pop: a dequeued message stays in the queue
//! but is hidden from other consumers for the visibility timeout, and
//! reappears if the consumer crashes before deleting it. This is what makes
//! delivery at-least-once and crash-tolerant.
//!
//! Mutual exclusion is *not* the queue's job: a redelivered message carries
//! the same job id in a distinct queue message, and the
//! [`ResourceLocker`](crate::store::ResourceLocker) is what prevents two
//! workers from executing the same job concurrently.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

mod memory;
mod noop;
mod sqlite;

pub use memory::MemoryQueue;
pub use noop::NoopQueue;
pub use sqlite::SqliteQueue;

/// Configuration shared by queue backends.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// How long a dequeued-but-undeleted message stays hidden from other
    /// consumers before it is redelivered.
    #[serde(with = "humantime_serde", default = "default_visibility_timeout")]
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: default_visibility_timeout(),
        }
    }
}

fn default_visibility_timeout() -> Duration {
    Duration::from_secs(30)
}

/// A job envelope checked out of the queue.
///
/// `message_id` is assigned by the queue and only meaningful for
/// [`Queue::delete_message`]; two envelopes are the same job delivery if
/// their payloads match, regardless of message id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    /// Queue-assigned, transient message identifier.
    pub message_id: String,
    /// JSON of the dispatched job definition.
    pub serialized_definition: String,
}

impl Eq for QueuedJob {}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.serialized_definition == other.serialized_definition
    }
}

/// Trait for queue backends.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Prepare backing storage. Safe to call from every server at startup.
    async fn bootstrap(&self) -> Result<()>;

    /// Enqueue a serialized job definition.
    ///
    /// With a `visibility_delay`, the message only becomes dequeue-eligible
    /// once the delay has elapsed; retries use this for backoff.
    async fn enqueue(
        &self,
        serialized_definition: String,
        visibility_delay: Option<Duration>,
    ) -> Result<()>;

    /// Check out the next eligible message, hiding it for the visibility
    /// timeout. Returns `None` when no message is eligible.
    async fn dequeue(&self) -> Result<Option<QueuedJob>>;

    /// Permanently remove a message. The only true removal.
    async fn delete_message(&self, message_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_equality_is_by_payload() {
        let a = QueuedJob {
            message_id: "m-1".to_string(),
            serialized_definition: "{\"id\":\"j\"}".to_string(),
        };
        let b = QueuedJob {
            message_id: "m-2".to_string(),
            serialized_definition: "{\"id\":\"j\"}".to_string(),
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_config_default_visibility_timeout() {
        let config = QueueConfig::default();
        assert_eq!(config.visibility_timeout, Duration::from_secs(30));
    }
}
