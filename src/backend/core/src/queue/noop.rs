//! No-op queue backend.

use super::{Queue, QueuedJob};
use crate::error::Result;

/// A queue that accepts enqueues and never yields anything.
///
/// Wiring this in disables asynchronous job processing entirely: dispatch
/// still writes job records, but no worker will ever pick them up. Useful for
/// environments that only want the store (e.g. read-only dashboards) or for
/// turning processing off without touching dispatch call sites.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopQueue;

#[async_trait::async_trait]
impl Queue for NoopQueue {
    async fn bootstrap(&self) -> Result<()> {
        Ok(())
    }

    async fn enqueue(
        &self,
        _serialized_definition: String,
        _visibility_delay: Option<std::time::Duration>,
    ) -> Result<()> {
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>> {
        Ok(None)
    }

    async fn delete_message(&self, _message_id: &str) -> Result<()> {
        Ok(())
    }
}
