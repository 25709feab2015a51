//! In-memory queue backend for development and testing.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{Queue, QueueConfig, QueuedJob};
use crate::error::Result;

struct StoredMessage {
    id: String,
    message: String,
    visible_at: DateTime<Utc>,
}

/// In-memory queue: a single mutex guarding a list, first-eligible scan.
///
/// Insertion order doubles as the eligibility scan order, which gives
/// best-effort FIFO for undelayed messages.
pub struct MemoryQueue {
    config: QueueConfig,
    messages: Mutex<Vec<StoredMessage>>,
}

impl MemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Number of messages currently stored, hidden or not.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait::async_trait]
impl Queue for MemoryQueue {
    async fn bootstrap(&self) -> Result<()> {
        Ok(())
    }

    async fn enqueue(
        &self,
        serialized_definition: String,
        visibility_delay: Option<std::time::Duration>,
    ) -> Result<()> {
        let now = Utc::now();
        let visible_at = match visibility_delay {
            Some(delay) => now + chrono::Duration::from_std(delay).unwrap_or_default(),
            None => now,
        };

        let mut messages = self.messages.lock();
        messages.push(StoredMessage {
            id: Uuid::new_v4().to_string(),
            message: serialized_definition,
            visible_at,
        });

        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>> {
        let now = Utc::now();
        let hidden_until =
            now + chrono::Duration::from_std(self.config.visibility_timeout).unwrap_or_default();

        let mut messages = self.messages.lock();
        for stored in messages.iter_mut() {
            if stored.visible_at <= now {
                stored.visible_at = hidden_until;
                return Ok(Some(QueuedJob {
                    message_id: stored.id.clone(),
                    serialized_definition: stored.message.clone(),
                }));
            }
        }

        Ok(None)
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        let mut messages = self.messages.lock();
        messages.retain(|stored| stored.id != message_id);
        Ok(())
    }
}
