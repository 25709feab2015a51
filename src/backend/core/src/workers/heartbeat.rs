//! Server heartbeat: periodic liveness records.

use std::sync::Arc;

use crate::error::Result;
use crate::server::ServerContext;
use crate::store::Store;

/// Writes a heartbeat record for the server instance at a fixed interval.
pub struct ServerHeartbeatWorker {
    server: Arc<ServerContext>,
}

impl ServerHeartbeatWorker {
    pub fn new(server: Arc<ServerContext>) -> Self {
        Self { server }
    }

    /// Run the heartbeat loop until shutdown.
    pub async fn run(self) {
        tracing::info!(server_id = %self.server.server_instance_id, "heartbeat loop started");

        loop {
            if self.server.shutdown.is_cancelled() {
                break;
            }

            if let Err(error) = self.write_heartbeat().await {
                tracing::error!(%error, "failed to write server heartbeat");
            }

            tokio::select! {
                _ = self.server.shutdown.cancelled() => {}
                _ = tokio::time::sleep(self.server.heartbeat.interval) => {}
            }
        }

        tracing::info!(server_id = %self.server.server_instance_id, "heartbeat loop stopped");
    }

    async fn write_heartbeat(&self) -> Result<()> {
        let mut tx = self.server.store.writer().begin_transaction().await?;
        tx.create_server_heartbeat(&self.server.server_instance_id)
            .await?;
        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobRegistry;
    use crate::queue::MemoryQueue;
    use crate::server::ServerContext;
    use crate::store::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_heartbeats_recorded_until_shutdown() {
        let store = MemoryStore::new();
        let mut context = ServerContext::new(
            "test-host/test-key".to_string(),
            Arc::new(MemoryQueue::default()),
            Arc::new(store.clone()),
            Arc::new(JobRegistry::new()),
        );
        context.heartbeat.interval = Duration::from_millis(20);
        let context = Arc::new(context);

        let worker = ServerHeartbeatWorker::new(Arc::clone(&context));
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(110)).await;
        context.shutdown.cancel();
        handle.await.unwrap();

        let count = store.heartbeat_count("test-host/test-key");
        assert!(count >= 2, "expected several heartbeats, got {count}");
    }
}
