//! SQLite-backed queue: one row per message, `hidden_until` column.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{Queue, QueueConfig, QueuedJob};
use crate::error::Result;

/// Durable queue backend sharing the engine's SQLite database.
///
/// Dequeue is a transactional select-then-update: the winning transaction
/// pushes `hidden_until` forward, so a message is only checked out once per
/// visibility window.
pub struct SqliteQueue {
    pool: SqlitePool,
    config: QueueConfig,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool, config: QueueConfig) -> Self {
        Self { pool, config }
    }
}

#[derive(sqlx::FromRow)]
struct QueueMessageRow {
    id: String,
    message: String,
}

#[async_trait::async_trait]
impl Queue for SqliteQueue {
    async fn bootstrap(&self) -> Result<()> {
        crate::db::apply_migrations(&self.pool).await
    }

    async fn enqueue(
        &self,
        serialized_definition: String,
        visibility_delay: Option<std::time::Duration>,
    ) -> Result<()> {
        let now = Utc::now();
        let hidden_until: Option<DateTime<Utc>> = visibility_delay
            .map(|delay| now + chrono::Duration::from_std(delay).unwrap_or_default());

        sqlx::query(
            r#"
            INSERT INTO queue (id, message, hidden_until, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(serialized_definition)
        .bind(hidden_until)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>> {
        let now = Utc::now();
        let hidden_until =
            now + chrono::Duration::from_std(self.config.visibility_timeout).unwrap_or_default();

        let mut tx = self.pool.begin().await?;

        let row: Option<QueueMessageRow> = sqlx::query_as(
            r#"
            SELECT id, message
            FROM queue
            WHERE hidden_until IS NULL OR hidden_until <= ?1
            ORDER BY COALESCE(hidden_until, created_at)
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        sqlx::query("UPDATE queue SET hidden_until = ?2 WHERE id = ?1")
            .bind(&row.id)
            .bind(hidden_until)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(QueuedJob {
            message_id: row.id,
            serialized_definition: row.message,
        }))
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM queue WHERE id = ?1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
