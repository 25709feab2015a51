//! SQLite-backed store.
//!
//! The transactional writer wraps a native sqlx transaction: statements run
//! as operations are recorded and become visible together on commit; dropping
//! the writer rolls the transaction back.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::sync::Arc;
use std::time::Duration;

use super::{
    JobLogStore, LockAttempt, LockReleaser, LogLevel, ResourceLockGuard, ResourceLocker,
    ServerInstance, Store, StoreReader, StoreWriterTransactionManager, TransactionalStoreWriter,
    WorkerRegistration,
};
use crate::error::Result;
use crate::jobs::{DispatchedJobDefinition, JobError, JobStatus, ScheduledJobDefinition};

/// SQLite [`Store`] implementation.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect a pool from configuration and wrap it.
    pub async fn connect(config: &crate::config::DatabaseConfig) -> Result<Self> {
        Ok(Self::new(crate::db::connect(config).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    fn reader(&self) -> Arc<dyn StoreReader> {
        Arc::new(SqliteStoreReader {
            pool: self.pool.clone(),
        })
    }

    fn writer(&self) -> Arc<dyn StoreWriterTransactionManager> {
        Arc::new(SqliteWriterTransactionManager {
            pool: self.pool.clone(),
        })
    }

    fn resource_locker(&self) -> Arc<dyn ResourceLocker> {
        Arc::new(SqliteResourceLocker {
            pool: self.pool.clone(),
        })
    }

    fn job_log_store(&self) -> Arc<dyn JobLogStore> {
        Arc::new(SqliteJobLogStore {
            pool: self.pool.clone(),
        })
    }

    async fn bootstrap(&self) -> Result<()> {
        crate::db::apply_migrations(&self.pool).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct DispatchedJobRow {
    id: String,
    status: String,
    job_type: String,
    parameters_type: String,
    parameters: Option<String>,
    retries: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl From<DispatchedJobRow> for DispatchedJobDefinition {
    fn from(row: DispatchedJobRow) -> Self {
        Self {
            id: row.id,
            job_type: row.job_type,
            parameters_type: row.parameters_type,
            serialized_parameters: row.parameters,
            retries: row.retries as u32,
            status: JobStatus::parse(&row.status),
            created_at: row.created_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ScheduledJobRow {
    id: String,
    name: String,
    cron_expression: String,
    job_type: String,
    parameters_type: String,
    parameters: Option<String>,
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ScheduledJobRow> for ScheduledJobDefinition {
    fn from(row: ScheduledJobRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            cron_expression: row.cron_expression,
            job_type: row.job_type,
            parameters_type: row.parameters_type,
            serialized_parameters: row.parameters,
            next_run_at: row.next_run_at,
            last_run_at: row.last_run_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Reader
// ═══════════════════════════════════════════════════════════════════════════════

struct SqliteStoreReader {
    pool: SqlitePool,
}

#[async_trait::async_trait]
impl StoreReader for SqliteStoreReader {
    async fn dispatched_job(&self, id: &str) -> Result<Option<DispatchedJobDefinition>> {
        let row: Option<DispatchedJobRow> = sqlx::query_as(
            r#"
            SELECT id, status, job_type, parameters_type, parameters, retries,
                   created_at, updated_at, finished_at
            FROM dispatched_jobs
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn scheduled_job(&self, id: &str) -> Result<Option<ScheduledJobDefinition>> {
        let row: Option<ScheduledJobRow> = sqlx::query_as(
            r#"
            SELECT id, name, cron_expression, job_type, parameters_type, parameters,
                   next_run_at, last_run_at, created_at, updated_at
            FROM scheduled_jobs
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn scheduled_jobs_due_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ScheduledJobDefinition>> {
        let rows: Vec<ScheduledJobRow> = sqlx::query_as(
            r#"
            SELECT id, name, cron_expression, job_type, parameters_type, parameters,
                   next_run_at, last_run_at, created_at, updated_at
            FROM scheduled_jobs
            WHERE next_run_at IS NOT NULL AND next_run_at <= ?1
            ORDER BY next_run_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Transactional Writer
// ═══════════════════════════════════════════════════════════════════════════════

struct SqliteWriterTransactionManager {
    pool: SqlitePool,
}

#[async_trait::async_trait]
impl StoreWriterTransactionManager for SqliteWriterTransactionManager {
    async fn begin_transaction(&self) -> Result<Box<dyn TransactionalStoreWriter>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransactionalStoreWriter { tx }))
    }
}

struct SqliteTransactionalStoreWriter {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait::async_trait]
impl TransactionalStoreWriter for SqliteTransactionalStoreWriter {
    async fn create_server(&mut self, server: &ServerInstance) -> Result<()> {
        sqlx::query(
            "INSERT INTO servers (id, hostname, key, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&server.id)
        .bind(&server.hostname)
        .bind(&server.key)
        .bind(server.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn create_server_heartbeat(&mut self, server_id: &str) -> Result<()> {
        sqlx::query("INSERT INTO server_heartbeats (server_id, created_at) VALUES (?1, ?2)")
            .bind(server_id)
            .bind(Utc::now())
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn create_worker(&mut self, worker: &WorkerRegistration) -> Result<()> {
        sqlx::query("INSERT INTO workers (id, server_id, created_at) VALUES (?1, ?2, ?3)")
            .bind(&worker.id)
            .bind(&worker.server_instance_id)
            .bind(worker.created_at)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn create_dispatched_job(&mut self, job: &DispatchedJobDefinition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dispatched_jobs (id, status, job_type, parameters_type, parameters,
                                         retries, created_at, updated_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(&job.job_type)
        .bind(&job.parameters_type)
        .bind(&job.serialized_parameters)
        .bind(job.retries as i64)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.finished_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn create_or_update_scheduled_job(&mut self, job: &ScheduledJobDefinition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (id, name, cron_expression, job_type, parameters_type,
                                        parameters, next_run_at, last_run_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (id) DO UPDATE SET
                cron_expression = excluded.cron_expression,
                job_type = excluded.job_type,
                parameters_type = excluded.parameters_type,
                parameters = excluded.parameters,
                next_run_at = excluded.next_run_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.cron_expression)
        .bind(&job.job_type)
        .bind(&job.parameters_type)
        .bind(&job.serialized_parameters)
        .bind(job.next_run_at)
        .bind(job.last_run_at)
        .bind(job.created_at)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_scheduled_job(&mut self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM scheduled_jobs WHERE id = ?1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn update_job_status(
        &mut self,
        id: &str,
        status: JobStatus,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE dispatched_jobs SET status = ?2, finished_at = ?3, updated_at = ?4 WHERE id = ?1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(finished_at)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_job_retries(&mut self, id: &str, retries: u32) -> Result<()> {
        sqlx::query("UPDATE dispatched_jobs SET retries = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(retries as i64)
            .bind(Utc::now())
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn update_scheduled_job_next_run(
        &mut self,
        id: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE scheduled_jobs SET next_run_at = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(next_run_at)
            .bind(Utc::now())
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn update_scheduled_job_last_run(
        &mut self,
        id: &str,
        last_run_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE scheduled_jobs SET last_run_at = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(last_run_at)
            .bind(Utc::now())
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resource Locker
// ═══════════════════════════════════════════════════════════════════════════════

struct SqliteResourceLocker {
    pool: SqlitePool,
}

struct SqliteLockReleaser {
    pool: SqlitePool,
}

#[async_trait::async_trait]
impl LockReleaser for SqliteLockReleaser {
    async fn release(&self, resource: &str) -> Result<()> {
        sqlx::query(
            "UPDATE locks SET released_at = ?2, updated_at = ?2 WHERE resource = ?1 AND released_at IS NULL",
        )
        .bind(resource)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn release_on_drop(&self, resource: &str) {
        // Without a runtime to spawn on, the TTL bounds how long the record
        // can shadow the resource.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = self.pool.clone();
                let resource = resource.to_string();
                handle.spawn(async move {
                    let released = sqlx::query(
                        "UPDATE locks SET released_at = ?2, updated_at = ?2 WHERE resource = ?1 AND released_at IS NULL",
                    )
                    .bind(&resource)
                    .bind(Utc::now())
                    .execute(&pool)
                    .await;
                    if let Err(error) = released {
                        tracing::debug!(resource, %error, "dropped lock not released; waiting out TTL");
                    }
                });
            }
            Err(_) => {
                tracing::debug!(resource, "dropped lock outside runtime; waiting out TTL");
            }
        }
    }
}

#[async_trait::async_trait]
impl ResourceLocker for SqliteResourceLocker {
    async fn try_lock(&self, resource: &str, ttl: Duration) -> Result<LockAttempt> {
        let now = Utc::now();
        let until = now + chrono::Duration::from_std(ttl).unwrap_or_default();

        let mut tx = self.pool.begin().await?;

        let held: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM locks WHERE resource = ?1 AND released_at IS NULL AND until > ?2",
        )
        .bind(resource)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        if held > 0 {
            return Ok(LockAttempt::Contended);
        }

        sqlx::query(
            r#"
            INSERT INTO locks (resource, until, released_at, created_at, updated_at)
            VALUES (?1, ?2, NULL, ?3, ?3)
            "#,
        )
        .bind(resource)
        .bind(until)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(LockAttempt::Acquired(ResourceLockGuard::new(
            resource.to_string(),
            until,
            Arc::new(SqliteLockReleaser {
                pool: self.pool.clone(),
            }),
        )))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Log Store
// ═══════════════════════════════════════════════════════════════════════════════

struct SqliteJobLogStore {
    pool: SqlitePool,
}

#[async_trait::async_trait]
impl JobLogStore for SqliteJobLogStore {
    async fn log_entry_for_job(
        &self,
        job_id: &str,
        level: LogLevel,
        message: &str,
        error: Option<&JobError>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_logs (job_id, log_level, message, exception, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(job_id)
        .bind(level.as_str())
        .bind(message)
        .bind(error.map(|e| e.to_string()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
