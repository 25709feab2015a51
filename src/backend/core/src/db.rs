//! Database layer for the SQLite-backed queue and store.
//!
//! Owns pool construction and the schema migrations. Each migration is
//! applied at most once; applied migrations are recorded in the
//! `version_history` ledger so bootstrap is idempotent and safe to run from
//! every server at startup.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Create a connection pool from the database configuration.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&config.url)
        .await?;

    Ok(pool)
}

/// Ordered schema migrations. Names are part of the persisted ledger; never
/// rename or reorder an entry that has shipped.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_create_queue",
        r#"
        CREATE TABLE queue (
            id TEXT PRIMARY KEY,
            message TEXT NOT NULL,
            hidden_until TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX idx_queue_created_at ON queue (created_at)
        "#,
    ),
    (
        "0002_create_servers",
        r#"
        CREATE TABLE servers (
            id TEXT PRIMARY KEY,
            hostname TEXT NOT NULL,
            key TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE server_heartbeats (
            server_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE workers (
            id TEXT PRIMARY KEY,
            server_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "0003_create_dispatched_jobs",
        r#"
        CREATE TABLE dispatched_jobs (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            job_type TEXT NOT NULL,
            parameters_type TEXT NOT NULL,
            parameters TEXT,
            retries INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            finished_at TEXT
        )
        "#,
    ),
    (
        "0004_create_scheduled_jobs",
        r#"
        CREATE TABLE scheduled_jobs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            cron_expression TEXT NOT NULL,
            job_type TEXT NOT NULL,
            parameters_type TEXT NOT NULL,
            parameters TEXT,
            next_run_at TEXT,
            last_run_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX idx_scheduled_jobs_next_run_at ON scheduled_jobs (next_run_at)
        "#,
    ),
    (
        "0005_create_job_logs",
        r#"
        CREATE TABLE job_logs (
            job_id TEXT NOT NULL,
            log_level TEXT NOT NULL,
            message TEXT NOT NULL,
            exception TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX idx_job_logs_job_id ON job_logs (job_id)
        "#,
    ),
    (
        "0006_create_locks",
        r#"
        CREATE TABLE locks (
            resource TEXT NOT NULL,
            until TEXT NOT NULL,
            released_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX idx_locks_resource ON locks (resource)
        "#,
    ),
];

/// Apply any migrations not yet recorded in `version_history`.
pub async fn apply_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS version_history (migration TEXT PRIMARY KEY)")
        .execute(pool)
        .await?;

    for (name, sql) in MIGRATIONS {
        let applied: Option<String> =
            sqlx::query_scalar("SELECT migration FROM version_history WHERE migration = ?1")
                .bind(name)
                .fetch_optional(pool)
                .await?;

        if applied.is_some() {
            continue;
        }

        let mut tx = pool.begin().await?;
        for statement in sql.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO version_history (migration) VALUES (?1)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(migration = name, "applied schema migration");
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    /// A pool backed by a throwaway database file. The directory must be kept
    /// alive for the duration of the test.
    pub(crate) async fn temp_pool() -> (TempDir, SqlitePool) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("quarry.db"))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .expect("failed to open sqlite pool");
        (dir, pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let (_dir, pool) = test_support::temp_pool().await;

        apply_migrations(&pool).await.unwrap();
        apply_migrations(&pool).await.unwrap();

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM version_history")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());
    }

    #[tokio::test]
    async fn test_migrations_create_schema() {
        let (_dir, pool) = test_support::temp_pool().await;
        apply_migrations(&pool).await.unwrap();

        for table in [
            "queue",
            "servers",
            "server_heartbeats",
            "workers",
            "dispatched_jobs",
            "scheduled_jobs",
            "job_logs",
            "locks",
        ] {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
