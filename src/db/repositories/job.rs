//! Deactivation job repository
//!
//! Durable queue backing the expiry scheduler. Jobs are selected by
//! `(status, run_at)`; a failed attempt either reschedules the job with a
//! later `run_at` or parks it as `failed` once retries run out.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{DeactivationJob, JobStatus, QueueDepth};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Deactivation job repository trait
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new pending job, returning it with the assigned id
    async fn enqueue(&self, job: &DeactivationJob) -> Result<DeactivationJob>;

    /// Get job by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<DeactivationJob>>;

    /// Pending jobs whose `run_at` has passed, oldest first
    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<DeactivationJob>>;

    /// Mark a job as fired
    async fn mark_done(&self, id: i64) -> Result<()>;

    /// Park a job after its final attempt
    async fn mark_failed(&self, id: i64, attempts: i64, error: &str) -> Result<()>;

    /// Push a job back into the queue with a later `run_at`
    async fn reschedule(
        &self,
        id: i64,
        attempts: i64,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()>;

    /// Pending and failed counts for observability
    async fn queue_depth(&self) -> Result<QueueDepth>;
}

/// SQLx-based job repository.
pub struct SqlxJobRepository {
    pool: DynDatabasePool,
}

impl SqlxJobRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn JobRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn enqueue(&self, job: &DeactivationJob) -> Result<DeactivationJob> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => enqueue_sqlite(self.pool.as_sqlite().unwrap(), job).await,
            DatabaseDriver::Mysql => enqueue_mysql(self.pool.as_mysql().unwrap(), job).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<DeactivationJob>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_by_id_sqlite(self.pool.as_sqlite().unwrap(), id).await,
            DatabaseDriver::Mysql => get_by_id_mysql(self.pool.as_mysql().unwrap(), id).await,
        }
    }

    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<DeactivationJob>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => due_sqlite(self.pool.as_sqlite().unwrap(), now, limit).await,
            DatabaseDriver::Mysql => due_mysql(self.pool.as_mysql().unwrap(), now, limit).await,
        }
    }

    async fn mark_done(&self, id: i64) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => mark_done_sqlite(self.pool.as_sqlite().unwrap(), id).await,
            DatabaseDriver::Mysql => mark_done_mysql(self.pool.as_mysql().unwrap(), id).await,
        }
    }

    async fn mark_failed(&self, id: i64, attempts: i64, error: &str) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                mark_failed_sqlite(self.pool.as_sqlite().unwrap(), id, attempts, error).await
            }
            DatabaseDriver::Mysql => {
                mark_failed_mysql(self.pool.as_mysql().unwrap(), id, attempts, error).await
            }
        }
    }

    async fn reschedule(
        &self,
        id: i64,
        attempts: i64,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                reschedule_sqlite(self.pool.as_sqlite().unwrap(), id, attempts, run_at, error)
                    .await
            }
            DatabaseDriver::Mysql => {
                reschedule_mysql(self.pool.as_mysql().unwrap(), id, attempts, run_at, error).await
            }
        }
    }

    async fn queue_depth(&self) -> Result<QueueDepth> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => queue_depth_sqlite(self.pool.as_sqlite().unwrap()).await,
            DatabaseDriver::Mysql => queue_depth_mysql(self.pool.as_mysql().unwrap()).await,
        }
    }
}

const SELECT_JOB: &str =
    "SELECT id, chat_id, run_at, attempts, status, last_error, created_at FROM deactivation_jobs";

const INSERT_JOB: &str = r#"
    INSERT INTO deactivation_jobs (chat_id, run_at, attempts, status, last_error, created_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

const DUE_JOBS: &str = r#"
    SELECT id, chat_id, run_at, attempts, status, last_error, created_at FROM deactivation_jobs
    WHERE status = 'pending' AND run_at <= ?
    ORDER BY run_at ASC
"#;

const QUEUE_DEPTH: &str = r#"
    SELECT
        SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending,
        SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed
    FROM deactivation_jobs
"#;

async fn enqueue_sqlite(pool: &SqlitePool, job: &DeactivationJob) -> Result<DeactivationJob> {
    let result = sqlx::query(INSERT_JOB)
        .bind(job.chat_id)
        .bind(job.run_at)
        .bind(job.attempts)
        .bind(job.status.to_string())
        .bind(&job.last_error)
        .bind(job.created_at)
        .execute(pool)
        .await
        .context("Failed to enqueue deactivation job")?;

    let mut created = job.clone();
    created.id = result.last_insert_rowid();
    Ok(created)
}

async fn enqueue_mysql(pool: &MySqlPool, job: &DeactivationJob) -> Result<DeactivationJob> {
    let result = sqlx::query(INSERT_JOB)
        .bind(job.chat_id)
        .bind(job.run_at)
        .bind(job.attempts)
        .bind(job.status.to_string())
        .bind(&job.last_error)
        .bind(job.created_at)
        .execute(pool)
        .await
        .context("Failed to enqueue deactivation job")?;

    let mut created = job.clone();
    created.id = result.last_insert_id() as i64;
    Ok(created)
}

async fn get_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<DeactivationJob>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_JOB))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get deactivation job")?;

    row.map(|r| row_to_job_sqlite(&r)).transpose()
}

async fn get_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<DeactivationJob>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_JOB))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get deactivation job")?;

    row.map(|r| row_to_job_mysql(&r)).transpose()
}

async fn due_sqlite(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<DeactivationJob>> {
    let rows = sqlx::query(&format!("{} LIMIT {}", DUE_JOBS, limit.max(0)))
        .bind(now)
        .fetch_all(pool)
        .await
        .context("Failed to list due jobs")?;
    rows.iter().map(row_to_job_sqlite).collect()
}

async fn due_mysql(
    pool: &MySqlPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<DeactivationJob>> {
    let rows = sqlx::query(&format!("{} LIMIT {}", DUE_JOBS, limit.max(0)))
        .bind(now)
        .fetch_all(pool)
        .await
        .context("Failed to list due jobs")?;
    rows.iter().map(row_to_job_mysql).collect()
}

async fn mark_done_sqlite(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE deactivation_jobs SET status = 'done', last_error = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to mark job done")?;
    Ok(())
}

async fn mark_done_mysql(pool: &MySqlPool, id: i64) -> Result<()> {
    sqlx::query("UPDATE deactivation_jobs SET status = 'done', last_error = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to mark job done")?;
    Ok(())
}

async fn mark_failed_sqlite(pool: &SqlitePool, id: i64, attempts: i64, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE deactivation_jobs SET status = 'failed', attempts = ?, last_error = ? WHERE id = ?",
    )
    .bind(attempts)
    .bind(error)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to mark job failed")?;
    Ok(())
}

async fn mark_failed_mysql(pool: &MySqlPool, id: i64, attempts: i64, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE deactivation_jobs SET status = 'failed', attempts = ?, last_error = ? WHERE id = ?",
    )
    .bind(attempts)
    .bind(error)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to mark job failed")?;
    Ok(())
}

async fn reschedule_sqlite(
    pool: &SqlitePool,
    id: i64,
    attempts: i64,
    run_at: DateTime<Utc>,
    error: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE deactivation_jobs SET attempts = ?, run_at = ?, last_error = ? WHERE id = ?",
    )
    .bind(attempts)
    .bind(run_at)
    .bind(error)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to reschedule job")?;
    Ok(())
}

async fn reschedule_mysql(
    pool: &MySqlPool,
    id: i64,
    attempts: i64,
    run_at: DateTime<Utc>,
    error: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE deactivation_jobs SET attempts = ?, run_at = ?, last_error = ? WHERE id = ?",
    )
    .bind(attempts)
    .bind(run_at)
    .bind(error)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to reschedule job")?;
    Ok(())
}

async fn queue_depth_sqlite(pool: &SqlitePool) -> Result<QueueDepth> {
    let row = sqlx::query(QUEUE_DEPTH)
        .fetch_one(pool)
        .await
        .context("Failed to read queue depth")?;
    let pending: Option<i64> = row.get("pending");
    let failed: Option<i64> = row.get("failed");
    Ok(QueueDepth {
        pending: pending.unwrap_or(0),
        failed: failed.unwrap_or(0),
    })
}

async fn queue_depth_mysql(pool: &MySqlPool) -> Result<QueueDepth> {
    let row = sqlx::query(QUEUE_DEPTH)
        .fetch_one(pool)
        .await
        .context("Failed to read queue depth")?;
    let pending: Option<i64> = row.get("pending");
    let failed: Option<i64> = row.get("failed");
    Ok(QueueDepth {
        pending: pending.unwrap_or(0),
        failed: failed.unwrap_or(0),
    })
}

fn row_to_job_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<DeactivationJob> {
    let status: String = row.get("status");
    Ok(DeactivationJob {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        run_at: row.get("run_at"),
        attempts: row.get("attempts"),
        status: JobStatus::from_str(&status)?,
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
    })
}

fn row_to_job_mysql(row: &sqlx::mysql::MySqlRow) -> Result<DeactivationJob> {
    let status: String = row.get("status");
    Ok(DeactivationJob {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        run_at: row.get("run_at"),
        attempts: row.get("attempts"),
        status: JobStatus::from_str(&status)?,
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
    })
}
