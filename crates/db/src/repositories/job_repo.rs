//! Repository for the `jobs` table.
//!
//! Uses `JobStatus` from `models::status` for all status transitions.

use sqlx::PgPool;
use jobqueue_core::types::DbId;

use crate::models::job::{Job, NewJob};
use crate::models::status::JobStatus;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, task_name, payload, status, error_message, \
    created_at, scheduled_at, claimed_at";

/// Maximum page size for status listings.
const MAX_LIMIT: i64 = 500;

/// Provides the storage operations behind the job lifecycle.
pub struct JobRepo;

impl JobRepo {
    /// Insert a job. `scheduled_at = None` schedules it for now.
    pub async fn create(pool: &PgPool, input: &NewJob) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "INSERT INTO jobs (task_name, payload, status, scheduled_at) \
             VALUES ($1, $2, $3, COALESCE($4, NOW())) \
             RETURNING id",
        )
        .bind(&input.task_name)
        .bind(&input.payload)
        .bind(input.status.id())
        .bind(input.scheduled_at)
        .fetch_one(pool)
        .await
    }

    /// Atomically claim the next eligible job.
    ///
    /// Picks the pending, due row with the lowest `scheduled_at` (then
    /// lowest `id`) and flips it to running in the same statement.
    /// `FOR UPDATE SKIP LOCKED` makes concurrent claimers pass over a row
    /// another transaction is taking, so each row goes to one caller.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $1, claimed_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE status = $2 AND scheduled_at <= NOW() \
                 ORDER BY scheduled_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             AND status = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Running.id())
            .bind(JobStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// Confirm the job is still held in running state.
    ///
    /// Returns `false` if the row is gone or in any other status.
    pub async fn confirm_running(pool: &PgPool, job_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE jobs SET status = $2 WHERE id = $1 AND status = $2")
            .bind(job_id)
            .bind(JobStatus::Running.id())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a job as failed.
    ///
    /// Idempotent: an already failed job stays failed and keeps the first
    /// recorded error. Returns `false` only when the row does not exist.
    /// No automatic retry is performed.
    pub async fn mark_failed(
        pool: &PgPool,
        job_id: DbId,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = $2, error_message = COALESCE(error_message, $3) \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(JobStatus::Failed.id())
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a job. Only used when the whole lifecycle succeeded.
    pub async fn delete(pool: &PgPool, job_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List jobs in `status`, oldest schedule first. `limit` is capped at 500.
    pub async fn list_by_status(
        pool: &PgPool,
        status: JobStatus,
        limit: i64,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status = $1 \
             ORDER BY scheduled_at ASC, id ASC \
             LIMIT $2"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(status.id())
            .bind(limit.clamp(0, MAX_LIMIT))
            .fetch_all(pool)
            .await
    }

    /// Count jobs in `status`.
    pub async fn count_by_status(pool: &PgPool, status: JobStatus) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE status = $1")
            .bind(status.id())
            .fetch_one(pool)
            .await
    }
}
