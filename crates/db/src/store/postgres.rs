use jobqueue_core::types::{DbId, RequestId};
use sqlx::PgPool;

use super::JobStore;
use crate::error::StorageError;
use crate::models::job::{ClaimedJob, Job, NewJob};
use crate::repositories::JobRepo;

/// [`JobStore`] backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> Result<DbId, StorageError> {
        let id = JobRepo::create(&self.pool, &job).await?;
        tracing::debug!(job_id = id, task_name = %job.task_name, "Job created");
        Ok(id)
    }

    async fn claim_next(&self, request_id: RequestId) -> Result<Option<ClaimedJob>, StorageError> {
        let claimed = JobRepo::claim_next(&self.pool).await?;
        Ok(claimed.map(|job| ClaimedJob { job, request_id }))
    }

    async fn confirm_running(&self, id: DbId) -> Result<bool, StorageError> {
        Ok(JobRepo::confirm_running(&self.pool, id).await?)
    }

    async fn mark_failed(&self, id: DbId, error: &str) -> Result<bool, StorageError> {
        Ok(JobRepo::mark_failed(&self.pool, id, error).await?)
    }

    async fn delete(&self, id: DbId) -> Result<bool, StorageError> {
        Ok(JobRepo::delete(&self.pool, id).await?)
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<Job>, StorageError> {
        Ok(JobRepo::find_by_id(&self.pool, id).await?)
    }
}
