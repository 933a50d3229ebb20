//! Storage gateway: every read and write of job records goes through a
//! [`JobStore`].
//!
//! [`PgJobStore`] is the production implementation on top of
//! [`JobRepo`](crate::repositories::JobRepo). [`MemoryJobStore`] keeps the
//! same contract in process memory for tests and local experiments.

mod memory;
mod postgres;

use std::future::Future;

use jobqueue_core::types::{DbId, RequestId};

use crate::error::StorageError;
use crate::models::job::{ClaimedJob, Job, NewJob};

pub use memory::{MemoryJobStore, StoreOp};
pub use postgres::PgJobStore;

/// Storage operations behind the job lifecycle.
///
/// `claim_next` must be atomic: under concurrent callers each eligible
/// record is handed to at most one of them. A caller that loses a race
/// sees the next eligible record or `None`, never an error.
pub trait JobStore: Send + Sync {
    /// Insert a new job and return its id.
    fn create(&self, job: NewJob) -> impl Future<Output = Result<DbId, StorageError>> + Send;

    /// Claim the eligible job with the lowest `(scheduled_at, id)`, moving
    /// it to running and tagging it with `request_id`.
    fn claim_next(
        &self,
        request_id: RequestId,
    ) -> impl Future<Output = Result<Option<ClaimedJob>, StorageError>> + Send;

    /// `true` if the job exists and is held in running state.
    fn confirm_running(&self, id: DbId)
        -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// Move the job to failed with `error`. Idempotent.
    fn mark_failed(
        &self,
        id: DbId,
        error: &str,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// Remove the job entirely.
    fn delete(&self, id: DbId) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn find_by_id(&self, id: DbId)
        -> impl Future<Output = Result<Option<Job>, StorageError>> + Send;
}
