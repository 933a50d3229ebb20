use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use jobqueue_core::types::{DbId, RequestId};

use super::JobStore;
use crate::error::StorageError;
use crate::models::job::{ClaimedJob, Job, NewJob};
use crate::models::status::JobStatus;

/// In-memory [`JobStore`].
///
/// Clones share the same table, so several engines can run against one
/// store. Claiming selects and marks under a single lock guard, which
/// gives the same exclusivity as the database claim.
///
/// Individual operations can be switched to fail with
/// [`StorageError::Unavailable`] to exercise error paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    table: Mutex<Table>,
    faults: Faults,
}

#[derive(Debug, Default)]
struct Table {
    last_id: DbId,
    rows: BTreeMap<DbId, Job>,
}

#[derive(Debug, Default)]
struct Faults {
    create: AtomicBool,
    claim: AtomicBool,
    confirm: AtomicBool,
    mark_failed: AtomicBool,
    delete: AtomicBool,
}

/// Store operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Create,
    Claim,
    Confirm,
    MarkFailed,
    Delete,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` fail (or succeed again) until changed.
    pub fn set_failing(&self, op: StoreOp, failing: bool) {
        self.fault(op).store(failing, Ordering::SeqCst);
    }

    /// Copy of every row, ordered by id.
    pub fn snapshot(&self) -> Vec<Job> {
        self.table().rows.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().rows.is_empty()
    }

    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.table()
            .rows
            .values()
            .filter(|job| job.status == status.id())
            .count()
    }

    fn fault(&self, op: StoreOp) -> &AtomicBool {
        let faults = &self.inner.faults;
        match op {
            StoreOp::Create => &faults.create,
            StoreOp::Claim => &faults.claim,
            StoreOp::Confirm => &faults.confirm,
            StoreOp::MarkFailed => &faults.mark_failed,
            StoreOp::Delete => &faults.delete,
        }
    }

    fn check(&self, op: StoreOp) -> Result<(), StorageError> {
        if self.fault(op).load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("{op:?} is failing")));
        }
        Ok(())
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.inner
            .table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> Result<DbId, StorageError> {
        self.check(StoreOp::Create)?;
        let now = Utc::now();
        let mut table = self.table();
        table.last_id += 1;
        let id = table.last_id;
        table.rows.insert(
            id,
            Job {
                id,
                task_name: job.task_name,
                payload: job.payload,
                status: job.status.id(),
                error_message: None,
                created_at: now,
                scheduled_at: job.scheduled_at.unwrap_or(now),
                claimed_at: None,
            },
        );
        Ok(id)
    }

    async fn claim_next(&self, request_id: RequestId) -> Result<Option<ClaimedJob>, StorageError> {
        self.check(StoreOp::Claim)?;
        let now = Utc::now();
        let mut table = self.table();
        let next = table
            .rows
            .values()
            .filter(|job| job.is_eligible(now))
            .min_by_key(|job| (job.scheduled_at, job.id))
            .map(|job| job.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = table.rows.get_mut(&id) else {
            return Ok(None);
        };
        job.status = JobStatus::Running.id();
        job.claimed_at = Some(now);
        Ok(Some(ClaimedJob {
            job: job.clone(),
            request_id,
        }))
    }

    async fn confirm_running(&self, id: DbId) -> Result<bool, StorageError> {
        self.check(StoreOp::Confirm)?;
        Ok(self
            .table()
            .rows
            .get(&id)
            .is_some_and(|job| job.status == JobStatus::Running.id()))
    }

    async fn mark_failed(&self, id: DbId, error: &str) -> Result<bool, StorageError> {
        self.check(StoreOp::MarkFailed)?;
        let mut table = self.table();
        let Some(job) = table.rows.get_mut(&id) else {
            return Ok(false);
        };
        job.status = JobStatus::Failed.id();
        if job.error_message.is_none() {
            job.error_message = Some(error.to_string());
        }
        Ok(true)
    }

    async fn delete(&self, id: DbId) -> Result<bool, StorageError> {
        self.check(StoreOp::Delete)?;
        Ok(self.table().rows.remove(&id).is_some())
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<Job>, StorageError> {
        Ok(self.table().rows.get(&id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
