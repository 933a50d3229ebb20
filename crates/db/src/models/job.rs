//! Job entity models and DTOs.

use chrono::Utc;
use jobqueue_core::types::{DbId, RequestId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::{JobStatus, StatusId};
use crate::error::StorageError;

/// A row from the `jobs` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub task_name: String,
    pub payload: serde_json::Value,
    pub status: StatusId,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub scheduled_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
}

impl Job {
    /// Decode the raw status column.
    pub fn job_status(&self) -> Result<JobStatus, StorageError> {
        JobStatus::try_from(self.status)
    }

    /// Eligible for claiming at `now`: pending and due.
    pub fn is_eligible(&self, now: Timestamp) -> bool {
        self.status == JobStatus::Pending.id() && self.scheduled_at <= now
    }
}

/// DTO for inserting a new job.
///
/// Defaults to `Pending`, scheduled for immediate execution.
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    pub task_name: String,
    pub payload: serde_json::Value,
    #[serde(skip, default = "default_status")]
    pub status: JobStatus,
    /// `None` means "now" at insert time.
    pub scheduled_at: Option<Timestamp>,
}

fn default_status() -> JobStatus {
    JobStatus::Pending
}

impl NewJob {
    pub fn new(task_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_name: task_name.into(),
            payload,
            status: JobStatus::Pending,
            scheduled_at: None,
        }
    }

    /// Insert with a status other than `Pending`, e.g. to park a job.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    /// Earliest time the job may be claimed.
    pub fn scheduled_at(mut self, at: Timestamp) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Schedule the job `delay` from now.
    pub fn delay(self, delay: chrono::Duration) -> Self {
        self.scheduled_at(Utc::now() + delay)
    }
}

/// A job held in `Running` by one engine, with the correlation id
/// generated for this claim.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimedJob {
    pub job: Job,
    pub request_id: RequestId,
}

impl ClaimedJob {
    pub fn id(&self) -> DbId {
        self.job.id
    }

    pub fn task_name(&self) -> &str {
        &self.job.task_name
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.job.payload
    }
}
