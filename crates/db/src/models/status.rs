//! Status enum mapping to the `job_statuses` lookup table.
//!
//! Each variant's discriminant matches the seed data in the
//! `create_job_statuses` migration.

use crate::error::StorageError;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

/// Job lifecycle status.
///
/// There is no completed variant: a job that succeeds is deleted.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending = 1,
    Running = 2,
    Failed = 3,
}

impl JobStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Lookup-table `name` column value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }
}

impl From<JobStatus> for StatusId {
    fn from(value: JobStatus) -> Self {
        value as StatusId
    }
}

impl TryFrom<StatusId> for JobStatus {
    type Error = StorageError;

    fn try_from(value: StatusId) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Pending),
            2 => Ok(Self::Running),
            3 => Ok(Self::Failed),
            other => Err(StorageError::UnknownStatus(other)),
        }
    }
}
