//! The task capability exposed to task authors.
//!
//! A task unit is built from a job's payload by a factory registered in
//! the [`TaskRegistry`](crate::TaskRegistry), run exactly once by the job
//! executor, then dropped. Units are never shared between jobs.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TaskError;

/// A unit of business logic executed for one job.
#[async_trait]
pub trait TaskUnit: Send {
    /// Run the task.
    ///
    /// `Ok` signals success and may carry diagnostic data for the logs.
    /// `Err` marks the job failed with the error's message.
    async fn run(&mut self) -> Result<Option<Value>, TaskError>;
}

/// Boxed factory turning a borrowed payload into a fresh task unit.
pub type TaskFactory =
    Box<dyn Fn(&Value) -> Result<Box<dyn TaskUnit>, TaskError> + Send + Sync + 'static>;
