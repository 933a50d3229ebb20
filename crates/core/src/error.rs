use std::time::Duration;

/// Errors raised while constructing or running a task unit.
///
/// None of these ever escape the job executor: they are folded into the
/// job's [`ExecutionResult`](crate::ExecutionResult) and persisted as its
/// error string.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("invalid payload for task {task}: {reason}")]
    InvalidPayload { task: String, reason: String },

    #[error("{0}")]
    Execution(String),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

impl TaskError {
    /// Shorthand for a task reporting failure from its run operation.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// True for errors that happen before the unit exists.
    pub fn is_construction(&self) -> bool {
        matches!(self, Self::UnknownTask(_) | Self::InvalidPayload { .. })
    }
}
