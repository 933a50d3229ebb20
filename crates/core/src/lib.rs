//! Domain building blocks for the job queue.
//!
//! Pure types and logic shared by the storage gateway and the worker:
//! id/time aliases, the task capability and its registry, the notifier
//! interface, execution results, and idle backoff math. This crate has
//! no database dependency.

pub mod backoff;
pub mod error;
pub mod notify;
pub mod registry;
pub mod result;
pub mod task;
pub mod types;

pub use error::TaskError;
pub use notify::{LogEntry, LogLevel, MemoryNotifier, Notifier, TracingNotifier};
pub use registry::{TaskRegistry, TaskRegistryBuilder};
pub use result::ExecutionResult;
pub use task::TaskUnit;
