//! Built-in task units, registered by the worker binary at start-up.

pub mod echo;

use jobqueue_core::registry::{TaskRegistry, TaskRegistryBuilder};

/// Add every built-in task to `builder`.
pub fn register_builtin(builder: TaskRegistryBuilder) -> TaskRegistryBuilder {
    builder.register_typed(echo::TASK_NAME, echo::EchoTask::new)
}

/// Registry containing only the built-in tasks.
pub fn builtin_registry() -> TaskRegistry {
    register_builtin(TaskRegistry::builder()).build()
}
