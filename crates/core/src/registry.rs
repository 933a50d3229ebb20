//! Task registry: maps a task name to the factory that builds its unit.
//!
//! Populated once at process start through [`TaskRegistryBuilder`] and
//! immutable afterwards. Share it across engine instances with `Arc`.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::TaskError;
use crate::task::{TaskFactory, TaskUnit};

/// Immutable name → factory mapping.
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    /// Build a fresh task unit for `name` from `payload`.
    ///
    /// Fails with [`TaskError::UnknownTask`] when `name` was never
    /// registered, or with whatever the factory reports when it rejects
    /// the payload.
    pub fn construct(&self, name: &str, payload: &Value) -> Result<Box<dyn TaskUnit>, TaskError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| TaskError::UnknownTask(name.to_string()))?;
        factory(payload)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

/// Collects registrations before freezing them into a [`TaskRegistry`].
#[derive(Default)]
pub struct TaskRegistryBuilder {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistryBuilder {
    /// Associate `name` with a factory taking the raw payload.
    ///
    /// Registering the same name twice keeps the later factory.
    pub fn register<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<Box<dyn TaskUnit>, TaskError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            tracing::warn!(task_name = %name, "Task registered twice, replacing factory");
        }
        self.factories.insert(name, Box::new(factory));
        self
    }

    /// Associate `name` with a constructor taking a typed payload.
    ///
    /// The payload is deserialized into `P` first; a payload that does not
    /// fit `P` fails with [`TaskError::InvalidPayload`].
    pub fn register_typed<P, T, F>(self, name: impl Into<String>, constructor: F) -> Self
    where
        P: DeserializeOwned,
        T: TaskUnit + 'static,
        F: Fn(P) -> Result<T, TaskError> + Send + Sync + 'static,
    {
        let name = name.into();
        let task = name.clone();
        self.register(name, move |payload: &Value| {
            let input = P::deserialize(payload).map_err(|e| TaskError::InvalidPayload {
                task: task.clone(),
                reason: e.to_string(),
            })?;
            let unit = constructor(input)?;
            Ok(Box::new(unit) as Box<dyn TaskUnit>)
        })
    }

    pub fn build(self) -> TaskRegistry {
        TaskRegistry {
            factories: self.factories,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
