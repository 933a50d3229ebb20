//! `echo`: logs a message and hands it back as result data.
//!
//! Payload: `{"message": "<non-empty string>"}`. Messages longer than
//! eight characters are written to the log.

use async_trait::async_trait;
use jobqueue_core::{TaskError, TaskUnit};
use serde::Deserialize;
use serde_json::{json, Value};

pub const TASK_NAME: &str = "echo";

/// Messages up to this many characters are not logged.
const QUIET_MAX_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct EchoPayload {
    pub message: String,
}

#[derive(Debug)]
pub struct EchoTask {
    message: String,
}

impl EchoTask {
    pub fn new(payload: EchoPayload) -> Result<Self, TaskError> {
        if payload.message.trim().is_empty() {
            return Err(TaskError::InvalidPayload {
                task: TASK_NAME.to_string(),
                reason: "message must not be empty".to_string(),
            });
        }
        Ok(Self {
            message: payload.message,
        })
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    fn should_log(&self) -> bool {
        self.message.chars().count() > QUIET_MAX_LEN
    }
}

#[async_trait]
impl TaskUnit for EchoTask {
    async fn run(&mut self) -> Result<Option<Value>, TaskError> {
        if self.should_log() {
            tracing::info!(message = %self.message, "echo");
        }
        Ok(Some(json!({ "message": self.message })))
    }
}
