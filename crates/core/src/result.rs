use serde::Serialize;
use serde_json::Value;

/// Outcome of running one job through the executor.
///
/// Produced once per job, consumed by the engine for logging and then
/// discarded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ExecutionResult {
    pub fn succeeded(data: Option<Value>) -> Self {
        Self {
            success: true,
            error: None,
            data,
        }
    }

    pub fn failed(error: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data,
        }
    }
}
