//! Notifier: the logging sink the engine and executor report through.
//!
//! [`TracingNotifier`] forwards to `tracing` with the correlation id as a
//! structured field. [`MemoryNotifier`] records entries so tests can
//! assert on what was reported.

use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

use crate::types::RequestId;

/// Severity of a notifier entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Alert,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Alert => "alert",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for job lifecycle log lines.
pub trait Notifier: Send + Sync {
    /// Report `message` at `level`, tagged with the claim cycle's
    /// correlation id (when one exists) and extra key/value attributes.
    fn log(
        &self,
        level: LogLevel,
        message: &str,
        correlation_id: Option<RequestId>,
        attributes: &[(&str, String)],
    );
}

// ---------------------------------------------------------------------------
// TracingNotifier
// ---------------------------------------------------------------------------

/// Forwards entries to the global `tracing` subscriber.
///
/// `Alert` maps to `ERROR` since `tracing` has no alert level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn log(
        &self,
        level: LogLevel,
        message: &str,
        correlation_id: Option<RequestId>,
        attributes: &[(&str, String)],
    ) {
        let request_id = correlation_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let attrs = render_attributes(attributes);

        match level {
            LogLevel::Debug => tracing::debug!(%request_id, attrs = %attrs, "{message}"),
            LogLevel::Info => tracing::info!(%request_id, attrs = %attrs, "{message}"),
            LogLevel::Warn => tracing::warn!(%request_id, attrs = %attrs, "{message}"),
            LogLevel::Alert => tracing::error!(%request_id, attrs = %attrs, "{message}"),
        }
    }
}

/// Render attributes as `[key = value]` pairs separated by spaces.
pub fn render_attributes(attributes: &[(&str, String)]) -> String {
    attributes
        .iter()
        .map(|(key, value)| format!("[{key} = {value}]"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// MemoryNotifier
// ---------------------------------------------------------------------------

/// One recorded notifier call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub correlation_id: Option<RequestId>,
    pub attributes: Vec<(String, String)>,
}

impl LogEntry {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Records every entry in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Entries at exactly `level`.
    pub fn at_level(&self, level: LogLevel) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.level == level)
            .collect()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl Notifier for MemoryNotifier {
    fn log(
        &self,
        level: LogLevel,
        message: &str,
        correlation_id: Option<RequestId>,
        attributes: &[(&str, String)],
    ) {
        let entry = LogEntry {
            level,
            message: message.to_string(),
            correlation_id,
            attributes: attributes
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        };
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
