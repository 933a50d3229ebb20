use std::time::Duration;

use jobqueue_db::DEFAULT_MAX_CONNECTIONS;

use crate::engine::{
    EngineConfig, DEFAULT_MAX_IDLE_INTERVAL, DEFAULT_MAX_STORAGE_FAILURES, DEFAULT_POLL_INTERVAL,
};
use crate::executor::StagePolicy;

/// Default cycle cap in bounded mode.
const DEFAULT_MAX_ITERATIONS: u64 = 100;

/// Errors from reading the worker configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Which loop the worker binary runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Poll until interrupted.
    Forever,
    /// Process up to `max_iterations` jobs, exit once the queue is empty.
    Bounded { max_iterations: u64 },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Number of engine instances run by this process.
    pub concurrency: usize,
    pub mode: RunMode,
    pub engine: EngineConfig,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default     |
    /// |-------------------------|-------------|
    /// | `DATABASE_URL`          | required    |
    /// | `DB_MAX_CONNECTIONS`    | `10`        |
    /// | `WORKER_CONCURRENCY`    | `1`         |
    /// | `WORKER_MODE`           | `forever`   |
    /// | `WORKER_MAX_ITERATIONS` | `100`       |
    /// | `POLL_INTERVAL_MS`      | `1000`      |
    /// | `MAX_IDLE_INTERVAL_MS`  | `30000`     |
    /// | `TASK_TIMEOUT_SECS`     | unset       |
    /// | `MAX_STORAGE_FAILURES`  | `5`         |
    /// | `JOB_STAGE_POLICY`      | `continue`  |
    /// | `LOG_FORMAT`            | `text`      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let concurrency: usize = parse_or(&lookup, "WORKER_CONCURRENCY", 1)?;
        if concurrency == 0 {
            return Err(invalid("WORKER_CONCURRENCY", "0", "must be at least 1"));
        }

        let mode = match lookup("WORKER_MODE").as_deref().map(str::trim) {
            None | Some("") | Some("forever") => RunMode::Forever,
            Some("bounded") => RunMode::Bounded {
                max_iterations: parse_or(&lookup, "WORKER_MAX_ITERATIONS", DEFAULT_MAX_ITERATIONS)?,
            },
            Some(other) => return Err(invalid("WORKER_MODE", other, "expected `forever` or `bounded`")),
        };

        let poll_interval = parse_or(
            &lookup,
            "POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL.as_millis() as u64,
        )
        .map(Duration::from_millis)?;
        let max_idle_interval = parse_or(
            &lookup,
            "MAX_IDLE_INTERVAL_MS",
            DEFAULT_MAX_IDLE_INTERVAL.as_millis() as u64,
        )
        .map(Duration::from_millis)?;
        let task_timeout = parse_opt::<u64, _>(&lookup, "TASK_TIMEOUT_SECS")?.map(Duration::from_secs);
        let max_storage_failures =
            parse_or(&lookup, "MAX_STORAGE_FAILURES", DEFAULT_MAX_STORAGE_FAILURES)?;

        let stage_policy = match lookup("JOB_STAGE_POLICY").as_deref().map(str::trim) {
            None | Some("") | Some("continue") => StagePolicy::Continue,
            Some("short-circuit") => StagePolicy::ShortCircuit,
            Some(other) => {
                return Err(invalid(
                    "JOB_STAGE_POLICY",
                    other,
                    "expected `continue` or `short-circuit`",
                ))
            }
        };

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(invalid("LOG_FORMAT", other, "expected `text` or `json`")),
        };

        Ok(Self {
            database_url,
            max_connections,
            concurrency,
            mode,
            engine: EngineConfig {
                poll_interval,
                max_idle_interval,
                task_timeout,
                stage_policy,
                max_storage_failures,
            },
            log_format,
        })
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_opt<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
