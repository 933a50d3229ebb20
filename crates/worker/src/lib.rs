//! `jobqueue-worker` library crate.
//!
//! - [`executor`]: drives one claimed job through its lifecycle stages
//! - [`engine`]: the polling loop that claims, executes and reports
//! - [`config`]: environment-driven worker configuration
//! - [`tasks`]: built-in task units
//!
//! The binary entrypoint lives in `main.rs`.

pub mod config;
pub mod engine;
pub mod executor;
pub mod tasks;

pub use config::{ConfigError, LogFormat, RunMode, WorkerConfig};
pub use engine::{EngineConfig, EngineError, Outcome, PollPolicy, QueueEngine, RunSummary, StopReason};
pub use executor::{JobExecutor, Stage, StagePolicy};
