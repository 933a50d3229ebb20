//! Queue engine: the polling loop.
//!
//! Each cycle claims at most one eligible job through the [`JobStore`],
//! hands it to a [`JobExecutor`], and reports the outcome through the
//! [`Notifier`]. One engine processes jobs strictly one at a time; run
//! several engines against the same store to scale out.
//!
//! Cancellation is only observed between cycles and while idling, so a
//! job that has been claimed always runs to completion or failure.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use jobqueue_core::backoff::IdleBackoff;
use jobqueue_core::types::{DbId, RequestId};
use jobqueue_core::{LogLevel, Notifier, TaskRegistry};
use jobqueue_db::{JobStore, StorageError};

use crate::executor::{JobExecutor, StagePolicy};

/// Default base delay between empty polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default ceiling for the idle backoff.
pub const DEFAULT_MAX_IDLE_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of consecutive storage failures tolerated by the loop.
pub const DEFAULT_MAX_STORAGE_FAILURES: u32 = 5;

/// Tuning for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base idle delay after an empty poll.
    pub poll_interval: Duration,
    /// Ceiling for the doubling idle delay.
    pub max_idle_interval: Duration,
    /// Upper bound on a task's run operation. `None` waits indefinitely.
    pub task_timeout: Option<Duration>,
    /// Behaviour of the lifecycle stages after a failure.
    pub stage_policy: StagePolicy,
    /// Consecutive claim failures after which the loop gives up.
    pub max_storage_failures: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_idle_interval: DEFAULT_MAX_IDLE_INTERVAL,
            task_timeout: None,
            stage_policy: StagePolicy::default(),
            max_storage_failures: DEFAULT_MAX_STORAGE_FAILURES,
        }
    }
}

/// How long the loop keeps polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPolicy {
    /// At most `max_iterations` cycles; an empty poll ends the run.
    Bounded { max_iterations: u64 },
    /// Until cancelled; an empty poll idles with backoff.
    Forever,
}

/// Result of one claim-execute-finalize cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    JobCompleted {
        job_id: DbId,
        request_id: RequestId,
        data: Option<Value>,
    },
    JobFailed {
        job_id: DbId,
        request_id: RequestId,
        error: String,
    },
    NoWorkAvailable,
}

/// Why a run loop returned normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    IterationLimit,
    Drained,
    Cancelled,
}

/// Counters for one run of the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub completed: u64,
    pub failed: u64,
    pub stop: StopReason,
}

/// Infrastructure failures that end the loop.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("storage unavailable after {attempts} consecutive failures: {source}")]
    StorageUnavailable {
        attempts: u32,
        #[source]
        source: StorageError,
    },
}

/// One polling loop over a job store.
pub struct QueueEngine<S> {
    store: S,
    registry: Arc<TaskRegistry>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    label: String,
}

impl<S: JobStore> QueueEngine<S> {
    pub fn new(
        store: S,
        registry: Arc<TaskRegistry>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            config,
            label: "engine".to_string(),
        }
    }

    /// Name used in log lines to tell engines in one process apart.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Claim, execute and finalize at most one job.
    ///
    /// Everything that goes wrong inside the job ends up in
    /// [`Outcome::JobFailed`]. Only a failed claim is returned as an error.
    pub async fn run_once(&self) -> Result<Outcome, StorageError> {
        let request_id = RequestId::new_v4();
        self.notify(LogLevel::Debug, "fetching new job", Some(request_id), &[]);

        let claimed = match self.store.claim_next(request_id).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                self.notify(LogLevel::Debug, "no jobs to fetch", Some(request_id), &[]);
                return Ok(Outcome::NoWorkAvailable);
            }
            Err(e) => {
                self.notify(
                    LogLevel::Warn,
                    "error fetching job",
                    Some(request_id),
                    &[("error", e.to_string())],
                );
                return Err(e);
            }
        };

        let job_id = claimed.id();
        self.notify(
            LogLevel::Info,
            "successfully fetched job",
            Some(request_id),
            &[("job_id", job_id.to_string())],
        );

        let result = JobExecutor::new(&self.store, &self.registry, self.notifier.as_ref())
            .with_policy(self.config.stage_policy)
            .with_task_timeout(self.config.task_timeout)
            .execute(&claimed)
            .await;

        if result.success {
            self.notify(
                LogLevel::Info,
                "successfully completed job",
                Some(request_id),
                &[("job_id", job_id.to_string())],
            );
            Ok(Outcome::JobCompleted {
                job_id,
                request_id,
                data: result.data,
            })
        } else {
            let error = result.error.unwrap_or_else(|| "job failed".to_string());
            self.notify(
                LogLevel::Alert,
                "error running job",
                Some(request_id),
                &[("job_id", job_id.to_string()), ("error", error.clone())],
            );
            Ok(Outcome::JobFailed {
                job_id,
                request_id,
                error,
            })
        }
    }

    /// Run up to `max_iterations` cycles, stopping early when the queue is
    /// drained or `cancel` fires.
    pub async fn run_bounded(
        &self,
        max_iterations: u64,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, EngineError> {
        self.run(PollPolicy::Bounded { max_iterations }, cancel).await
    }

    /// Run until `cancel` fires, idling with backoff when there is no work.
    pub async fn run_forever(&self, cancel: &CancellationToken) -> Result<RunSummary, EngineError> {
        self.run(PollPolicy::Forever, cancel).await
    }

    /// The polling loop shared by every policy.
    pub async fn run(
        &self,
        policy: PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, EngineError> {
        let mut backoff = IdleBackoff::new(self.config.poll_interval, self.config.max_idle_interval);
        let mut storage_failures: u32 = 0;
        let mut iterations: u64 = 0;
        let mut completed: u64 = 0;
        let mut failed: u64 = 0;

        tracing::info!(
            engine = %self.label,
            ?policy,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Queue engine started",
        );

        let stop = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if let PollPolicy::Bounded { max_iterations } = policy {
                if iterations >= max_iterations {
                    break StopReason::IterationLimit;
                }
            }
            iterations += 1;

            let delay = match self.run_once().await {
                Ok(Outcome::JobCompleted { .. }) => {
                    completed += 1;
                    storage_failures = 0;
                    backoff.reset();
                    continue;
                }
                Ok(Outcome::JobFailed { .. }) => {
                    failed += 1;
                    storage_failures = 0;
                    backoff.reset();
                    continue;
                }
                Ok(Outcome::NoWorkAvailable) => {
                    storage_failures = 0;
                    match policy {
                        PollPolicy::Bounded { .. } => break StopReason::Drained,
                        PollPolicy::Forever => backoff.next_delay(),
                    }
                }
                Err(e) => {
                    storage_failures += 1;
                    if storage_failures >= self.config.max_storage_failures {
                        self.notify(
                            LogLevel::Alert,
                            "storage unavailable, stopping engine",
                            None,
                            &[
                                ("attempts", storage_failures.to_string()),
                                ("error", e.to_string()),
                            ],
                        );
                        return Err(EngineError::StorageUnavailable {
                            attempts: storage_failures,
                            source: e,
                        });
                    }
                    backoff.next_delay()
                }
            };

            if !idle(delay, cancel).await {
                break StopReason::Cancelled;
            }
        };

        let summary = RunSummary {
            iterations,
            completed,
            failed,
            stop,
        };
        tracing::info!(
            engine = %self.label,
            iterations,
            completed,
            failed,
            stop = ?stop,
            "Queue engine stopped",
        );
        Ok(summary)
    }

    fn notify(
        &self,
        level: LogLevel,
        message: &str,
        request_id: Option<RequestId>,
        extra: &[(&str, String)],
    ) {
        let mut attributes = Vec::with_capacity(extra.len() + 1);
        attributes.push(("engine", self.label.clone()));
        attributes.extend(extra.iter().cloned());
        self.notifier.log(level, message, request_id, &attributes);
    }
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancel.
async fn idle(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
