//! Job executor: the lifecycle state machine for one claimed job.
//!
//! ```text
//! Claimed -> PreProcessing -> Executing -> PostProcessing -> Succeeded
//!                                                        \-> Failed
//! ```
//!
//! Stage failures are latched: the first error is kept and becomes the
//! job's error string. With [`StagePolicy::Continue`] later stages still
//! run after a failure; with [`StagePolicy::ShortCircuit`] the executor
//! jumps straight to post-processing. Either way the record is finalized
//! exactly once: deleted on success, marked failed otherwise.
//!
//! [`JobExecutor::execute`] never returns an error and never lets a task
//! panic escape.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;

use jobqueue_core::{ExecutionResult, LogLevel, Notifier, TaskError, TaskRegistry, TaskUnit};
use jobqueue_db::{ClaimedJob, JobStore};

/// Lifecycle stage of a claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Claimed,
    PreProcessing,
    Executing,
    PostProcessing,
    Succeeded,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::PreProcessing => "pre_processing",
            Self::Executing => "executing",
            Self::PostProcessing => "post_processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// What happens to the remaining stages once one has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StagePolicy {
    /// Keep running later stages; the first error still decides the result.
    #[default]
    Continue,
    /// Skip to post-processing as soon as a stage fails.
    ShortCircuit,
}

/// First-error accumulator carried through the stages.
#[derive(Debug, Default)]
struct Latch {
    first: Option<String>,
}

impl Latch {
    /// Record `error` unless an earlier stage already failed.
    fn fail(&mut self, error: impl Into<String>) {
        if self.first.is_none() {
            self.first = Some(error.into());
        }
    }

    fn is_failed(&self) -> bool {
        self.first.is_some()
    }

    fn error(&self) -> Option<&str> {
        self.first.as_deref()
    }
}

/// Runs one claimed job against a store, a registry and a notifier.
pub struct JobExecutor<'a, S> {
    store: &'a S,
    registry: &'a TaskRegistry,
    notifier: &'a dyn Notifier,
    policy: StagePolicy,
    task_timeout: Option<Duration>,
}

impl<'a, S: JobStore> JobExecutor<'a, S> {
    pub fn new(store: &'a S, registry: &'a TaskRegistry, notifier: &'a dyn Notifier) -> Self {
        Self {
            store,
            registry,
            notifier,
            policy: StagePolicy::default(),
            task_timeout: None,
        }
    }

    pub fn with_policy(mut self, policy: StagePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound the task's run operation. `None` waits indefinitely.
    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Drive `claimed` through every stage and return its result.
    pub async fn execute(&self, claimed: &ClaimedJob) -> ExecutionResult {
        let mut latch = Latch::default();
        let mut data = None;
        let mut stage = Stage::Claimed;

        self.notify(
            LogLevel::Info,
            "running job",
            claimed,
            &[("task_name", claimed.task_name().to_string())],
        );

        loop {
            tracing::debug!(
                job_id = claimed.id(),
                request_id = %claimed.request_id,
                stage = stage.as_str(),
                "Job stage",
            );

            stage = match stage {
                Stage::Claimed => Stage::PreProcessing,
                Stage::PreProcessing => {
                    self.pre_process(claimed, &mut latch).await;
                    self.after_stage(Stage::Executing, &latch)
                }
                Stage::Executing => {
                    data = self.run_task(claimed, &mut latch).await;
                    self.after_stage(Stage::PostProcessing, &latch)
                }
                Stage::PostProcessing => {
                    self.post_process(claimed, &mut latch).await;
                    if latch.is_failed() {
                        Stage::Failed
                    } else {
                        Stage::Succeeded
                    }
                }
                Stage::Succeeded => return ExecutionResult::succeeded(data),
                Stage::Failed => {
                    let error = latch.first.unwrap_or_else(|| "job failed".to_string());
                    return ExecutionResult::failed(error, data);
                }
            };
        }
    }

    fn after_stage(&self, next: Stage, latch: &Latch) -> Stage {
        match (self.policy, latch.is_failed()) {
            (StagePolicy::ShortCircuit, true) => Stage::PostProcessing,
            _ => next,
        }
    }

    /// Re-confirm the claim still holds the record in running state.
    async fn pre_process(&self, claimed: &ClaimedJob, latch: &mut Latch) {
        match self.store.confirm_running(claimed.id()).await {
            Ok(true) => {}
            Ok(false) => latch.fail("preProcess failed: job is no longer held in running state"),
            Err(e) => latch.fail(format!("preProcess failed: {e}")),
        }
    }

    /// Build the task unit and run it. Returns the unit's result data.
    async fn run_task(&self, claimed: &ClaimedJob, latch: &mut Latch) -> Option<Value> {
        let mut unit = match self.registry.construct(claimed.task_name(), claimed.payload()) {
            Ok(unit) => unit,
            Err(e) => {
                let error = format!("task construction failed: {e}");
                self.notify(
                    LogLevel::Alert,
                    "task construction failed",
                    claimed,
                    &[("error", error.clone())],
                );
                latch.fail(error);
                return None;
            }
        };

        match self.invoke(unit.as_mut()).await {
            Ok(data) => data,
            Err(e) => {
                latch.fail(format!("run failed: {e}"));
                None
            }
        }
    }

    /// Invoke the unit, folding panics and timeouts into `TaskError`.
    async fn invoke(&self, unit: &mut dyn TaskUnit) -> Result<Option<Value>, TaskError> {
        let run = AssertUnwindSafe(unit.run()).catch_unwind();
        let outcome = match self.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(TaskError::TimedOut(limit)),
            },
            None => run.await,
        };
        outcome.unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic.as_ref()))))
    }

    /// Finalize the record once: delete on success, mark failed otherwise.
    async fn post_process(&self, claimed: &ClaimedJob, latch: &mut Latch) {
        if !latch.is_failed() {
            match self.store.delete(claimed.id()).await {
                Ok(true) => return,
                Ok(false) => latch.fail("postProcess failed: job record no longer exists"),
                Err(e) => latch.fail(format!("postProcess failed: {e}")),
            }
        }

        let error = latch.error().unwrap_or("job failed");
        match self.store.mark_failed(claimed.id(), error).await {
            Ok(true) => {}
            Ok(false) => self.notify(
                LogLevel::Warn,
                "job record missing, could not mark failed",
                claimed,
                &[("error", error.to_string())],
            ),
            Err(e) => self.notify(
                LogLevel::Alert,
                "could not mark job failed",
                claimed,
                &[("error", error.to_string()), ("storage_error", e.to_string())],
            ),
        }
    }

    fn notify(&self, level: LogLevel, message: &str, claimed: &ClaimedJob, extra: &[(&str, String)]) {
        let mut attributes = Vec::with_capacity(extra.len() + 1);
        attributes.push(("job_id", claimed.id().to_string()));
        attributes.extend(extra.iter().cloned());
        self.notifier
            .log(level, message, Some(claimed.request_id), &attributes);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
