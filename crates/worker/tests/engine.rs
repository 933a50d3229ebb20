//! Integration tests for the queue engine against the in-memory store.
//!
//! Covers the claim / execute / finalize cycle end to end:
//! - empty queue, scheduling and claim order
//! - success deletes, failure marks failed, unknown tasks fail the job only
//! - bounded and unbounded loops, cancellation, storage outages
//! - several engines sharing one store never run the same job

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use jobqueue_core::{LogLevel, MemoryNotifier, Notifier, TaskError, TaskRegistry, TaskUnit};
use jobqueue_db::{JobStatus, JobStore, MemoryJobStore, NewJob, StoreOp};
use jobqueue_worker::{tasks, EngineConfig, EngineError, Outcome, QueueEngine, StopReason};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Failing;

#[async_trait]
impl TaskUnit for Failing {
    async fn run(&mut self) -> Result<Option<Value>, TaskError> {
        Err(TaskError::execution("upstream returned 503"))
    }
}

#[derive(Deserialize)]
struct SleepPayload {
    secs: u64,
}

struct Sleeper {
    secs: u64,
}

#[async_trait]
impl TaskUnit for Sleeper {
    async fn run(&mut self) -> Result<Option<Value>, TaskError> {
        tokio::time::sleep(Duration::from_secs(self.secs)).await;
        Ok(None)
    }
}

fn registry() -> Arc<TaskRegistry> {
    let builder = tasks::register_builtin(TaskRegistry::builder())
        .register("fail", |_payload: &Value| Ok(Box::new(Failing) as Box<dyn TaskUnit>))
        .register_typed("sleep", |p: SleepPayload| Ok(Sleeper { secs: p.secs }));
    Arc::new(builder.build())
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_millis(100),
        max_idle_interval: Duration::from_secs(1),
        ..EngineConfig::default()
    }
}

fn engine(
    store: &MemoryJobStore,
    notifier: &Arc<MemoryNotifier>,
    config: EngineConfig,
) -> QueueEngine<MemoryJobStore> {
    let notifier: Arc<dyn Notifier> = notifier.clone();
    QueueEngine::new(store.clone(), registry(), notifier, config)
}

async fn create(store: &MemoryJobStore, task: &str, payload: Value) -> i64 {
    store.create(NewJob::new(task, payload)).await.unwrap()
}

// ---------------------------------------------------------------------------
// run_once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_once_on_empty_queue_reports_no_work_and_mutates_nothing() {
    let store = MemoryJobStore::new();
    store
        .create(NewJob::new("echo", json!({ "message": "later" })).delay(chrono::Duration::hours(1)))
        .await
        .unwrap();
    store
        .create(NewJob::new("echo", json!({ "message": "parked" })).with_status(JobStatus::Failed))
        .await
        .unwrap();
    let before = store.snapshot();
    let notifier = Arc::new(MemoryNotifier::new());

    let outcome = engine(&store, &notifier, fast_config()).run_once().await.unwrap();

    assert_eq!(outcome, Outcome::NoWorkAvailable);
    assert_eq!(store.snapshot(), before);
    assert!(notifier.entries().iter().any(|e| e.message == "no jobs to fetch"));
}

#[tokio::test]
async fn echo_job_completes_and_is_deleted() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    let id = create(&store, "echo", json!({ "message": "hi" })).await;

    let outcome = engine(&store, &notifier, fast_config()).run_once().await.unwrap();

    let request_id = assert_matches!(
        outcome,
        Outcome::JobCompleted { job_id, request_id, data } => {
            assert_eq!(job_id, id);
            assert_eq!(data, Some(json!({ "message": "hi" })));
            request_id
        }
    );
    assert!(store.find_by_id(id).await.unwrap().is_none());

    let completed: Vec<_> = notifier
        .at_level(LogLevel::Info)
        .into_iter()
        .filter(|e| e.message == "successfully completed job")
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].correlation_id, Some(request_id));
    assert_eq!(completed[0].attribute("job_id"), Some(id.to_string().as_str()));

    // Every line of this cycle carries the same correlation id.
    assert!(notifier
        .entries()
        .iter()
        .all(|e| e.correlation_id == Some(request_id)));
}

#[tokio::test]
async fn unregistered_task_fails_the_job_not_the_engine() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    let id = create(&store, "unregistered_task", json!({})).await;
    let next = create(&store, "echo", json!({ "message": "still running" })).await;
    let engine = engine(&store, &notifier, fast_config());

    let outcome = engine.run_once().await.unwrap();
    let error = assert_matches!(outcome, Outcome::JobFailed { job_id, error, .. } if job_id == id => error);
    assert!(error.contains("task construction"), "{error}");

    let job = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.job_status().unwrap(), JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("task construction"));
    assert!(notifier
        .at_level(LogLevel::Alert)
        .iter()
        .any(|e| e.message == "task construction failed"));

    assert_matches!(
        engine.run_once().await.unwrap(),
        Outcome::JobCompleted { job_id, .. } if job_id == next
    );
}

#[tokio::test]
async fn failing_task_leaves_failed_record_with_error() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    let id = create(&store, "fail", json!({})).await;

    let outcome = engine(&store, &notifier, fast_config()).run_once().await.unwrap();

    assert_matches!(outcome, Outcome::JobFailed { ref error, .. } if error == "run failed: upstream returned 503");
    let job = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.job_status().unwrap(), JobStatus::Failed);
    assert!(!job.error_message.unwrap().is_empty());

    let alert = notifier
        .at_level(LogLevel::Alert)
        .into_iter()
        .find(|e| e.message == "error running job")
        .expect("failure is reported at alert level");
    assert_eq!(alert.attribute("error"), Some("run failed: upstream returned 503"));
}

#[tokio::test]
async fn invalid_payload_fails_construction() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    create(&store, "echo", json!({ "msg": "wrong key" })).await;

    let outcome = engine(&store, &notifier, fast_config()).run_once().await.unwrap();

    assert_matches!(outcome, Outcome::JobFailed { ref error, .. } if error.starts_with("task construction failed"));
    assert_eq!(store.count_by_status(JobStatus::Failed), 1);
}

#[tokio::test]
async fn future_job_is_not_claimed() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    store
        .create(
            NewJob::new("echo", json!({ "message": "hi" }))
                .scheduled_at(Utc::now() + chrono::Duration::seconds(3600)),
        )
        .await
        .unwrap();

    let outcome = engine(&store, &notifier, fast_config()).run_once().await.unwrap();

    assert_eq!(outcome, Outcome::NoWorkAvailable);
    assert_eq!(store.count_by_status(JobStatus::Pending), 1);
}

#[tokio::test]
async fn earlier_schedule_is_claimed_first() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    let t = Utc::now() - chrono::Duration::seconds(60);
    let second = store
        .create(NewJob::new("echo", json!({ "message": "second" })).scheduled_at(t + chrono::Duration::seconds(10)))
        .await
        .unwrap();
    let first = store
        .create(NewJob::new("echo", json!({ "message": "first" })).scheduled_at(t))
        .await
        .unwrap();
    let engine = engine(&store, &notifier, fast_config());

    assert_matches!(engine.run_once().await.unwrap(), Outcome::JobCompleted { job_id, .. } if job_id == first);
    assert_matches!(engine.run_once().await.unwrap(), Outcome::JobCompleted { job_id, .. } if job_id == second);
}

#[tokio::test]
async fn claim_failure_is_returned_to_caller() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    create(&store, "echo", json!({ "message": "hi" })).await;
    store.set_failing(StoreOp::Claim, true);

    let result = engine(&store, &notifier, fast_config()).run_once().await;

    assert!(result.is_err());
    assert_eq!(store.count_by_status(JobStatus::Pending), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_task_hits_configured_timeout() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    create(&store, "sleep", json!({ "secs": 600 })).await;
    let config = EngineConfig {
        task_timeout: Some(Duration::from_secs(2)),
        ..fast_config()
    };

    let outcome = engine(&store, &notifier, config).run_once().await.unwrap();

    assert_matches!(outcome, Outcome::JobFailed { ref error, .. } if error == "run failed: task timed out after 2s");
}

// ---------------------------------------------------------------------------
// run_bounded
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bounded_run_stops_at_iteration_limit() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    for i in 0..5 {
        create(&store, "echo", json!({ "message": format!("job {i}") })).await;
    }
    create(&store, "fail", json!({})).await;

    let summary = engine(&store, &notifier, fast_config())
        .run_bounded(3, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.stop, StopReason::IterationLimit);
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn bounded_run_stops_when_drained() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    create(&store, "echo", json!({ "message": "a" })).await;
    create(&store, "fail", json!({})).await;

    let summary = engine(&store, &notifier, fast_config())
        .run_bounded(100, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.stop, StopReason::Drained);
    assert_eq!(store.count_by_status(JobStatus::Failed), 1);
}

#[tokio::test]
async fn cancelled_token_stops_before_claiming() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    create(&store, "echo", json!({ "message": "hi" })).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = engine(&store, &notifier, fast_config())
        .run_bounded(10, &cancel)
        .await
        .unwrap();

    assert_eq!(summary.iterations, 0);
    assert_eq!(summary.stop, StopReason::Cancelled);
    assert_eq!(store.count_by_status(JobStatus::Pending), 1);
}

// ---------------------------------------------------------------------------
// run_forever
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn forever_run_idles_and_picks_up_new_work() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    let cancel = CancellationToken::new();
    let engine = engine(&store, &notifier, fast_config());

    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run_forever(&cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(5)).await;
    let id = create(&store, "echo", json!({ "message": "late arrival" })).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.cancel();

    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.stop, StopReason::Cancelled);
    assert!(summary.iterations > 2);
    assert!(store.find_by_id(id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn in_flight_job_finishes_before_cancellation_is_observed() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    let cancel = CancellationToken::new();
    let id = create(&store, "sleep", json!({ "secs": 30 })).await;
    let engine = engine(&store, &notifier, fast_config());

    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run_forever(&cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();

    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.stop, StopReason::Cancelled);
    assert!(store.find_by_id(id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn persistent_storage_failure_stops_loop_with_alert() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    store.set_failing(StoreOp::Claim, true);
    let config = EngineConfig {
        max_storage_failures: 3,
        ..fast_config()
    };

    let result = engine(&store, &notifier, config)
        .run_forever(&CancellationToken::new())
        .await;

    assert_matches!(result, Err(EngineError::StorageUnavailable { attempts: 3, .. }));
    let alerts = notifier.at_level(LogLevel::Alert);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].message, "storage unavailable, stopping engine");
    assert_eq!(notifier.at_level(LogLevel::Warn).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn transient_storage_failure_is_retried() {
    let store = MemoryJobStore::new();
    let notifier = Arc::new(MemoryNotifier::new());
    let cancel = CancellationToken::new();
    create(&store, "echo", json!({ "message": "hi" })).await;
    store.set_failing(StoreOp::Claim, true);
    let engine = engine(&store, &notifier, fast_config());

    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run_forever(&cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(250)).await;
    store.set_failing(StoreOp::Claim, false);
    tokio::time::sleep(Duration::from_secs(3)).await;
    cancel.cancel();

    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.completed, 1);
    assert!(store.is_empty());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tracker {
    in_flight: Mutex<HashSet<u64>>,
    executed: Mutex<Vec<u64>>,
    overlaps: AtomicUsize,
}

#[derive(Deserialize)]
struct TrackedPayload {
    n: u64,
}

struct Tracked {
    n: u64,
    tracker: Arc<Tracker>,
}

#[async_trait]
impl TaskUnit for Tracked {
    async fn run(&mut self) -> Result<Option<Value>, TaskError> {
        if !self.tracker.in_flight.lock().unwrap().insert(self.n) {
            self.tracker.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::task::yield_now().await;
        self.tracker.executed.lock().unwrap().push(self.n);
        self.tracker.in_flight.lock().unwrap().remove(&self.n);
        Ok(None)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_engines_never_run_the_same_job() {
    const JOBS: u64 = 200;

    let store = MemoryJobStore::new();
    for n in 0..JOBS {
        store.create(NewJob::new("tracked", json!({ "n": n }))).await.unwrap();
    }

    let tracker = Arc::new(Tracker::default());
    let registry = {
        let tracker = Arc::clone(&tracker);
        Arc::new(
            TaskRegistry::builder()
                .register_typed("tracked", move |p: TrackedPayload| {
                    Ok(Tracked {
                        n: p.n,
                        tracker: Arc::clone(&tracker),
                    })
                })
                .build(),
        )
    };
    let notifier: Arc<dyn Notifier> = Arc::new(MemoryNotifier::new());

    let mut handles = Vec::new();
    for i in 0..6 {
        let engine = QueueEngine::new(
            store.clone(),
            Arc::clone(&registry),
            Arc::clone(&notifier),
            fast_config(),
        )
        .with_label(format!("engine-{i}"));
        handles.push(tokio::spawn(async move {
            engine.run_bounded(JOBS, &CancellationToken::new()).await
        }));
    }

    let mut completed = 0;
    for handle in handles {
        completed += handle.await.unwrap().unwrap().completed;
    }

    let executed = tracker.executed.lock().unwrap().clone();
    let distinct: HashSet<u64> = executed.iter().copied().collect();
    assert_eq!(completed, JOBS);
    assert_eq!(executed.len() as u64, JOBS);
    assert_eq!(distinct.len() as u64, JOBS);
    assert_eq!(tracker.overlaps.load(Ordering::SeqCst), 0);
    assert!(store.is_empty());
}
