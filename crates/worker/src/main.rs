//! `jobqueue-worker` -- polls the `jobs` table and runs claimed jobs.
//!
//! Configuration comes from the environment (see
//! [`WorkerConfig::from_env`]). Ctrl-C stops every engine at its next
//! loop boundary; jobs already claimed finish first.

use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobqueue_core::{Notifier, TracingNotifier};
use jobqueue_db::PgJobStore;
use jobqueue_worker::{tasks, LogFormat, QueueEngine, RunMode, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    init_tracing(config.log_format);
    tracing::info!(
        concurrency = config.concurrency,
        mode = ?config.mode,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = jobqueue_db::create_pool(&config.database_url, config.max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    jobqueue_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    jobqueue_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Tasks ---
    let registry = Arc::new(tasks::builtin_registry());
    tracing::info!(tasks = ?registry.names(), "Task registry initialised");

    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);

    // --- Shutdown ---
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, finishing in-flight jobs");
            signal_cancel.cancel();
        }
    });

    // --- Engines ---
    let mut engines = JoinSet::new();
    for index in 0..config.concurrency {
        let engine = QueueEngine::new(
            PgJobStore::new(pool.clone()),
            Arc::clone(&registry),
            Arc::clone(&notifier),
            config.engine.clone(),
        )
        .with_label(format!("engine-{index}"));
        let cancel = cancel.clone();
        let mode = config.mode;

        engines.spawn(async move {
            match mode {
                RunMode::Forever => engine.run_forever(&cancel).await,
                RunMode::Bounded { max_iterations } => {
                    engine.run_bounded(max_iterations, &cancel).await
                }
            }
        });
    }

    let mut failure: Option<anyhow::Error> = None;
    while let Some(joined) = engines.join_next().await {
        match joined {
            Ok(Ok(summary)) => {
                tracing::info!(
                    iterations = summary.iterations,
                    completed = summary.completed,
                    failed = summary.failed,
                    stop = ?summary.stop,
                    "Engine finished",
                );
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Engine stopped on infrastructure failure");
                cancel.cancel();
                failure.get_or_insert_with(|| e.into());
            }
            Err(e) => {
                tracing::error!(error = %e, "Engine task aborted");
                cancel.cancel();
                failure.get_or_insert_with(|| anyhow::Error::new(e).context("Engine task aborted"));
            }
        }
    }

    pool.close().await;
    tracing::info!("Worker stopped");

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "jobqueue_worker=info,jobqueue_db=info,jobqueue_core=info".into());

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
