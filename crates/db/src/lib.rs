//! Storage gateway for the job queue.
//!
//! - Pool bootstrap: [`create_pool`], [`health_check`], [`run_migrations`]
//! - [`models`]: the `jobs` row and status lookup enum
//! - [`repositories`]: raw SQL, one zero-sized repo per table
//! - [`store`]: the [`JobStore`] trait the worker is written against

use sqlx::postgres::PgPoolOptions;

pub mod error;
pub mod models;
pub mod repositories;
pub mod store;

pub use error::StorageError;
pub use models::job::{ClaimedJob, Job, NewJob};
pub use models::status::{JobStatus, StatusId};
pub use store::{JobStore, MemoryJobStore, PgJobStore, StoreOp};

pub type DbPool = sqlx::PgPool;

/// Default pool size when the caller has no preference.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify connectivity.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), StorageError> {
    sqlx::migrate!("../../db/migrations").run(pool).await?;
    Ok(())
}
