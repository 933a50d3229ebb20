use crate::models::status::StatusId;

/// Failures of the storage gateway.
///
/// Job-level callers treat these as a failed lifecycle stage; only the
/// engine's own claim path escalates them.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Unknown job status id: {0}")]
    UnknownStatus(StatusId),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}
