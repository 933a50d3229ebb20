//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument. Every value reaches SQL as a
//! bind parameter.

pub mod job_repo;

pub use job_repo::JobRepo;
