//! Domain model structs and DTOs.
//!
//! - [`job`]: the `jobs` row, the insert DTO, and the claimed-job wrapper
//! - [`status`]: enums mapping to SMALLINT lookup tables

pub mod job;
pub mod status;
