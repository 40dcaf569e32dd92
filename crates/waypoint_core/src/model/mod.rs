//! Activity domain model.
//!
//! # Responsibility
//! - Define the tenant-scoped records the lifecycle engine reads and writes.
//! - Keep status vocabulary and timestamp invariants next to the data.
//!
//! # Invariants
//! - Every record belongs to exactly one `TenantId`.
//! - Records are mutated in place; there is no hard-delete path.

pub mod activity;
pub mod definition;
