//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define tenant-scoped data access contracts for realizations and definitions.
//! - Isolate SQLite query details from lifecycle orchestration.
//! - Provide in-memory implementations with the same contracts.
//!
//! # Invariants
//! - Every read and write takes an explicit `TenantId`; rows of other tenants
//!   are indistinguishable from missing rows.
//! - Write paths validate realization timestamps before persistence.

pub mod activity_repo;
pub mod definition_repo;
pub mod memory;
