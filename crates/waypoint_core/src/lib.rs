//! Activity lifecycle core for Waypoint.
//! This crate is the single source of truth for activity state rules and
//! tenant isolation; boundary adapters only decode commands and render results.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status, LogConfig, LoggingError};
pub use model::activity::{
    ActivityStatus, CaregiverId, EntityId, Realization, RealizationDraft, RealizationId,
    RealizationValidationError, TenantId,
};
pub use model::definition::{ActivityDefinition, DefinitionId};
pub use repo::activity_repo::{ActivityStore, RepoError, RepoResult, SqliteActivityStore};
pub use repo::definition_repo::{
    normalize_definition_name, DefinitionResolver, SqliteDefinitionRepository,
};
pub use repo::memory::{InMemoryActivityStore, InMemoryDefinitionResolver};
pub use service::clock::{Clock, FixedClock, SystemClock};
pub use service::lifecycle_service::{
    ActivityCommand, ActivityService, DefinitionRef, ErrorKind, LifecycleError, LifecycleResult,
    StartCommand,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
