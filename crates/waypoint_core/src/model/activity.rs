//! Activity realization model.
//!
//! # Responsibility
//! - Define one occurrence of an activity performed on an entity.
//! - Provide the status vocabulary and timestamp validation.
//!
//! # Invariants
//! - `started_at` is set iff status is `in_progress` or `completed`.
//! - `finished_at` is set iff status is `completed`.
//! - `started_at <= finished_at` when both are set.

use crate::model::definition::DefinitionId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of an activity realization.
pub type RealizationId = Uuid;
/// Identifier of the dependent entity (e.g. a child) an activity is for.
pub type EntityId = Uuid;
/// Identifier of a caregiver attached to a realization.
pub type CaregiverId = Uuid;

/// Tenant ("family") scope carried explicitly through every store call.
///
/// A newtype rather than an alias so a tenant can never be passed where an
/// entity or record id is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn new(value: Uuid) -> Self {
        Self(value)
    }

    /// Generates a random tenant id. Mostly useful for tests and demos.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for TenantId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl Display for TenantId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an activity realization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    /// Scheduled, not started yet.
    Planned,
    /// Currently happening. At most one per (tenant, entity).
    InProgress,
    /// Finished. Terminal.
    Completed,
    /// Reserved for a future cancel operation. Terminal.
    Cancelled,
}

impl ActivityStatus {
    /// Stable storage/wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "planned" => Some(Self::Planned),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether a record in this status must carry `started_at`.
    pub fn has_started(self) -> bool {
        matches!(self, Self::InProgress | Self::Completed)
    }
}

impl Display for ActivityStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp invariant violations for activity realizations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealizationValidationError {
    /// `started_at` presence does not match `status`.
    StartedAtMismatch { status: ActivityStatus },
    /// `finished_at` presence does not match `status`.
    FinishedAtMismatch { status: ActivityStatus },
    /// `finished_at` is earlier than `started_at`.
    FinishedBeforeStarted { started_at: i64, finished_at: i64 },
}

impl Display for RealizationValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StartedAtMismatch { status } => {
                write!(f, "started_at presence does not match status `{status}`")
            }
            Self::FinishedAtMismatch { status } => {
                write!(f, "finished_at presence does not match status `{status}`")
            }
            Self::FinishedBeforeStarted {
                started_at,
                finished_at,
            } => write!(
                f,
                "finished_at ({finished_at}) must be >= started_at ({started_at})"
            ),
        }
    }
}

impl Error for RealizationValidationError {}

/// One occurrence of an activity performed on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Realization {
    /// Assigned by the store on creation.
    pub id: RealizationId,
    pub tenant_id: TenantId,
    pub definition_id: DefinitionId,
    pub entity_id: EntityId,
    /// Ordered as supplied. Duplicates are legal.
    pub caregiver_ids: Vec<CaregiverId>,
    pub status: ActivityStatus,
    /// Unix epoch milliseconds. Never cleared once set.
    pub started_at: Option<i64>,
    /// Unix epoch milliseconds. Set only for `completed`.
    pub finished_at: Option<i64>,
}

impl Realization {
    /// Checks the timestamp invariants against `status`.
    pub fn validate(&self) -> Result<(), RealizationValidationError> {
        validate_timestamps(self.status, self.started_at, self.finished_at)
    }

    /// Whether this record currently holds the entity.
    pub fn is_active(&self) -> bool {
        self.status == ActivityStatus::InProgress
    }
}

/// Unsaved realization handed to `ActivityStore::create_realization`.
///
/// Carries neither id nor tenant; the store assigns both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealizationDraft {
    pub definition_id: DefinitionId,
    pub entity_id: EntityId,
    pub caregiver_ids: Vec<CaregiverId>,
    pub status: ActivityStatus,
    pub started_at: Option<i64>,
}

impl RealizationDraft {
    /// Draft for a planned record. No timestamps.
    pub fn planned(
        definition_id: DefinitionId,
        entity_id: EntityId,
        caregiver_ids: Vec<CaregiverId>,
    ) -> Self {
        Self {
            definition_id,
            entity_id,
            caregiver_ids,
            status: ActivityStatus::Planned,
            started_at: None,
        }
    }

    /// Draft for a record started without a prior plan.
    pub fn in_progress(
        definition_id: DefinitionId,
        entity_id: EntityId,
        caregiver_ids: Vec<CaregiverId>,
        started_at: i64,
    ) -> Self {
        Self {
            definition_id,
            entity_id,
            caregiver_ids,
            status: ActivityStatus::InProgress,
            started_at: Some(started_at),
        }
    }

    pub fn validate(&self) -> Result<(), RealizationValidationError> {
        validate_timestamps(self.status, self.started_at, None)
    }

    /// Materializes the stored record once the store has assigned identity.
    pub fn into_realization(self, id: RealizationId, tenant_id: TenantId) -> Realization {
        Realization {
            id,
            tenant_id,
            definition_id: self.definition_id,
            entity_id: self.entity_id,
            caregiver_ids: self.caregiver_ids,
            status: self.status,
            started_at: self.started_at,
            finished_at: None,
        }
    }
}

fn validate_timestamps(
    status: ActivityStatus,
    started_at: Option<i64>,
    finished_at: Option<i64>,
) -> Result<(), RealizationValidationError> {
    if started_at.is_some() != status.has_started() {
        return Err(RealizationValidationError::StartedAtMismatch { status });
    }
    if finished_at.is_some() != (status == ActivityStatus::Completed) {
        return Err(RealizationValidationError::FinishedAtMismatch { status });
    }
    if let (Some(started_at), Some(finished_at)) = (started_at, finished_at) {
        if finished_at < started_at {
            return Err(RealizationValidationError::FinishedBeforeStarted {
                started_at,
                finished_at,
            });
        }
    }
    Ok(())
}
