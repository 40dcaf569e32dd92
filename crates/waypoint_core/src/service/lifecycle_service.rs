//! Activity lifecycle use-case service.
//!
//! # Responsibility
//! - Drive realizations through `planned -> in_progress -> completed`.
//! - Enforce one `in_progress` realization per (tenant, entity).
//! - Translate repository failures into a closed set of failure kinds.
//!
//! # Invariants
//! - Plan is never blocked by an active realization.
//! - Both start forms check the entity is idle before writing; the store's
//!   own single-active constraint settles races between concurrent starts.
//! - Complete requires status exactly `in_progress`.
//! - Transitions write with the status they read as the expected prior
//!   status; of several racing transitions on one record only the first
//!   applies and the rest report `InvalidState`.
//! - The service holds no records between calls.

use crate::model::activity::{
    ActivityStatus, CaregiverId, EntityId, Realization, RealizationDraft, RealizationId, TenantId,
};
use crate::model::definition::{ActivityDefinition, DefinitionId};
use crate::repo::activity_repo::{ActivityStore, RepoError};
use crate::repo::definition_repo::{normalize_definition_name, DefinitionResolver};
use crate::service::clock::{Clock, SystemClock};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

const MISSING_DEFINITION_MESSAGE: &str =
    "either definition id or new definition name must be provided";

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Failure kinds adapters dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or incomplete command. Not retried.
    InvalidInput,
    /// Referenced record does not exist for the caller's tenant.
    NotFound,
    /// Transition is illegal from the current status. Not retried.
    InvalidState,
    /// Entity already has an activity in progress. Retry later.
    Conflict,
    /// Storage failed independent of business rules.
    StoreUnavailable,
}

/// Lifecycle operation failure.
#[derive(Debug)]
pub enum LifecycleError {
    InvalidInput(String),
    RealizationNotFound(RealizationId),
    DefinitionNotFound(DefinitionId),
    InvalidState {
        action: &'static str,
        status: ActivityStatus,
    },
    /// `active_id` is known when the read-side check caught the conflict and
    /// unknown when the store's constraint did.
    EntityBusy {
        entity_id: EntityId,
        active_id: Option<RealizationId>,
    },
    Store(RepoError),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::RealizationNotFound(_) | Self::DefinitionNotFound(_) => ErrorKind::NotFound,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::EntityBusy { .. } => ErrorKind::Conflict,
            Self::Store(_) => ErrorKind::StoreUnavailable,
        }
    }

    /// Stable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::RealizationNotFound(_) => "realization_not_found",
            Self::DefinitionNotFound(_) => "definition_not_found",
            Self::InvalidState { .. } => "invalid_state",
            Self::EntityBusy { .. } => "entity_busy",
            Self::Store(_) => "store_unavailable",
        }
    }
}

impl Display for LifecycleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(message) => f.write_str(message),
            Self::RealizationNotFound(id) => write!(f, "activity realization not found: {id}"),
            Self::DefinitionNotFound(id) => write!(f, "activity definition not found: {id}"),
            Self::InvalidState { action, status } => {
                write!(f, "cannot {action} activity: current status is {status}")
            }
            Self::EntityBusy { entity_id, .. } => {
                write!(f, "entity {entity_id} is already participating in an activity")
            }
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LifecycleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for LifecycleError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::RealizationNotFound(id),
            RepoError::ActiveConflict { entity_id } => Self::EntityBusy {
                entity_id,
                active_id: None,
            },
            RepoError::InvalidDefinitionName(_) => {
                Self::InvalidInput(MISSING_DEFINITION_MESSAGE.to_string())
            }
            other => Self::Store(other),
        }
    }
}

/// Which definition a new realization refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionRef {
    /// Existing definition of the caller's tenant.
    Id(DefinitionId),
    /// Name resolved (and created on first use) through the resolver.
    Name(String),
}

impl DefinitionRef {
    /// Builds a reference from optional command fields.
    ///
    /// The id wins when both are present. A blank name counts as absent.
    pub fn from_parts(id: Option<DefinitionId>, name: Option<&str>) -> LifecycleResult<Self> {
        if let Some(id) = id {
            return Ok(Self::Id(id));
        }
        name.and_then(normalize_definition_name)
            .map(Self::Name)
            .ok_or_else(|| LifecycleError::InvalidInput(MISSING_DEFINITION_MESSAGE.to_string()))
    }
}

/// Input for planning, or for starting without a prior plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityCommand {
    pub entity_id: EntityId,
    pub definition_id: Option<DefinitionId>,
    /// Used only when `definition_id` is absent.
    pub definition_name: Option<String>,
    pub caregiver_ids: Vec<CaregiverId>,
}

impl ActivityCommand {
    pub fn for_definition(entity_id: EntityId, definition_id: DefinitionId) -> Self {
        Self {
            entity_id,
            definition_id: Some(definition_id),
            ..Self::default()
        }
    }

    pub fn for_name(entity_id: EntityId, name: impl Into<String>) -> Self {
        Self {
            entity_id,
            definition_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_caregivers(mut self, caregiver_ids: Vec<CaregiverId>) -> Self {
        self.caregiver_ids = caregiver_ids;
        self
    }

    pub fn definition_ref(&self) -> LifecycleResult<DefinitionRef> {
        DefinitionRef::from_parts(self.definition_id, self.definition_name.as_deref())
    }
}

/// Input for starting an activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartCommand {
    /// Start a previously planned realization.
    Planned { realization_id: RealizationId },
    /// Start a new realization with no prior plan.
    Fresh(ActivityCommand),
}

impl StartCommand {
    /// Picks the start form from decoded request fields; a realization id wins.
    pub fn from_parts(realization_id: Option<RealizationId>, activity: ActivityCommand) -> Self {
        match realization_id {
            Some(realization_id) => Self::Planned { realization_id },
            None => Self::Fresh(activity),
        }
    }
}

/// Lifecycle engine over a record store and a definition resolver.
pub struct ActivityService<S, D, C = SystemClock> {
    store: S,
    resolver: D,
    clock: C,
}

impl<S: ActivityStore, D: DefinitionResolver> ActivityService<S, D, SystemClock> {
    /// Creates a service stamping transitions with wall-clock time.
    pub fn new(store: S, resolver: D) -> Self {
        Self::with_clock(store, resolver, SystemClock)
    }
}

impl<S: ActivityStore, D: DefinitionResolver, C: Clock> ActivityService<S, D, C> {
    pub fn with_clock(store: S, resolver: D, clock: C) -> Self {
        Self {
            store,
            resolver,
            clock,
        }
    }

    /// Creates a `planned` realization. Never blocked by an active one.
    ///
    /// # Errors
    /// - `InvalidInput` when neither definition id nor name is given.
    /// - `DefinitionNotFound` when the id is not a definition of `tenant`.
    pub fn plan_activity(
        &self,
        tenant: TenantId,
        command: &ActivityCommand,
    ) -> LifecycleResult<Realization> {
        let result = command.definition_ref().and_then(|reference| {
            let definition_id = self.resolve_definition_id(tenant, &reference)?;
            let draft = RealizationDraft::planned(
                definition_id,
                command.entity_id,
                command.caregiver_ids.clone(),
            );
            Ok(self.store.create_realization(tenant, draft)?)
        });
        log_outcome("activity_plan", tenant, &result);
        result
    }

    /// Moves a realization to `in_progress`, creating it for the fresh form.
    ///
    /// # Errors
    /// - `RealizationNotFound` when the planned id is unknown for `tenant`.
    /// - `InvalidState` when the planned record is no longer `planned`.
    /// - `EntityBusy` when the entity already has an activity in progress.
    /// - `InvalidInput`/`DefinitionNotFound` for the fresh form, as in plan.
    pub fn start_activity(
        &self,
        tenant: TenantId,
        command: &StartCommand,
    ) -> LifecycleResult<Realization> {
        let result = match command {
            StartCommand::Planned { realization_id } => {
                self.start_planned(tenant, *realization_id)
            }
            StartCommand::Fresh(activity) => self.start_fresh(tenant, activity),
        };
        log_outcome("activity_start", tenant, &result);
        result
    }

    /// Moves an `in_progress` realization to `completed`.
    ///
    /// # Errors
    /// - `RealizationNotFound` when the id is unknown for `tenant`.
    /// - `InvalidState` when the record is not `in_progress`.
    pub fn complete_activity(
        &self,
        tenant: TenantId,
        realization_id: RealizationId,
    ) -> LifecycleResult<Realization> {
        let result = self.complete(tenant, realization_id);
        log_outcome("activity_complete", tenant, &result);
        result
    }

    /// Gets one realization of `tenant`.
    pub fn get_activity(
        &self,
        tenant: TenantId,
        realization_id: RealizationId,
    ) -> LifecycleResult<Realization> {
        Ok(self.store.get_realization(tenant, realization_id)?)
    }

    /// Lists the definitions of `tenant` sorted by name.
    pub fn list_definitions(&self, tenant: TenantId) -> LifecycleResult<Vec<ActivityDefinition>> {
        Ok(self.resolver.list_definitions(tenant)?)
    }

    fn start_planned(
        &self,
        tenant: TenantId,
        realization_id: RealizationId,
    ) -> LifecycleResult<Realization> {
        let mut realization = self.store.get_realization(tenant, realization_id)?;
        if realization.status != ActivityStatus::Planned {
            return Err(LifecycleError::InvalidState {
                action: "start",
                status: realization.status,
            });
        }
        match self.store.get_active_by_entity(tenant, realization.entity_id)? {
            // A concurrent start of this same record won between the reads.
            Some(active) if active.id == realization.id => {
                return Err(LifecycleError::InvalidState {
                    action: "start",
                    status: active.status,
                });
            }
            Some(active) => {
                return Err(LifecycleError::EntityBusy {
                    entity_id: realization.entity_id,
                    active_id: Some(active.id),
                });
            }
            None => {}
        }

        realization.status = ActivityStatus::InProgress;
        realization.started_at = Some(self.clock.now_ms());
        self.store
            .update_realization(tenant, &realization, ActivityStatus::Planned)
            .map_err(|err| transition_error("start", err))?;
        Ok(realization)
    }

    fn start_fresh(
        &self,
        tenant: TenantId,
        command: &ActivityCommand,
    ) -> LifecycleResult<Realization> {
        let reference = command.definition_ref()?;
        // Checked before resolving so a rejected start creates no definition.
        self.ensure_entity_idle(tenant, command.entity_id)?;
        let definition_id = self.resolve_definition_id(tenant, &reference)?;

        let draft = RealizationDraft::in_progress(
            definition_id,
            command.entity_id,
            command.caregiver_ids.clone(),
            self.clock.now_ms(),
        );
        Ok(self.store.create_realization(tenant, draft)?)
    }

    fn complete(
        &self,
        tenant: TenantId,
        realization_id: RealizationId,
    ) -> LifecycleResult<Realization> {
        let mut realization = self.store.get_realization(tenant, realization_id)?;
        if realization.status != ActivityStatus::InProgress {
            return Err(LifecycleError::InvalidState {
                action: "complete",
                status: realization.status,
            });
        }

        let now = self.clock.now_ms();
        realization.status = ActivityStatus::Completed;
        // Never earlier than the start, even if the clock stepped back.
        let finished_at = realization
            .started_at
            .map_or(now, |started_at| now.max(started_at));
        realization.finished_at = Some(finished_at);
        self.store
            .update_realization(tenant, &realization, ActivityStatus::InProgress)
            .map_err(|err| transition_error("complete", err))?;
        Ok(realization)
    }

    fn ensure_entity_idle(&self, tenant: TenantId, entity_id: EntityId) -> LifecycleResult<()> {
        match self.store.get_active_by_entity(tenant, entity_id)? {
            Some(active) => Err(LifecycleError::EntityBusy {
                entity_id,
                active_id: Some(active.id),
            }),
            None => Ok(()),
        }
    }

    fn resolve_definition_id(
        &self,
        tenant: TenantId,
        reference: &DefinitionRef,
    ) -> LifecycleResult<DefinitionId> {
        match reference {
            DefinitionRef::Id(id) => self
                .resolver
                .get_definition(tenant, *id)?
                .map(|definition| definition.id)
                .ok_or(LifecycleError::DefinitionNotFound(*id)),
            DefinitionRef::Name(name) => Ok(self.resolver.resolve(tenant, name)?.id),
        }
    }
}

/// Reports a lost status compare-and-swap as the state the record moved to.
fn transition_error(action: &'static str, err: RepoError) -> LifecycleError {
    match err {
        RepoError::StatusMismatch { actual, .. } => LifecycleError::InvalidState {
            action,
            status: actual,
        },
        other => other.into(),
    }
}

fn log_outcome(event: &str, tenant: TenantId, result: &LifecycleResult<Realization>) {
    match result {
        Ok(realization) => info!(
            "event={event} module=lifecycle status=ok tenant={tenant} realization={} entity={} activity_status={}",
            realization.id, realization.entity_id, realization.status
        ),
        Err(err @ LifecycleError::Store(_)) => error!(
            "event={event} module=lifecycle status=error tenant={tenant} error_code={} error={err}",
            err.code()
        ),
        Err(err) => warn!(
            "event={event} module=lifecycle status=rejected tenant={tenant} error_code={}",
            err.code()
        ),
    }
}
