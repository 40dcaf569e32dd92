//! In-memory store and resolver.
//!
//! # Responsibility
//! - Provide `ActivityStore`/`DefinitionResolver` without SQLite, for tests
//!   and embedding.
//!
//! # Invariants
//! - One mutex per map covers each whole read-check-write sequence,
//!   including the single-active re-check on create and the status
//!   compare-and-swap on update.
//! - Handles are cheap clones sharing the same underlying map.

use crate::model::activity::{
    ActivityStatus, EntityId, Realization, RealizationDraft, RealizationId, TenantId,
};
use crate::model::definition::{ActivityDefinition, DefinitionId};
use crate::repo::activity_repo::{ActivityStore, RepoError, RepoResult};
use crate::repo::definition_repo::{normalize_definition_name, DefinitionResolver};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Shared in-memory activity record store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryActivityStore {
    realizations: Arc<Mutex<HashMap<RealizationId, Realization>>>,
}

impl InMemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Records are replaced whole, so a panicking holder cannot leave a
    // half-written entry behind; recovering the guard is safe.
    fn lock(&self) -> MutexGuard<'_, HashMap<RealizationId, Realization>> {
        self.realizations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn active_for(
    realizations: &HashMap<RealizationId, Realization>,
    tenant: TenantId,
    entity_id: EntityId,
) -> Option<&Realization> {
    realizations
        .values()
        .find(|item| item.tenant_id == tenant && item.entity_id == entity_id && item.is_active())
}

impl ActivityStore for InMemoryActivityStore {
    fn create_realization(
        &self,
        tenant: TenantId,
        draft: RealizationDraft,
    ) -> RepoResult<Realization> {
        draft.validate()?;
        let realization = draft.into_realization(Uuid::new_v4(), tenant);

        let mut realizations = self.lock();
        if realization.is_active()
            && active_for(&realizations, tenant, realization.entity_id).is_some()
        {
            return Err(RepoError::ActiveConflict {
                entity_id: realization.entity_id,
            });
        }
        realizations.insert(realization.id, realization.clone());
        Ok(realization)
    }

    fn get_realization(&self, tenant: TenantId, id: RealizationId) -> RepoResult<Realization> {
        self.lock()
            .get(&id)
            .filter(|item| item.tenant_id == tenant)
            .cloned()
            .ok_or(RepoError::NotFound(id))
    }

    fn get_active_by_entity(
        &self,
        tenant: TenantId,
        entity_id: EntityId,
    ) -> RepoResult<Option<Realization>> {
        Ok(active_for(&self.lock(), tenant, entity_id).cloned())
    }

    fn update_realization(
        &self,
        tenant: TenantId,
        realization: &Realization,
        expected: ActivityStatus,
    ) -> RepoResult<()> {
        realization.validate()?;

        let mut realizations = self.lock();
        let busy: HashSet<EntityId> = realizations
            .values()
            .filter(|item| item.tenant_id == tenant && item.is_active())
            .filter(|item| item.id != realization.id)
            .map(|item| item.entity_id)
            .collect();

        let stored = match realizations.get_mut(&realization.id) {
            Some(stored) if stored.tenant_id == tenant => stored,
            _ => return Err(RepoError::NotFound(realization.id)),
        };
        if stored.status != expected {
            return Err(RepoError::StatusMismatch {
                id: realization.id,
                expected,
                actual: stored.status,
            });
        }
        if realization.is_active() && busy.contains(&stored.entity_id) {
            return Err(RepoError::ActiveConflict {
                entity_id: stored.entity_id,
            });
        }

        // Only status and timestamps are mutable; identity fields stay as stored.
        stored.status = realization.status;
        stored.started_at = realization.started_at;
        stored.finished_at = realization.finished_at;
        Ok(())
    }
}

/// Shared in-memory definition resolver.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDefinitionResolver {
    definitions: Arc<Mutex<HashMap<(TenantId, String), ActivityDefinition>>>,
}

impl InMemoryDefinitionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(TenantId, String), ActivityDefinition>> {
        self.definitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl DefinitionResolver for InMemoryDefinitionResolver {
    fn resolve(&self, tenant: TenantId, name: &str) -> RepoResult<ActivityDefinition> {
        let normalized = normalize_definition_name(name)
            .ok_or_else(|| RepoError::InvalidDefinitionName(name.to_string()))?;

        let definition = self
            .lock()
            .entry((tenant, normalized.clone()))
            .or_insert_with(|| ActivityDefinition {
                id: Uuid::new_v4(),
                tenant_id: tenant,
                name: normalized,
                description: None,
                color_code: None,
            })
            .clone();
        Ok(definition)
    }

    fn get_definition(
        &self,
        tenant: TenantId,
        id: DefinitionId,
    ) -> RepoResult<Option<ActivityDefinition>> {
        Ok(self
            .lock()
            .values()
            .find(|item| item.tenant_id == tenant && item.id == id)
            .cloned())
    }

    fn list_definitions(&self, tenant: TenantId) -> RepoResult<Vec<ActivityDefinition>> {
        let mut definitions: Vec<_> = self
            .lock()
            .values()
            .filter(|item| item.tenant_id == tenant)
            .cloned()
            .collect();
        definitions.sort_by(|left, right| left.name.cmp(&right.name).then(left.id.cmp(&right.id)));
        Ok(definitions)
    }
}
