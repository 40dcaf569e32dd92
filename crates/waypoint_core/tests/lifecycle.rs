use rusqlite::Connection;
use uuid::Uuid;
use waypoint_core::db::open_db_in_memory;
use waypoint_core::{
    ActivityCommand, ActivityService, ActivityStatus, ActivityStore, DefinitionResolver, ErrorKind,
    FixedClock, InMemoryActivityStore, InMemoryDefinitionResolver, LifecycleError,
    SqliteActivityStore, SqliteDefinitionRepository, StartCommand, TenantId,
};

type SqliteService<'conn> = ActivityService<
    SqliteActivityStore<'conn>,
    SqliteDefinitionRepository<'conn>,
    FixedClock,
>;

fn sqlite_service<'conn>(conn: &'conn Connection, clock: &FixedClock) -> SqliteService<'conn> {
    ActivityService::with_clock(
        SqliteActivityStore::try_new(conn).unwrap(),
        SqliteDefinitionRepository::try_new(conn).unwrap(),
        clock.clone(),
    )
}

fn memory_service(
    clock: &FixedClock,
) -> ActivityService<InMemoryActivityStore, InMemoryDefinitionResolver, FixedClock> {
    ActivityService::with_clock(
        InMemoryActivityStore::new(),
        InMemoryDefinitionResolver::new(),
        clock.clone(),
    )
}

fn start_planned(realization_id: Uuid) -> StartCommand {
    StartCommand::Planned { realization_id }
}

fn start_fresh(entity_id: Uuid, name: &str) -> StartCommand {
    StartCommand::Fresh(ActivityCommand::for_name(entity_id, name))
}

/// Runs one scenario against both store backends.
macro_rules! both_backends {
    ($scenario:ident) => {
        mod $scenario {
            use super::*;

            #[test]
            fn sqlite() {
                let conn = open_db_in_memory().unwrap();
                let clock = FixedClock::new(1_000);
                super::$scenario(&sqlite_service(&conn, &clock), &clock);
            }

            #[test]
            fn in_memory() {
                let clock = FixedClock::new(1_000);
                super::$scenario(&memory_service(&clock), &clock);
            }
        }
    };
}

fn plan_start_complete<S: ActivityStore, D: DefinitionResolver>(
    service: &ActivityService<S, D, FixedClock>,
    clock: &FixedClock,
) {
    let tenant = TenantId::new_v4();
    let entity = Uuid::new_v4();
    let caregivers = vec![Uuid::new_v4(), Uuid::new_v4()];

    let planned = service
        .plan_activity(
            tenant,
            &ActivityCommand::for_name(entity, "Nap").with_caregivers(caregivers.clone()),
        )
        .unwrap();
    assert_eq!(planned.status, ActivityStatus::Planned);
    assert_eq!(planned.started_at, None);
    assert_eq!(planned.finished_at, None);
    assert_eq!(planned.caregiver_ids, caregivers);

    clock.set(2_000);
    let started = service
        .start_activity(tenant, &start_planned(planned.id))
        .unwrap();
    assert_eq!(started.id, planned.id);
    assert_eq!(started.status, ActivityStatus::InProgress);
    assert_eq!(started.started_at, Some(2_000));

    clock.set(5_000);
    let completed = service.complete_activity(tenant, planned.id).unwrap();
    assert_eq!(completed.status, ActivityStatus::Completed);
    assert_eq!(completed.started_at, Some(2_000));
    assert_eq!(completed.finished_at, Some(5_000));

    let stored = service.get_activity(tenant, planned.id).unwrap();
    assert_eq!(stored, completed);
    assert_eq!(stored.caregiver_ids, caregivers);
}
both_backends!(plan_start_complete);

fn fresh_start_conflicts_while_entity_busy<S: ActivityStore, D: DefinitionResolver>(
    service: &ActivityService<S, D, FixedClock>,
    _clock: &FixedClock,
) {
    let tenant = TenantId::new_v4();
    let entity = Uuid::new_v4();

    let active = service
        .start_activity(tenant, &start_fresh(entity, "Nap"))
        .unwrap();
    assert_eq!(active.status, ActivityStatus::InProgress);

    let err = service
        .start_activity(tenant, &start_fresh(entity, "Sport"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(matches!(
        err,
        LifecycleError::EntityBusy { entity_id, active_id: Some(id) }
            if entity_id == entity && id == active.id
    ));

    // Rejected before resolution: no "Sport" definition was created either.
    let names: Vec<_> = service
        .list_definitions(tenant)
        .unwrap()
        .into_iter()
        .map(|definition| definition.name)
        .collect();
    assert_eq!(names, vec!["Nap"]);
}
both_backends!(fresh_start_conflicts_while_entity_busy);

fn planned_start_conflicts_while_other_record_active<S: ActivityStore, D: DefinitionResolver>(
    service: &ActivityService<S, D, FixedClock>,
    _clock: &FixedClock,
) {
    let tenant = TenantId::new_v4();
    let entity = Uuid::new_v4();

    let planned = service
        .plan_activity(tenant, &ActivityCommand::for_name(entity, "Sleep"))
        .unwrap();
    service
        .start_activity(tenant, &start_fresh(entity, "Nap"))
        .unwrap();

    let err = service
        .start_activity(tenant, &start_planned(planned.id))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let unchanged = service.get_activity(tenant, planned.id).unwrap();
    assert_eq!(unchanged.status, ActivityStatus::Planned);
    assert_eq!(unchanged.started_at, None);
}
both_backends!(planned_start_conflicts_while_other_record_active);

fn planning_is_never_blocked<S: ActivityStore, D: DefinitionResolver>(
    service: &ActivityService<S, D, FixedClock>,
    _clock: &FixedClock,
) {
    let tenant = TenantId::new_v4();
    let entity = Uuid::new_v4();

    service
        .start_activity(tenant, &start_fresh(entity, "Sport"))
        .unwrap();
    let planned = service
        .plan_activity(tenant, &ActivityCommand::for_name(entity, "Sleep"))
        .unwrap();
    assert_eq!(planned.status, ActivityStatus::Planned);
    assert_eq!(planned.started_at, None);
}
both_backends!(planning_is_never_blocked);

fn complete_requires_in_progress<S: ActivityStore, D: DefinitionResolver>(
    service: &ActivityService<S, D, FixedClock>,
    _clock: &FixedClock,
) {
    let tenant = TenantId::new_v4();
    let entity = Uuid::new_v4();

    let planned = service
        .plan_activity(tenant, &ActivityCommand::for_name(entity, "Nap"))
        .unwrap();
    let err = service.complete_activity(tenant, planned.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(
        err.to_string(),
        "cannot complete activity: current status is planned"
    );
    assert_eq!(service.get_activity(tenant, planned.id).unwrap(), planned);

    service
        .start_activity(tenant, &start_planned(planned.id))
        .unwrap();
    service.complete_activity(tenant, planned.id).unwrap();

    let again = service.complete_activity(tenant, planned.id).unwrap_err();
    assert_eq!(
        again.to_string(),
        "cannot complete activity: current status is completed"
    );
}
both_backends!(complete_requires_in_progress);

fn start_requires_planned<S: ActivityStore, D: DefinitionResolver>(
    service: &ActivityService<S, D, FixedClock>,
    _clock: &FixedClock,
) {
    let tenant = TenantId::new_v4();
    let entity = Uuid::new_v4();

    let active = service
        .start_activity(tenant, &start_fresh(entity, "Nap"))
        .unwrap();
    let err = service
        .start_activity(tenant, &start_planned(active.id))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(
        err.to_string(),
        "cannot start activity: current status is in_progress"
    );

    service.complete_activity(tenant, active.id).unwrap();
    let err = service
        .start_activity(tenant, &start_planned(active.id))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot start activity: current status is completed"
    );
}
both_backends!(start_requires_planned);

fn entity_is_free_again_after_completion<S: ActivityStore, D: DefinitionResolver>(
    service: &ActivityService<S, D, FixedClock>,
    _clock: &FixedClock,
) {
    let tenant = TenantId::new_v4();
    let entity = Uuid::new_v4();

    let first = service
        .start_activity(tenant, &start_fresh(entity, "Nap"))
        .unwrap();
    service.complete_activity(tenant, first.id).unwrap();

    let second = service
        .start_activity(tenant, &start_fresh(entity, "Nap"))
        .unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.definition_id, first.definition_id);
}
both_backends!(entity_is_free_again_after_completion);

fn missing_definition_is_invalid_input<S: ActivityStore, D: DefinitionResolver>(
    service: &ActivityService<S, D, FixedClock>,
    _clock: &FixedClock,
) {
    let tenant = TenantId::new_v4();
    let entity = Uuid::new_v4();
    let command = ActivityCommand {
        entity_id: entity,
        ..ActivityCommand::default()
    };

    let err = service.plan_activity(tenant, &command).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(
        err.to_string(),
        "either definition id or new definition name must be provided"
    );

    let err = service
        .start_activity(tenant, &StartCommand::Fresh(command))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    assert!(service.list_definitions(tenant).unwrap().is_empty());
    assert!(service
        .start_activity(tenant, &start_fresh(entity, "Nap"))
        .is_ok());
}
both_backends!(missing_definition_is_invalid_input);

fn definition_id_is_authoritative<S: ActivityStore, D: DefinitionResolver>(
    service: &ActivityService<S, D, FixedClock>,
    _clock: &FixedClock,
) {
    let tenant = TenantId::new_v4();
    let entity = Uuid::new_v4();

    let nap = service
        .plan_activity(tenant, &ActivityCommand::for_name(entity, "Nap"))
        .unwrap();
    let command = ActivityCommand {
        definition_name: Some("Sport".to_string()),
        ..ActivityCommand::for_definition(entity, nap.definition_id)
    };

    let planned = service.plan_activity(tenant, &command).unwrap();
    assert_eq!(planned.definition_id, nap.definition_id);
    assert_eq!(service.list_definitions(tenant).unwrap().len(), 1);

    let unknown = Uuid::new_v4();
    let err = service
        .plan_activity(tenant, &ActivityCommand::for_definition(entity, unknown))
        .unwrap_err();
    assert!(matches!(err, LifecycleError::DefinitionNotFound(id) if id == unknown));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
both_backends!(definition_id_is_authoritative);

fn tenants_are_isolated<S: ActivityStore, D: DefinitionResolver>(
    service: &ActivityService<S, D, FixedClock>,
    _clock: &FixedClock,
) {
    let owner = TenantId::new_v4();
    let intruder = TenantId::new_v4();
    let entity = Uuid::new_v4();

    let planned = service
        .plan_activity(owner, &ActivityCommand::for_name(entity, "Nap"))
        .unwrap();
    let active = service
        .start_activity(owner, &start_fresh(Uuid::new_v4(), "Sport"))
        .unwrap();

    for err in [
        service.get_activity(intruder, planned.id).unwrap_err(),
        service
            .start_activity(intruder, &start_planned(planned.id))
            .unwrap_err(),
        service.complete_activity(intruder, active.id).unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    // The owner's definition id is invisible to the intruder.
    let err = service
        .plan_activity(
            intruder,
            &ActivityCommand::for_definition(entity, planned.definition_id),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // The owner's active record does not block the same entity id elsewhere.
    assert!(service
        .start_activity(intruder, &start_fresh(active.entity_id, "Sport"))
        .is_ok());

    assert_eq!(
        service.get_activity(owner, planned.id).unwrap().status,
        ActivityStatus::Planned
    );
    assert_eq!(
        service.get_activity(owner, active.id).unwrap().status,
        ActivityStatus::InProgress
    );
}
both_backends!(tenants_are_isolated);

fn unknown_realization_is_not_found<S: ActivityStore, D: DefinitionResolver>(
    service: &ActivityService<S, D, FixedClock>,
    _clock: &FixedClock,
) {
    let tenant = TenantId::new_v4();
    let missing = Uuid::new_v4();

    let err = service.complete_activity(tenant, missing).unwrap_err();
    assert!(matches!(err, LifecycleError::RealizationNotFound(id) if id == missing));

    let err = service
        .start_activity(tenant, &start_planned(missing))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
both_backends!(unknown_realization_is_not_found);

fn finish_never_precedes_start<S: ActivityStore, D: DefinitionResolver>(
    service: &ActivityService<S, D, FixedClock>,
    clock: &FixedClock,
) {
    let tenant = TenantId::new_v4();

    clock.set(10_000);
    let active = service
        .start_activity(tenant, &start_fresh(Uuid::new_v4(), "Nap"))
        .unwrap();

    clock.set(9_000);
    let completed = service.complete_activity(tenant, active.id).unwrap();
    assert_eq!(completed.started_at, Some(10_000));
    assert_eq!(completed.finished_at, Some(10_000));
}
both_backends!(finish_never_precedes_start);

#[test]
fn cancelled_records_cannot_move_forward() {
    let store = InMemoryActivityStore::new();
    let service = ActivityService::with_clock(
        store.clone(),
        InMemoryDefinitionResolver::new(),
        FixedClock::new(1_000),
    );
    let tenant = TenantId::new_v4();

    let mut planned = service
        .plan_activity(
            tenant,
            &ActivityCommand::for_name(Uuid::new_v4(), "Swimming"),
        )
        .unwrap();
    planned.status = ActivityStatus::Cancelled;
    store
        .update_realization(tenant, &planned, ActivityStatus::Planned)
        .unwrap();

    let start_err = service
        .start_activity(tenant, &start_planned(planned.id))
        .unwrap_err();
    assert_eq!(
        start_err.to_string(),
        "cannot start activity: current status is cancelled"
    );
    let complete_err = service.complete_activity(tenant, planned.id).unwrap_err();
    assert_eq!(complete_err.kind(), ErrorKind::InvalidState);
}

#[test]
fn realization_serializes_with_snake_case_status() {
    let clock = FixedClock::new(1_700_000_000_000);
    let service = memory_service(&clock);
    let tenant = TenantId::new_v4();

    let active = service
        .start_activity(tenant, &start_fresh(Uuid::new_v4(), "Nap"))
        .unwrap();
    let json = serde_json::to_value(&active).unwrap();

    assert_eq!(json["status"], "in_progress");
    assert_eq!(json["tenant_id"], tenant.to_string());
    assert_eq!(json["started_at"], 1_700_000_000_000_i64);
    assert!(json["finished_at"].is_null());
}

#[test]
fn rejected_fresh_start_persists_nothing_in_sqlite() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(1_000);
    let service = sqlite_service(&conn, &clock);
    let tenant = TenantId::new_v4();
    let entity = Uuid::new_v4();

    service
        .start_activity(tenant, &start_fresh(entity, "Nap"))
        .unwrap();
    let err = service
        .start_activity(
            tenant,
            &StartCommand::Fresh(
                ActivityCommand::for_name(entity, "Sport").with_caregivers(vec![Uuid::new_v4()]),
            ),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let count = |sql: &str| -> i64 { conn.query_row(sql, [], |row| row.get(0)).unwrap() };
    assert_eq!(count("SELECT COUNT(*) FROM activity_realizations;"), 1);
    assert_eq!(count("SELECT COUNT(*) FROM realization_caregivers;"), 0);
    assert_eq!(count("SELECT COUNT(*) FROM activity_definitions;"), 1);
}
