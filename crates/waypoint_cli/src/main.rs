//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `waypoint_core` linkage with one in-memory activity lifecycle.
//! - Keep output deterministic apart from generated ids.

use log::warn;
use std::process::ExitCode;
use uuid::Uuid;
use waypoint_core::{
    ActivityCommand, ActivityService, InMemoryActivityStore, InMemoryDefinitionResolver,
    LifecycleError, LogConfig, StartCommand, TenantId,
};

fn main() -> ExitCode {
    if let Some(config) = LogConfig::from_env() {
        if let Err(err) = config.init() {
            eprintln!("waypoint: logging disabled: {err}");
        }
    }

    println!("waypoint_core version={}", waypoint_core::core_version());
    match run_smoke() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            warn!("event=cli_smoke module=cli status=error error_code={}", err.code());
            eprintln!("waypoint: smoke run failed ({:?}): {err}", err.kind());
            ExitCode::FAILURE
        }
    }
}

fn run_smoke() -> Result<(), LifecycleError> {
    let service = ActivityService::new(
        InMemoryActivityStore::new(),
        InMemoryDefinitionResolver::new(),
    );
    let tenant = TenantId::new_v4();
    let entity_id = Uuid::new_v4();

    let planned = service.plan_activity(tenant, &ActivityCommand::for_name(entity_id, "Nap"))?;
    println!("plan status={}", planned.status);

    let started = service.start_activity(
        tenant,
        &StartCommand::Planned {
            realization_id: planned.id,
        },
    )?;
    println!("start status={}", started.status);

    let busy = service.start_activity(
        tenant,
        &StartCommand::Fresh(ActivityCommand::for_name(entity_id, "Sport")),
    );
    if let Err(err) = busy {
        println!("second start kind={:?}", err.kind());
    }

    let completed = service.complete_activity(tenant, started.id)?;
    println!("complete status={}", completed.status);
    Ok(())
}
