//! Activity definition resolver contracts and SQLite implementation.
//!
//! # Responsibility
//! - Look up or lazily create named activity categories per tenant.
//! - Keep name normalization in one place.
//!
//! # Invariants
//! - Exactly one row per (tenant, normalized name), enforced by the
//!   `UNIQUE (tenant_id, name)` constraint and an upsert, never by a
//!   check-then-insert in application code.
//! - Re-registering an existing name returns the existing definition.

use crate::model::activity::TenantId;
use crate::model::definition::{ActivityDefinition, DefinitionId};
use crate::repo::activity_repo::{ensure_connection_ready, parse_uuid, RepoError, RepoResult};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

const DEFINITION_SELECT_SQL: &str = "SELECT
    id,
    tenant_id,
    name,
    description,
    color_code
FROM activity_definitions";

/// Tenant-scoped lookup-or-create for activity definitions.
pub trait DefinitionResolver {
    /// Returns the definition for (tenant, name), creating it if absent.
    fn resolve(&self, tenant: TenantId, name: &str) -> RepoResult<ActivityDefinition>;
    /// Returns the definition only if it belongs to `tenant`.
    fn get_definition(
        &self,
        tenant: TenantId,
        id: DefinitionId,
    ) -> RepoResult<Option<ActivityDefinition>>;
    /// Lists all definitions of `tenant` sorted by name.
    fn list_definitions(&self, tenant: TenantId) -> RepoResult<Vec<ActivityDefinition>>;
}

/// Normalizes a definition name: trims and collapses whitespace runs.
///
/// Returns `None` when nothing remains.
pub fn normalize_definition_name(name: &str) -> Option<String> {
    let collapsed = WHITESPACE_RE.replace_all(name.trim(), " ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.into_owned())
    }
}

/// SQLite-backed definition resolver.
pub struct SqliteDefinitionRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDefinitionRepository<'conn> {
    /// Constructs a resolver from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl DefinitionResolver for SqliteDefinitionRepository<'_> {
    fn resolve(&self, tenant: TenantId, name: &str) -> RepoResult<ActivityDefinition> {
        let normalized = normalize_definition_name(name)
            .ok_or_else(|| RepoError::InvalidDefinitionName(name.to_string()))?;

        // No-op update so RETURNING yields the surviving row on conflict.
        let mut stmt = self.conn.prepare(
            "INSERT INTO activity_definitions (id, tenant_id, name)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (tenant_id, name) DO UPDATE SET name = excluded.name
             RETURNING id, tenant_id, name, description, color_code;",
        )?;
        let definition = stmt.query_row(
            params![
                Uuid::new_v4().to_string(),
                tenant.to_string(),
                normalized.as_str()
            ],
            |row| Ok(parse_definition_row(row)),
        )??;

        Ok(definition)
    }

    fn get_definition(
        &self,
        tenant: TenantId,
        id: DefinitionId,
    ) -> RepoResult<Option<ActivityDefinition>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DEFINITION_SELECT_SQL}
             WHERE id = ?1
               AND tenant_id = ?2;"
        ))?;

        stmt.query_row(params![id.to_string(), tenant.to_string()], |row| {
            Ok(parse_definition_row(row))
        })
        .optional()?
        .transpose()
    }

    fn list_definitions(&self, tenant: TenantId) -> RepoResult<Vec<ActivityDefinition>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DEFINITION_SELECT_SQL}
             WHERE tenant_id = ?1
             ORDER BY name ASC, id ASC;"
        ))?;

        let mut rows = stmt.query([tenant.to_string()])?;
        let mut definitions = Vec::new();
        while let Some(row) = rows.next()? {
            definitions.push(parse_definition_row(row)?);
        }
        Ok(definitions)
    }
}

fn parse_definition_row(row: &Row<'_>) -> RepoResult<ActivityDefinition> {
    let id_text: String = row.get("id")?;
    let tenant_text: String = row.get("tenant_id")?;
    Ok(ActivityDefinition {
        id: parse_uuid(&id_text, "activity_definitions.id")?,
        tenant_id: TenantId::new(parse_uuid(&tenant_text, "activity_definitions.tenant_id")?),
        name: row.get("name")?,
        description: row.get("description")?,
        color_code: row.get("color_code")?,
    })
}
