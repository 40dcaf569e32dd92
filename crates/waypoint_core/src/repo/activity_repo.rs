//! Activity record store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist realizations together with their ordered caregiver links.
//! - Answer the "which record currently holds this entity" query.
//!
//! # Invariants
//! - Create writes the record and all caregiver links in one transaction.
//! - At most one `in_progress` row per (tenant, entity); the partial unique
//!   index `uq_realizations_one_active` rejects a second one, reported as
//!   `RepoError::ActiveConflict`.
//! - Updates are compare-and-swap on the stored status, so two transitions
//!   racing on one record cannot both apply.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::activity::{
    ActivityStatus, EntityId, Realization, RealizationDraft, RealizationId,
    RealizationValidationError, TenantId,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const REALIZATION_SELECT_SQL: &str = "SELECT
    id,
    tenant_id,
    definition_id,
    entity_id,
    status,
    started_at,
    finished_at
FROM activity_realizations";

const REQUIRED_TABLES: [&str; 3] = [
    "activity_definitions",
    "activity_realizations",
    "realization_caregivers",
];

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by the record store and definition resolver.
#[derive(Debug)]
pub enum RepoError {
    /// Record violates timestamp invariants.
    Validation(RealizationValidationError),
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// No realization with this id exists for the caller's tenant.
    NotFound(RealizationId),
    /// Another realization is already `in_progress` for this entity.
    ActiveConflict { entity_id: EntityId },
    /// Stored status changed since the caller read it.
    StatusMismatch {
        id: RealizationId,
        expected: ActivityStatus,
        actual: ActivityStatus,
    },
    /// Definition name is empty after normalization.
    InvalidDefinitionName(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "activity realization not found: {id}"),
            Self::ActiveConflict { entity_id } => {
                write!(f, "entity {entity_id} already has an activity in progress")
            }
            Self::StatusMismatch {
                id,
                expected,
                actual,
            } => write!(
                f,
                "activity realization {id} is `{actual}`, expected `{expected}`"
            ),
            Self::InvalidDefinitionName(name) => {
                write!(f, "invalid activity definition name: `{name}`")
            }
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "activity repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "activity repository requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted activity data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RealizationValidationError> for RepoError {
    fn from(value: RealizationValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Tenant-scoped persistence for activity realizations.
pub trait ActivityStore {
    /// Assigns a new id and `tenant`, then persists the record and its
    /// caregiver links as one unit.
    fn create_realization(
        &self,
        tenant: TenantId,
        draft: RealizationDraft,
    ) -> RepoResult<Realization>;
    /// Returns the record only if it belongs to `tenant`.
    fn get_realization(&self, tenant: TenantId, id: RealizationId) -> RepoResult<Realization>;
    /// Returns the `in_progress` record for (tenant, entity), if any.
    fn get_active_by_entity(
        &self,
        tenant: TenantId,
        entity_id: EntityId,
    ) -> RepoResult<Option<Realization>>;
    /// Persists status/timestamp changes for the record (tenant, id), only
    /// if its stored status is still `expected`.
    ///
    /// # Errors
    /// - `NotFound` when no row exists for (tenant, id).
    /// - `StatusMismatch` when the row has moved on from `expected`.
    /// - `ActiveConflict` when the write would make a second active record.
    fn update_realization(
        &self,
        tenant: TenantId,
        realization: &Realization,
        expected: ActivityStatus,
    ) -> RepoResult<()>;
}

/// SQLite-backed activity record store.
pub struct SqliteActivityStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteActivityStore<'conn> {
    /// Constructs a store from a migrated connection.
    ///
    /// # Errors
    /// - `UninitializedConnection` when the schema version is not the latest.
    /// - `MissingRequiredTable` when an activity table is absent.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ActivityStore for SqliteActivityStore<'_> {
    fn create_realization(
        &self,
        tenant: TenantId,
        draft: RealizationDraft,
    ) -> RepoResult<Realization> {
        draft.validate()?;
        let realization = draft.into_realization(Uuid::new_v4(), tenant);
        let id_text = realization.id.to_string();

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO activity_realizations (
                id,
                tenant_id,
                definition_id,
                entity_id,
                status,
                started_at,
                finished_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                id_text.as_str(),
                tenant.to_string(),
                realization.definition_id.to_string(),
                realization.entity_id.to_string(),
                realization.status.as_str(),
                realization.started_at,
                realization.finished_at,
            ],
        )
        .map_err(|err| map_write_error(err, realization.entity_id))?;

        for (position, caregiver_id) in realization.caregiver_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO realization_caregivers (realization_id, position, caregiver_id)
                 VALUES (?1, ?2, ?3);",
                params![id_text.as_str(), position as i64, caregiver_id.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(realization)
    }

    fn get_realization(&self, tenant: TenantId, id: RealizationId) -> RepoResult<Realization> {
        let mut stmt = self.conn.prepare(&format!(
            "{REALIZATION_SELECT_SQL}
             WHERE id = ?1
               AND tenant_id = ?2;"
        ))?;

        let row = stmt
            .query_row(params![id.to_string(), tenant.to_string()], |row| {
                Ok(RawRealization::from_row(row))
            })
            .optional()?;

        match row {
            Some(raw) => self.finish_record(raw?),
            None => Err(RepoError::NotFound(id)),
        }
    }

    fn get_active_by_entity(
        &self,
        tenant: TenantId,
        entity_id: EntityId,
    ) -> RepoResult<Option<Realization>> {
        let mut stmt = self.conn.prepare(&format!(
            "{REALIZATION_SELECT_SQL}
             WHERE tenant_id = ?1
               AND entity_id = ?2
               AND status = ?3
             LIMIT 1;"
        ))?;

        let row = stmt
            .query_row(
                params![
                    tenant.to_string(),
                    entity_id.to_string(),
                    ActivityStatus::InProgress.as_str()
                ],
                |row| Ok(RawRealization::from_row(row)),
            )
            .optional()?;

        match row {
            Some(raw) => Ok(Some(self.finish_record(raw?)?)),
            None => Ok(None),
        }
    }

    fn update_realization(
        &self,
        tenant: TenantId,
        realization: &Realization,
        expected: ActivityStatus,
    ) -> RepoResult<()> {
        realization.validate()?;
        let id_text = realization.id.to_string();
        let tenant_text = tenant.to_string();

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx
            .execute(
                "UPDATE activity_realizations
                 SET
                    status = ?1,
                    started_at = ?2,
                    finished_at = ?3,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?4
                   AND tenant_id = ?5
                   AND status = ?6;",
                params![
                    realization.status.as_str(),
                    realization.started_at,
                    realization.finished_at,
                    id_text.as_str(),
                    tenant_text.as_str(),
                    expected.as_str(),
                ],
            )
            .map_err(|err| map_write_error(err, realization.entity_id))?;

        if changed == 0 {
            let current: Option<String> = tx
                .query_row(
                    "SELECT status
                     FROM activity_realizations
                     WHERE id = ?1
                       AND tenant_id = ?2;",
                    params![id_text.as_str(), tenant_text.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match current {
                Some(status_text) => RepoError::StatusMismatch {
                    id: realization.id,
                    expected,
                    actual: ActivityStatus::parse(&status_text).ok_or_else(|| {
                        RepoError::InvalidData(format!(
                            "invalid status `{status_text}` in activity_realizations.status"
                        ))
                    })?,
                },
                None => RepoError::NotFound(realization.id),
            });
        }

        tx.commit()?;
        Ok(())
    }
}

impl SqliteActivityStore<'_> {
    fn finish_record(&self, raw: RawRealization) -> RepoResult<Realization> {
        let caregiver_ids = load_caregivers(self.conn, &raw.id_text)?;
        let realization = raw.into_realization(caregiver_ids)?;
        realization.validate()?;
        Ok(realization)
    }
}

/// Column values read before caregiver links are attached.
struct RawRealization {
    id_text: String,
    tenant_text: String,
    definition_text: String,
    entity_text: String,
    status_text: String,
    started_at: Option<i64>,
    finished_at: Option<i64>,
}

impl RawRealization {
    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(Self {
            id_text: row.get("id")?,
            tenant_text: row.get("tenant_id")?,
            definition_text: row.get("definition_id")?,
            entity_text: row.get("entity_id")?,
            status_text: row.get("status")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }

    fn into_realization(self, caregiver_ids: Vec<Uuid>) -> RepoResult<Realization> {
        let status = ActivityStatus::parse(&self.status_text).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid status `{}` in activity_realizations.status",
                self.status_text
            ))
        })?;

        Ok(Realization {
            id: parse_uuid(&self.id_text, "activity_realizations.id")?,
            tenant_id: TenantId::new(parse_uuid(
                &self.tenant_text,
                "activity_realizations.tenant_id",
            )?),
            definition_id: parse_uuid(&self.definition_text, "activity_realizations.definition_id")?,
            entity_id: parse_uuid(&self.entity_text, "activity_realizations.entity_id")?,
            caregiver_ids,
            status,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

fn load_caregivers(conn: &Connection, realization_id: &str) -> RepoResult<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT caregiver_id
         FROM realization_caregivers
         WHERE realization_id = ?1
         ORDER BY position ASC;",
    )?;
    let mut rows = stmt.query([realization_id])?;
    let mut caregivers = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        caregivers.push(parse_uuid(&value, "realization_caregivers.caregiver_id")?);
    }
    Ok(caregivers)
}

fn map_write_error(err: rusqlite::Error, entity_id: EntityId) -> RepoError {
    if is_unique_violation(&err) {
        return RepoError::ActiveConflict { entity_id };
    }
    err.into()
}

// Primary keys report SQLITE_CONSTRAINT_PRIMARYKEY, so on realization writes a
// plain UNIQUE failure can only come from the single-active index.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

/// Verifies that `conn` is migrated and carries every activity table.
pub(crate) fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
