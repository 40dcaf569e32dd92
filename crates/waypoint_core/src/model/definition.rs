//! Activity definition model.
//!
//! A definition is a named category ("Nap", "Sport") unique per tenant.

use crate::model::activity::TenantId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of an activity definition.
pub type DefinitionId = Uuid;

/// Named activity category owned by one tenant.
///
/// Created lazily the first time a name is used and never deleted by core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityDefinition {
    pub id: DefinitionId,
    pub tenant_id: TenantId,
    /// Normalized name, unique within `tenant_id`.
    pub name: String,
    pub description: Option<String>,
    /// Display color hint such as `#ffaa00`.
    pub color_code: Option<String>,
}
