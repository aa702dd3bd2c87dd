//! Audit trail records.

use super::kind::EntityKind;
use super::timestamp::millis_serde;
use super::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Immutable record of one watched mutation.
///
/// `diff` holds JSON: the full field set for creates and deletes,
/// `{field: {"old": .., "new": ..}}` for updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: EntityId,
    #[serde(with = "millis_serde")]
    pub timestamp_utc: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    pub entity_kind: EntityKind,
    pub entity_id: Option<EntityId>,
    pub diff: String,
}

impl AuditEntry {
    /// Parses the stored diff payload.
    pub fn diff_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.diff)
    }
}
