//! Files linked to a patient record (x-rays, consent forms, scans).

use super::timestamp::millis_serde;
use super::validation::require_text;
use super::{EntityId, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to an external file; the file itself is owned by the backup
/// and storage collaborators, not by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedDocument {
    pub id: Option<EntityId>,
    pub patient_id: EntityId,
    pub title: String,
    pub file_path: String,
    #[serde(with = "millis_serde")]
    pub linked_at: DateTime<Utc>,
}

impl LinkedDocument {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("title", &self.title)?;
        require_text("file_path", &self.file_path)
    }
}
