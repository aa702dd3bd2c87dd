//! Patient record.

use super::validation::require_text;
use super::{EntityId, ValidationError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Person receiving care; owner of charges, payments and budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Option<EntityId>,
    pub full_name: String,
    /// Government id; unique when present.
    pub national_id: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl Patient {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            id: None,
            full_name: full_name.into(),
            national_id: None,
            phone: None,
            birth_date: None,
            notes: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("full_name", &self.full_name)
    }
}
