//! Application users (clinicians and front-desk staff).

use super::validation::require_text;
use super::{EntityId, ValidationError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Clinician,
    Reception,
}

impl UserRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Clinician => "clinician",
            Self::Reception => "reception",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "clinician" => Some(Self::Clinician),
            "reception" => Some(Self::Reception),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Option<EntityId>,
    /// Login name; unique.
    pub username: String,
    pub display_name: String,
    pub role: UserRole,
    pub is_active: bool,
}

impl User {
    pub fn new(username: impl Into<String>, display_name: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: None,
            username: username.into(),
            display_name: display_name.into(),
            role,
            is_active: true,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("username", &self.username)?;
        require_text("display_name", &self.display_name)
    }
}
