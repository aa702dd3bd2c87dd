//! Treatment budgets (quotes) and their plan items.

use super::money::{amount_serde, ensure_non_negative};
use super::timestamp::{millis_serde, truncate_to_millis};
use super::validation::require_text;
use super::{EntityId, ValidationError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Draft,
    Issued,
    Accepted,
    Rejected,
}

impl BudgetStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Issued => "issued",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "issued" => Some(Self::Issued),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub id: Option<EntityId>,
    /// `YYYY-NNNN`, unique, issued by the budget sequence.
    pub number: String,
    pub patient_id: EntityId,
    #[serde(with = "millis_serde")]
    pub issued_at: DateTime<Utc>,
    #[serde(with = "amount_serde")]
    pub total: Decimal,
    pub status: BudgetStatus,
}

impl Budget {
    /// Draft budget without a number; numbering happens at issue time.
    pub fn draft(patient_id: EntityId, issued_at: DateTime<Utc>, total: Decimal) -> Self {
        Self {
            id: None,
            number: String::new(),
            patient_id,
            issued_at: truncate_to_millis(issued_at),
            total,
            status: BudgetStatus::Draft,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("number", &self.number)?;
        ensure_non_negative("total", self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentPlanItem {
    pub id: Option<EntityId>,
    pub budget_id: EntityId,
    pub description: String,
    /// Dental notation (FDI) of the treated tooth, if any.
    pub tooth: Option<String>,
    #[serde(with = "amount_serde")]
    pub price: Decimal,
    pub completed: bool,
}

impl TreatmentPlanItem {
    pub fn new(budget_id: EntityId, description: impl Into<String>, price: Decimal) -> Self {
        Self {
            id: None,
            budget_id,
            description: description.into(),
            tooth: None,
            price,
            completed: false,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("description", &self.description)?;
        ensure_non_negative("price", self.price)
    }
}
