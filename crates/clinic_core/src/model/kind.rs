//! Closed set of persisted entity kinds.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Every entity kind the core persists.
///
/// Whether a kind is audited is decided here, at compile time, instead of by
/// inspecting values at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Patient,
    User,
    Budget,
    /// A billable clinical entry, also called a charge.
    ClinicalEntry,
    TreatmentPlanItem,
    LinkedDocument,
    Payment,
    Allocation,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        Self::Patient,
        Self::User,
        Self::Budget,
        Self::ClinicalEntry,
        Self::TreatmentPlanItem,
        Self::LinkedDocument,
        Self::Payment,
        Self::Allocation,
    ];

    /// Returns whether mutations of this kind produce audit entries.
    pub const fn is_watched(self) -> bool {
        match self {
            Self::Patient
            | Self::User
            | Self::Budget
            | Self::ClinicalEntry
            | Self::TreatmentPlanItem
            | Self::LinkedDocument => true,
            Self::Payment | Self::Allocation => false,
        }
    }

    /// Returns whether the storage gateway may stage updates of this kind.
    ///
    /// A payment is fixed once recorded; only allocations link it to charges.
    pub const fn allows_gateway_update(self) -> bool {
        !matches!(self, Self::Payment)
    }

    /// Returns whether the storage gateway may stage deletes of this kind.
    ///
    /// Ledger rows leave the store only through the ledger's cascading deletes.
    pub const fn allows_gateway_delete(self) -> bool {
        !matches!(self, Self::ClinicalEntry | Self::Payment | Self::Allocation)
    }

    /// Tag written to `audit_entries.entity_kind`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::User => "user",
            Self::Budget => "budget",
            Self::ClinicalEntry => "clinical_entry",
            Self::TreatmentPlanItem => "treatment_plan_item",
            Self::LinkedDocument => "linked_document",
            Self::Payment => "payment",
            Self::Allocation => "allocation",
        }
    }

    /// Backing table name.
    pub const fn table(self) -> &'static str {
        match self {
            Self::Patient => "patients",
            Self::User => "users",
            Self::Budget => "budgets",
            Self::ClinicalEntry => "clinical_entries",
            Self::TreatmentPlanItem => "treatment_plan_items",
            Self::LinkedDocument => "linked_documents",
            Self::Payment => "payments",
            Self::Allocation => "allocations",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
