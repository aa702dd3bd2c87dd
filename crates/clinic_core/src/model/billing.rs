//! Charges, payments and the allocations linking them.
//!
//! # Invariants
//! - The allocations of one payment never add up to more than the payment.
//! - An allocation never outlives its charge or its payment; both are only
//!   removed through the ledger's cascading deletes.

use super::money::{amount_serde, ensure_non_negative, ensure_positive};
use super::timestamp::{millis_serde, truncate_to_millis};
use super::validation::require_text;
use super::{EntityId, ValidationError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One priced line of a clinical entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeLineItem {
    pub description: String,
    pub quantity: u32,
    #[serde(with = "amount_serde")]
    pub unit_price: Decimal,
}

impl ChargeLineItem {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Billable clinical event, persisted as a clinical entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub id: Option<EntityId>,
    pub patient_id: EntityId,
    /// Issuing clinician (`users.id`).
    pub clinician_id: EntityId,
    #[serde(with = "millis_serde")]
    pub visit_at: DateTime<Utc>,
    pub description: String,
    #[serde(with = "amount_serde")]
    pub total_cost: Decimal,
    /// Assigned by the invoice sequence; unique when present.
    pub invoice_number: Option<String>,
    /// Optional breakdown. When present it must add up to `total_cost`.
    pub line_items: Vec<ChargeLineItem>,
}

impl Charge {
    pub fn new(
        patient_id: EntityId,
        clinician_id: EntityId,
        visit_at: DateTime<Utc>,
        description: impl Into<String>,
        total_cost: Decimal,
    ) -> Self {
        Self {
            id: None,
            patient_id,
            clinician_id,
            visit_at: truncate_to_millis(visit_at),
            description: description.into(),
            total_cost,
            invoice_number: None,
            line_items: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("description", &self.description)?;
        ensure_non_negative("total_cost", self.total_cost)?;
        for item in &self.line_items {
            require_text("line_items.description", &item.description)?;
            ensure_non_negative("line_items.unit_price", item.unit_price)?;
        }
        if !self.line_items.is_empty() {
            let computed: Decimal = self.line_items.iter().map(ChargeLineItem::subtotal).sum();
            if computed != self.total_cost {
                return Err(ValidationError::LineItemsMismatch {
                    declared: self.total_cost,
                    computed,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Insurance,
    Other,
}

impl PaymentMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::Transfer => "transfer",
            Self::Insurance => "insurance",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cash" => Some(Self::Cash),
            "card" => Some(Self::Card),
            "transfer" => Some(Self::Transfer),
            "insurance" => Some(Self::Insurance),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Money received from a patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Option<EntityId>,
    pub patient_id: EntityId,
    #[serde(with = "millis_serde")]
    pub paid_at: DateTime<Utc>,
    #[serde(with = "amount_serde")]
    pub amount: Decimal,
    pub method: PaymentMethod,
}

impl Payment {
    pub fn new(
        patient_id: EntityId,
        paid_at: DateTime<Utc>,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Self {
        Self {
            id: None,
            patient_id,
            paid_at: truncate_to_millis(paid_at),
            amount,
            method,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_positive("amount", self.amount)
    }
}

/// Portion of a payment applied to one charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Option<EntityId>,
    pub payment_id: EntityId,
    pub charge_id: EntityId,
    #[serde(with = "amount_serde")]
    pub amount_allocated: Decimal,
}

impl Allocation {
    pub fn new(payment_id: EntityId, charge_id: EntityId, amount_allocated: Decimal) -> Self {
        Self {
            id: None,
            payment_id,
            charge_id,
            amount_allocated,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_positive("amount_allocated", self.amount_allocated)
    }
}
