//! Ledger use-case service.
//!
//! # Responsibility
//! - Present patient statements and period listings to UI/report layers.
//! - Turn cascading-delete failures into one "could not delete" outcome.
//!
//! # Invariants
//! - Totals are `Decimal` sums of exact minor-unit amounts.
//! - A failed delete has no partial effect; the repository rolled it back.

use crate::cancel::CancelToken;
use crate::model::billing::Allocation;
use crate::model::kind::EntityKind;
use crate::model::EntityId;
use crate::repo::ledger_repo::{ChargeListing, DeleteOutcome, LedgerRepository, PaymentListing};
use crate::repo::RepoError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for ledger use-cases.
#[derive(Debug)]
pub enum LedgerServiceError {
    /// Cascading delete failed and was rolled back.
    CouldNotDelete {
        kind: EntityKind,
        id: EntityId,
        source: RepoError,
    },
    /// Persistence-layer failure.
    Repo(RepoError),
}

impl Display for LedgerServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CouldNotDelete { kind, id, source } => {
                write!(f, "could not delete {kind} {id}: {source}")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LedgerServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CouldNotDelete { source, .. } => Some(source),
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<RepoError> for LedgerServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Charged, paid and outstanding amounts for one patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatientStatement {
    pub patient_id: EntityId,
    pub charged: Decimal,
    pub paid: Decimal,
    /// `charged - paid`; negative when the patient paid ahead.
    pub balance: Decimal,
}

/// Charges and payments of a date range with their totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodListing {
    pub charges: Vec<ChargeListing>,
    pub payments: Vec<PaymentListing>,
    pub charged_total: Decimal,
    pub paid_total: Decimal,
}

/// Ledger service facade over repository implementations.
pub struct LedgerService<R: LedgerRepository> {
    repo: R,
}

impl<R: LedgerRepository> LedgerService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn statement(
        &self,
        patient_id: EntityId,
        cancel: &CancelToken,
    ) -> Result<PatientStatement, LedgerServiceError> {
        let charged = self.repo.total_charged(patient_id, cancel)?;
        let paid = self.repo.total_paid(patient_id, cancel)?;
        Ok(PatientStatement {
            patient_id,
            charged,
            paid,
            balance: charged - paid,
        })
    }

    /// Lists the range and totals it from the listed rows.
    pub fn period_listing(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancelToken,
    ) -> Result<PeriodListing, LedgerServiceError> {
        let charges = self.repo.charges_by_date_range(start, end, cancel)?;
        let payments = self.repo.payments_by_date_range(start, end, cancel)?;
        let charged_total: Decimal = charges.iter().map(|row| row.charge.total_cost).sum();
        let paid_total: Decimal = payments.iter().map(|row| row.payment.amount).sum();
        Ok(PeriodListing {
            charges,
            payments,
            charged_total,
            paid_total,
        })
    }

    pub fn allocate(
        &self,
        payment_id: EntityId,
        charge_id: EntityId,
        amount: Decimal,
    ) -> Result<Allocation, LedgerServiceError> {
        Ok(self.repo.allocate(payment_id, charge_id, amount)?)
    }

    /// Deletes a charge with its allocations.
    ///
    /// Returns `Ok(false)` when the charge was already gone.
    pub fn delete_charge(&self, charge_id: EntityId) -> Result<bool, LedgerServiceError> {
        self.repo
            .delete_charge_with_allocations(charge_id)
            .map(DeleteOutcome::is_deleted)
            .map_err(|source| LedgerServiceError::CouldNotDelete {
                kind: EntityKind::ClinicalEntry,
                id: charge_id,
                source,
            })
    }

    /// Deletes a payment with its allocations.
    ///
    /// Returns `Ok(false)` when the payment was already gone.
    pub fn delete_payment(&self, payment_id: EntityId) -> Result<bool, LedgerServiceError> {
        self.repo
            .delete_payment_with_allocations(payment_id)
            .map(DeleteOutcome::is_deleted)
            .map_err(|source| LedgerServiceError::CouldNotDelete {
                kind: EntityKind::Payment,
                id: payment_id,
                source,
            })
    }
}
