//! Numbered document use-cases: issuing budgets and invoicing charges.
//!
//! # Responsibility
//! - Reserve a sequence number, then persist the numbered record through a
//!   unit of work so the write is audited.
//!
//! # Invariants
//! - Numbers are reserved before the insert; a failed insert leaves a gap,
//!   never a duplicate.
//! - A budget and its items land in one commit or not at all.

use crate::model::billing::Charge;
use crate::model::budget::{Budget, BudgetStatus, TreatmentPlanItem};
use crate::model::money::to_minor_units;
use crate::model::{EntityId, ValidationError};
use crate::repo::sequence_repo::{current_period, SequenceKind, SequenceRepository};
use crate::repo::unit_of_work::{Staged, StorageGateway, UnitOfWork};
use crate::repo::RepoError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for numbered document use-cases.
#[derive(Debug)]
pub enum DocumentServiceError {
    /// Input rejected before anything was written.
    Invalid(ValidationError),
    /// Persistence-layer failure.
    Repo(RepoError),
    /// Commit succeeded but the store id could not be resolved.
    InconsistentState(&'static str),
}

impl Display for DocumentServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent document state: {details}"),
        }
    }
}

impl Error for DocumentServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Invalid(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::InconsistentState(_) => None,
        }
    }
}

impl From<RepoError> for DocumentServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Invalid(err),
            other => Self::Repo(other),
        }
    }
}

impl From<ValidationError> for DocumentServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Invalid(value)
    }
}

/// One line of a budget being issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanLine {
    pub description: String,
    pub tooth: Option<String>,
    pub price: Decimal,
}

/// Budget as committed, with its plan items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedBudget {
    pub budget: Budget,
    pub items: Vec<TreatmentPlanItem>,
}

/// Numbered document facade over a sequence generator.
pub struct DocumentService<S: SequenceRepository> {
    sequences: S,
}

impl<S: SequenceRepository> DocumentService<S> {
    pub fn new(sequences: S) -> Self {
        Self { sequences }
    }

    /// Issues a numbered budget whose total is the sum of `lines`.
    ///
    /// The budget and its items are written by one commit of `uow`, together
    /// with anything else already staged there. When staging fails, every
    /// pending mutation of `uow` is discarded.
    pub fn issue_budget(
        &self,
        uow: &mut UnitOfWork<'_>,
        patient_id: EntityId,
        issued_at: DateTime<Utc>,
        lines: Vec<PlanLine>,
    ) -> Result<IssuedBudget, DocumentServiceError> {
        let mut items: Vec<TreatmentPlanItem> = lines
            .into_iter()
            .map(|line| {
                let mut item = TreatmentPlanItem::new(0, line.description, line.price);
                item.tooth = line.tooth;
                item
            })
            .collect();
        for item in &items {
            item.validate()?;
        }
        let total = plan_total(&items)?;

        let mut budget = Budget::draft(patient_id, issued_at, total);
        budget.number = self.sequences.next_budget_number()?;
        budget.status = BudgetStatus::Issued;

        let (budget_ticket, item_tickets) = match stage_budget(uow, &budget, &items) {
            Ok(tickets) => tickets,
            Err(err) => {
                uow.discard();
                return Err(err.into());
            }
        };
        uow.commit()?;

        let budget_id = uow
            .assigned_id(budget_ticket)
            .ok_or(DocumentServiceError::InconsistentState(
                "issued budget has no assigned id",
            ))?;
        budget.id = Some(budget_id);
        for (item, ticket) in items.iter_mut().zip(item_tickets) {
            item.budget_id = budget_id;
            item.id = uow.assigned_id(ticket);
        }

        Ok(IssuedBudget { budget, items })
    }

    /// Assigns the next invoice number to `charge` and records it.
    pub fn record_invoiced_charge(
        &self,
        uow: &mut UnitOfWork<'_>,
        mut charge: Charge,
    ) -> Result<Charge, DocumentServiceError> {
        charge.validate()?;
        charge.invoice_number = Some(
            self.sequences
                .next_number(SequenceKind::Invoice, current_period())?,
        );

        let staged = uow.set::<Charge>().add(charge.clone())?;
        uow.commit()?;
        charge.id = Some(uow.assigned_id(staged).ok_or(
            DocumentServiceError::InconsistentState("invoiced charge has no assigned id"),
        )?);
        Ok(charge)
    }
}

/// Sum of item prices, bounded by what the store can hold.
fn plan_total(items: &[TreatmentPlanItem]) -> Result<Decimal, ValidationError> {
    let total = items
        .iter()
        .try_fold(Decimal::ZERO, |total, item| total.checked_add(item.price))
        .ok_or(ValidationError::AmountOutOfRange { field: "total" })?;
    to_minor_units("total", total)?;
    Ok(total)
}

fn stage_budget(
    uow: &mut UnitOfWork<'_>,
    budget: &Budget,
    items: &[TreatmentPlanItem],
) -> Result<(Staged, Vec<Staged>), RepoError> {
    let budget_ticket = uow.set::<Budget>().add(budget.clone())?;
    let mut plan = uow.set::<TreatmentPlanItem>();
    let item_tickets = items
        .iter()
        .map(|item| plan.add_linked(item.clone(), "budget_id", budget_ticket))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((budget_ticket, item_tickets))
}
