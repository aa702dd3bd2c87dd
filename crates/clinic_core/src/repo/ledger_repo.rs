//! Ledger consistency: charges, payments and the allocations linking them.
//!
//! # Responsibility
//! - Answer aggregate and listing queries over the ledger.
//! - Own the only paths that delete charges and payments, removing their
//!   allocations in the same transaction.
//! - Enforce the per-payment allocation ceiling on `allocate`.
//!
//! # Invariants
//! - Sums run in SQLite over integer minor units and are converted to
//!   `Decimal` exactly; no floating-point step exists on any path.
//! - Aggregates return zero, never an error, when no rows match.
//! - A cascading delete either removes the row and all its allocations or
//!   changes nothing. A charge delete writes its audit entry inside the same
//!   transaction.
//! - Transactional deletes take no cancel token.

use super::mutation::{apply_mutation, PendingMutation};
use super::{
    aliased_columns, ensure_connection_ready, load_by_id, load_where, Entity, RepoError,
    RepoResult, RowColumns,
};
use crate::audit::{Auditor, IdentityProvider};
use crate::cancel::CancelToken;
use crate::config::CoreConfig;
use crate::model::billing::{Allocation, Charge, Payment};
use crate::model::kind::EntityKind;
use crate::model::money::{from_minor_units, to_minor_units};
use crate::model::patient::Patient;
use crate::model::timestamp::day_range_millis;
use crate::model::EntityId;
use chrono::NaiveDate;
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use std::time::Instant;

/// Result of a cascading delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { allocations_removed: usize },
    /// The row was already gone; nothing changed.
    NotFound,
}

impl DeleteOutcome {
    pub fn is_deleted(self) -> bool {
        matches!(self, Self::Deleted { .. })
    }
}

/// Charge row joined with its patient, for date-range listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeListing {
    pub charge: Charge,
    pub patient: Patient,
}

/// Payment row joined with its patient, for date-range listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentListing {
    pub payment: Payment,
    pub patient: Patient,
}

/// Ledger query and consistency contract.
pub trait LedgerRepository {
    /// Sum of charge totals for one patient.
    fn total_charged(&self, patient_id: EntityId, cancel: &CancelToken) -> RepoResult<Decimal>;
    /// Sum of payment amounts for one patient.
    fn total_paid(&self, patient_id: EntityId, cancel: &CancelToken) -> RepoResult<Decimal>;
    /// `total_charged - total_paid`.
    fn balance(&self, patient_id: EntityId, cancel: &CancelToken) -> RepoResult<Decimal>;
    /// Sum of allocations drawn from one payment.
    fn allocated_total(&self, payment_id: EntityId, cancel: &CancelToken) -> RepoResult<Decimal>;
    /// Charge total minus allocations against it. Fails when the charge is missing.
    fn outstanding_for_charge(
        &self,
        charge_id: EntityId,
        cancel: &CancelToken,
    ) -> RepoResult<Decimal>;
    /// Links part of a payment to a charge.
    fn allocate(
        &self,
        payment_id: EntityId,
        charge_id: EntityId,
        amount: Decimal,
    ) -> RepoResult<Allocation>;
    /// Deletes one charge with every allocation referencing it.
    fn delete_charge_with_allocations(&self, charge_id: EntityId) -> RepoResult<DeleteOutcome>;
    /// Deletes one payment with every allocation drawn from it.
    fn delete_payment_with_allocations(&self, payment_id: EntityId) -> RepoResult<DeleteOutcome>;
    /// Charges visited from `start` 00:00 through the end of `end` (UTC), oldest first.
    fn charges_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancelToken,
    ) -> RepoResult<Vec<ChargeListing>>;
    /// Payments received from `start` 00:00 through the end of `end` (UTC), oldest first.
    fn payments_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancelToken,
    ) -> RepoResult<Vec<PaymentListing>>;
    fn charges_for_patient(
        &self,
        patient_id: EntityId,
        cancel: &CancelToken,
    ) -> RepoResult<Vec<Charge>>;
    fn payments_for_patient(
        &self,
        patient_id: EntityId,
        cancel: &CancelToken,
    ) -> RepoResult<Vec<Payment>>;
    fn allocations_for_charge(&self, charge_id: EntityId) -> RepoResult<Vec<Allocation>>;
    fn allocations_for_payment(&self, payment_id: EntityId) -> RepoResult<Vec<Allocation>>;
}

/// SQLite-backed ledger repository.
pub struct SqliteLedgerRepository<'conn> {
    conn: &'conn Connection,
    auditor: Auditor<'conn>,
}

impl<'conn> SqliteLedgerRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(
        conn: &'conn Connection,
        identity: &'conn dyn IdentityProvider,
    ) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self {
            conn,
            auditor: Auditor::new(identity),
        })
    }

    /// Constructs a repository whose cascade audit entries fall back to the
    /// system actor of `config`.
    pub fn with_config(
        conn: &'conn Connection,
        identity: &'conn dyn IdentityProvider,
        config: &CoreConfig,
    ) -> RepoResult<Self> {
        Ok(Self::try_new(conn, identity)?.with_system_actor(config.system_actor.clone()))
    }

    pub fn with_system_actor(mut self, system_actor: impl Into<String>) -> Self {
        self.auditor = self.auditor.with_system_actor(system_actor);
        self
    }

    fn sum_minor(&self, sql: &str, id: EntityId, cancel: &CancelToken) -> RepoResult<Decimal> {
        cancel.run(self.conn, || {
            let minor: i64 = self.conn.query_row(sql, [id], |row| row.get(0))?;
            Ok(from_minor_units(minor))
        })
    }
}

impl LedgerRepository for SqliteLedgerRepository<'_> {
    fn total_charged(&self, patient_id: EntityId, cancel: &CancelToken) -> RepoResult<Decimal> {
        self.sum_minor(
            "SELECT COALESCE(SUM(total_cost_minor), 0)
             FROM clinical_entries
             WHERE patient_id = ?1;",
            patient_id,
            cancel,
        )
    }

    fn total_paid(&self, patient_id: EntityId, cancel: &CancelToken) -> RepoResult<Decimal> {
        self.sum_minor(
            "SELECT COALESCE(SUM(amount_minor), 0)
             FROM payments
             WHERE patient_id = ?1;",
            patient_id,
            cancel,
        )
    }

    fn balance(&self, patient_id: EntityId, cancel: &CancelToken) -> RepoResult<Decimal> {
        cancel.run(self.conn, || {
            let minor: i64 = self.conn.query_row(
                "SELECT
                    (SELECT COALESCE(SUM(total_cost_minor), 0)
                     FROM clinical_entries
                     WHERE patient_id = ?1)
                  - (SELECT COALESCE(SUM(amount_minor), 0)
                     FROM payments
                     WHERE patient_id = ?1);",
                [patient_id],
                |row| row.get(0),
            )?;
            Ok(from_minor_units(minor))
        })
    }

    fn allocated_total(&self, payment_id: EntityId, cancel: &CancelToken) -> RepoResult<Decimal> {
        self.sum_minor(
            "SELECT COALESCE(SUM(amount_allocated_minor), 0)
             FROM allocations
             WHERE payment_id = ?1;",
            payment_id,
            cancel,
        )
    }

    fn outstanding_for_charge(
        &self,
        charge_id: EntityId,
        cancel: &CancelToken,
    ) -> RepoResult<Decimal> {
        let outstanding: Option<i64> = cancel.run(self.conn, || {
            Ok(self
                .conn
                .query_row(
                    "SELECT c.total_cost_minor - COALESCE(
                        (SELECT SUM(a.amount_allocated_minor)
                         FROM allocations a
                         WHERE a.charge_id = c.id),
                        0
                     )
                     FROM clinical_entries c
                     WHERE c.id = ?1;",
                    [charge_id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        outstanding
            .map(from_minor_units)
            .ok_or(RepoError::NotFound {
                kind: EntityKind::ClinicalEntry,
                id: charge_id,
            })
    }

    fn allocate(
        &self,
        payment_id: EntityId,
        charge_id: EntityId,
        amount: Decimal,
    ) -> RepoResult<Allocation> {
        let mut allocation = Allocation::new(payment_id, charge_id, amount);
        allocation.validate()?;
        let requested_minor = to_minor_units("amount_allocated", amount)?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let payment_minor: i64 = tx
            .query_row(
                "SELECT amount_minor FROM payments WHERE id = ?1;",
                [payment_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(RepoError::NotFound {
                kind: EntityKind::Payment,
                id: payment_id,
            })?;
        if load_by_id::<Charge>(&tx, charge_id)?.is_none() {
            return Err(RepoError::NotFound {
                kind: EntityKind::ClinicalEntry,
                id: charge_id,
            });
        }

        let allocated_minor: i64 = tx.query_row(
            "SELECT COALESCE(SUM(amount_allocated_minor), 0)
             FROM allocations
             WHERE payment_id = ?1;",
            [payment_id],
            |row| row.get(0),
        )?;
        let available_minor = payment_minor - allocated_minor;
        if requested_minor > available_minor {
            return Err(RepoError::OverAllocation {
                payment_id,
                available: from_minor_units(available_minor),
                requested: amount,
            });
        }

        let applied = apply_mutation(&tx, &PendingMutation::create(&allocation, 0)?)?;
        tx.commit()?;
        allocation.set_id(applied.id);

        info!(
            "event=ledger_allocate module=ledger status=ok payment_id={} charge_id={} allocation_id={}",
            payment_id, charge_id, applied.id
        );
        Ok(allocation)
    }

    fn delete_charge_with_allocations(&self, charge_id: EntityId) -> RepoResult<DeleteOutcome> {
        let started_at = Instant::now();
        let result = delete_charge_in_tx(self.conn, &self.auditor, charge_id);
        log_delete(EntityKind::ClinicalEntry, charge_id, started_at, &result);
        result
    }

    fn delete_payment_with_allocations(&self, payment_id: EntityId) -> RepoResult<DeleteOutcome> {
        let started_at = Instant::now();
        let result = delete_payment_in_tx(self.conn, payment_id);
        log_delete(EntityKind::Payment, payment_id, started_at, &result);
        result
    }

    fn charges_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancelToken,
    ) -> RepoResult<Vec<ChargeListing>> {
        if start > end {
            return Ok(Vec::new());
        }
        let (lower, upper) = day_range_millis(start, end);
        let sql = format!(
            "SELECT {}, {}
             FROM clinical_entries c
             INNER JOIN patients p ON p.id = c.patient_id
             WHERE c.visit_at >= ?1
               AND c.visit_at < ?2
             ORDER BY c.visit_at ASC, c.id ASC;",
            aliased_columns::<Charge>("c", "charge_"),
            aliased_columns::<Patient>("p", "patient_"),
        );

        cancel.run(self.conn, || {
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params![lower, upper])?;
            let mut listings = Vec::new();
            while let Some(row) = rows.next()? {
                listings.push(ChargeListing {
                    charge: Charge::decode(&RowColumns::prefixed(row, "charge_"))?,
                    patient: Patient::decode(&RowColumns::prefixed(row, "patient_"))?,
                });
            }
            Ok(listings)
        })
    }

    fn payments_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancelToken,
    ) -> RepoResult<Vec<PaymentListing>> {
        if start > end {
            return Ok(Vec::new());
        }
        let (lower, upper) = day_range_millis(start, end);
        let sql = format!(
            "SELECT {}, {}
             FROM payments pay
             INNER JOIN patients p ON p.id = pay.patient_id
             WHERE pay.paid_at >= ?1
               AND pay.paid_at < ?2
             ORDER BY pay.paid_at ASC, pay.id ASC;",
            aliased_columns::<Payment>("pay", "payment_"),
            aliased_columns::<Patient>("p", "patient_"),
        );

        cancel.run(self.conn, || {
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params![lower, upper])?;
            let mut listings = Vec::new();
            while let Some(row) = rows.next()? {
                listings.push(PaymentListing {
                    payment: Payment::decode(&RowColumns::prefixed(row, "payment_"))?,
                    patient: Patient::decode(&RowColumns::prefixed(row, "patient_"))?,
                });
            }
            Ok(listings)
        })
    }

    fn charges_for_patient(
        &self,
        patient_id: EntityId,
        cancel: &CancelToken,
    ) -> RepoResult<Vec<Charge>> {
        cancel.run(self.conn, || {
            load_where(
                self.conn,
                Some("patient_id = ?1"),
                "visit_at ASC, id ASC",
                [patient_id],
            )
        })
    }

    fn payments_for_patient(
        &self,
        patient_id: EntityId,
        cancel: &CancelToken,
    ) -> RepoResult<Vec<Payment>> {
        cancel.run(self.conn, || {
            load_where(
                self.conn,
                Some("patient_id = ?1"),
                "paid_at ASC, id ASC",
                [patient_id],
            )
        })
    }

    fn allocations_for_charge(&self, charge_id: EntityId) -> RepoResult<Vec<Allocation>> {
        load_where(self.conn, Some("charge_id = ?1"), "id ASC", [charge_id])
    }

    fn allocations_for_payment(&self, payment_id: EntityId) -> RepoResult<Vec<Allocation>> {
        load_where(self.conn, Some("payment_id = ?1"), "id ASC", [payment_id])
    }
}

fn delete_charge_in_tx(
    conn: &Connection,
    auditor: &Auditor<'_>,
    charge_id: EntityId,
) -> RepoResult<DeleteOutcome> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let Some(charge) = load_by_id::<Charge>(&tx, charge_id)? else {
        tx.rollback()?;
        return Ok(DeleteOutcome::NotFound);
    };

    let allocations: Vec<Allocation> =
        load_where(&tx, Some("charge_id = ?1"), "id ASC", [charge_id])?;
    for allocation in &allocations {
        apply_mutation(&tx, &PendingMutation::delete(allocation)?)?;
    }
    apply_mutation(&tx, &PendingMutation::delete(&charge)?)?;
    auditor.record_delete(&tx, &charge)?;
    tx.commit()?;

    Ok(DeleteOutcome::Deleted {
        allocations_removed: allocations.len(),
    })
}

fn delete_payment_in_tx(conn: &Connection, payment_id: EntityId) -> RepoResult<DeleteOutcome> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let Some(payment) = load_by_id::<Payment>(&tx, payment_id)? else {
        tx.rollback()?;
        return Ok(DeleteOutcome::NotFound);
    };

    let allocations_removed =
        tx.execute("DELETE FROM allocations WHERE payment_id = ?1;", [payment_id])?;
    apply_mutation(&tx, &PendingMutation::delete(&payment)?)?;
    tx.commit()?;

    Ok(DeleteOutcome::Deleted {
        allocations_removed,
    })
}

fn log_delete(
    kind: EntityKind,
    id: EntityId,
    started_at: Instant,
    result: &RepoResult<DeleteOutcome>,
) {
    let duration_ms = started_at.elapsed().as_millis();
    match result {
        Ok(DeleteOutcome::Deleted {
            allocations_removed,
        }) => info!(
            "event=ledger_delete module=ledger status=ok kind={kind} id={id} allocations_removed={allocations_removed} duration_ms={duration_ms}"
        ),
        Ok(DeleteOutcome::NotFound) => info!(
            "event=ledger_delete module=ledger status=not_found kind={kind} id={id} duration_ms={duration_ms}"
        ),
        Err(err) => warn!(
            "event=ledger_delete module=ledger status=error kind={kind} id={id} duration_ms={duration_ms} error={err}"
        ),
    }
}
