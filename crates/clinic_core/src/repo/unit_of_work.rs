//! Storage gateway over an explicit unit of work.
//!
//! # Responsibility
//! - Offer per-kind CRUD (`StorageGateway<T>`) on one connection.
//! - Buffer writes as pending mutations and apply them on `commit`, the one
//!   point where the auditor attaches.
//!
//! # Invariants
//! - Reads observe committed store state only, never staged writes.
//! - The pending list is drained on every commit attempt, success or failure.
//! - The prior row of an update or delete is read inside the commit
//!   transaction, so audit diffs describe what the write replaced.
//! - Payments are never updated and ledger rows never deleted through the
//!   gateway.
//! - In `Atomic` mode business rows and audit rows commit or roll back
//!   together. In `TwoPhase` mode a failed audit commit is reported as
//!   `RepoError::AuditCommit`, never swallowed.

use super::mutation::{apply_mutation, PendingMutation};
use super::{ensure_connection_ready, load_by_id, load_where, Entity, RepoError, RepoResult};
use crate::audit::{AuditCommitMode, Auditor, IdentityProvider};
use crate::config::CoreConfig;
use crate::model::audit::AuditAction;
use crate::model::kind::EntityKind;
use crate::model::EntityId;
use log::{info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Instant;

/// Ticket returned by `add`; resolves to the store id after commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Staged(usize);

/// Generic CRUD contract per entity kind.
pub trait StorageGateway<T: Entity> {
    fn get_by_id(&self, id: EntityId) -> RepoResult<Option<T>>;
    /// All rows, ordered by id.
    fn get_all(&self) -> RepoResult<Vec<T>>;
    /// Rows matching `predicate`, ordered by id.
    fn find(&self, predicate: &dyn Fn(&T) -> bool) -> RepoResult<Vec<T>>;
    /// Stages an insert. A preset id is written as-is.
    fn add(&mut self, entity: T) -> RepoResult<Staged>;
    /// Stages several inserts; nothing is staged if any entity is invalid.
    fn add_range(&mut self, entities: Vec<T>) -> RepoResult<Vec<Staged>>;
    /// Stages a full-row update against the committed row.
    fn update(&mut self, entity: &T) -> RepoResult<()>;
    fn remove(&mut self, id: EntityId) -> RepoResult<()>;
    /// Stages several deletes; nothing is staged if any row is missing.
    fn remove_range(&mut self, ids: &[EntityId]) -> RepoResult<()>;
    /// Commits every pending mutation of the unit of work.
    fn commit(&mut self) -> RepoResult<usize>;
}

/// Pending-mutation arena bound to one connection and one identity.
pub struct UnitOfWork<'conn> {
    conn: &'conn Connection,
    auditor: Auditor<'conn>,
    mode: AuditCommitMode,
    pending: Vec<PendingMutation>,
    next_ticket: usize,
    assigned: HashMap<Staged, EntityId>,
}

impl<'conn> UnitOfWork<'conn> {
    /// Constructs a unit of work over a migrated connection.
    pub fn try_new(
        conn: &'conn Connection,
        identity: &'conn dyn IdentityProvider,
    ) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self {
            conn,
            auditor: Auditor::new(identity),
            mode: AuditCommitMode::default(),
            pending: Vec::new(),
            next_ticket: 0,
            assigned: HashMap::new(),
        })
    }

    /// Constructs a unit of work using the commit mode and system actor of
    /// `config`.
    pub fn with_config(
        conn: &'conn Connection,
        identity: &'conn dyn IdentityProvider,
        config: &CoreConfig,
    ) -> RepoResult<Self> {
        let mut uow = Self::try_new(conn, identity)?.with_mode(config.audit_commit_mode);
        uow.auditor = Auditor::new(identity).with_system_actor(config.system_actor.clone());
        Ok(uow)
    }

    pub fn with_mode(mut self, mode: AuditCommitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> AuditCommitMode {
        self.mode
    }

    /// Gateway for entities of kind `T`.
    pub fn set<T: Entity>(&mut self) -> EntitySet<'_, 'conn, T> {
        EntitySet {
            uow: self,
            _kind: PhantomData,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Store id assigned to a committed `add`.
    pub fn assigned_id(&self, staged: Staged) -> Option<EntityId> {
        self.assigned.get(&staged).copied()
    }

    /// Drops every pending mutation; returns how many were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Applies pending mutations and their audit entries.
    ///
    /// Returns the number of business rows written. The prior row of every
    /// update and delete is re-read inside the commit transaction; updates
    /// equal to it are dropped without a write.
    pub fn commit(&mut self) -> RepoResult<usize> {
        let started_at = Instant::now();
        let staged = std::mem::take(&mut self.pending);
        let staged_count = staged.len();
        if staged.is_empty() {
            return Ok(0);
        }

        let result = match self.mode {
            AuditCommitMode::Atomic => self.commit_atomic(staged),
            AuditCommitMode::TwoPhase => self.commit_two_phase(staged),
        };

        match &result {
            Ok(outcome) => info!(
                "event=uow_commit module=repo status=ok mode={} staged={} affected={} audited={} duration_ms={}",
                self.mode.as_str(),
                staged_count,
                outcome.affected,
                outcome.audited,
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=uow_commit module=repo status=error mode={} staged={} duration_ms={} error={}",
                self.mode.as_str(),
                staged_count,
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result.map(|outcome| outcome.affected)
    }

    fn commit_atomic(&mut self, staged: Vec<PendingMutation>) -> RepoResult<CommitOutcome> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut pending = refresh_priors(&tx, staged)?;
        let mut drafts = self.auditor.capture(&pending);
        let ids = self.apply_all(&tx, &mut pending)?;
        Auditor::backfill(&mut drafts, &pending, &ids.per_mutation);
        Auditor::persist(&tx, &drafts)?;
        tx.commit()?;

        self.record_assigned(&pending, &ids.per_mutation);
        Ok(CommitOutcome {
            affected: ids.affected,
            audited: drafts.len(),
        })
    }

    fn commit_two_phase(&mut self, staged: Vec<PendingMutation>) -> RepoResult<CommitOutcome> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut pending = refresh_priors(&tx, staged)?;
        let mut drafts = self.auditor.capture(&pending);
        let ids = self.apply_all(&tx, &mut pending)?;
        tx.commit()?;
        self.record_assigned(&pending, &ids.per_mutation);

        Auditor::backfill(&mut drafts, &pending, &ids.per_mutation);
        let audit_result = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(RepoError::from)
            .and_then(|tx| {
                Auditor::persist(&tx, &drafts)?;
                tx.commit()?;
                Ok(())
            });

        if let Err(source) = audit_result {
            warn!(
                "event=audit_gap module=audit status=error committed_rows={} missing_entries={} error={}",
                ids.affected,
                drafts.len(),
                source
            );
            return Err(RepoError::AuditCommit {
                committed_rows: ids.affected,
                source: Box::new(source),
            });
        }
        Ok(CommitOutcome {
            affected: ids.affected,
            audited: drafts.len(),
        })
    }

    /// Applies every mutation in order, filling staged links as parents land.
    fn apply_all(&self, conn: &Connection, pending: &mut [PendingMutation]) -> RepoResult<AppliedIds> {
        let mut assigned: HashMap<usize, EntityId> = self
            .assigned
            .iter()
            .map(|(Staged(ticket), id)| (*ticket, *id))
            .collect();
        let mut affected = 0;
        let mut per_mutation = Vec::with_capacity(pending.len());
        for mutation in pending.iter_mut() {
            mutation.resolve_links(&assigned)?;
            let applied = apply_mutation(conn, mutation)?;
            if let (AuditAction::Create, Some(ticket)) = (mutation.action, mutation.ticket) {
                assigned.insert(ticket, applied.id);
            }
            affected += applied.rows;
            per_mutation.push(applied.id);
        }
        Ok(AppliedIds {
            affected,
            per_mutation,
        })
    }

    fn record_assigned(&mut self, pending: &[PendingMutation], ids: &[EntityId]) {
        for (mutation, id) in pending.iter().zip(ids) {
            if let Some(ticket) = mutation.ticket {
                self.assigned.insert(Staged(ticket), *id);
            }
        }
    }

    fn stage(&mut self, mutation: PendingMutation) {
        self.pending.push(mutation);
    }

    fn issue_ticket(&mut self) -> usize {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }
}

struct CommitOutcome {
    affected: usize,
    audited: usize,
}

struct AppliedIds {
    affected: usize,
    /// Row id written by each pending mutation, in order.
    per_mutation: Vec<EntityId>,
}

/// Re-reads the committed prior of every update and delete on `conn`, then
/// drops updates that no longer change anything.
fn refresh_priors(conn: &Connection, staged: Vec<PendingMutation>) -> RepoResult<Vec<PendingMutation>> {
    let mut pending = Vec::with_capacity(staged.len());
    for mut mutation in staged {
        mutation.refresh_prior(conn)?;
        if mutation.is_effective() {
            pending.push(mutation);
        }
    }
    Ok(pending)
}

/// `StorageGateway<T>` view over a unit of work.
pub struct EntitySet<'u, 'conn, T: Entity> {
    uow: &'u mut UnitOfWork<'conn>,
    _kind: PhantomData<T>,
}

impl<T: Entity> EntitySet<'_, '_, T> {
    /// Stages an insert whose `field` takes the id assigned to `parent`.
    ///
    /// `parent` may be staged in the same commit, ahead of this insert, or
    /// already committed by this unit of work.
    pub fn add_linked(&mut self, entity: T, field: &'static str, parent: Staged) -> RepoResult<Staged> {
        entity.validate()?;
        let ticket = self.uow.issue_ticket();
        let mutation = PendingMutation::create(&entity, ticket)?.link(field, parent.0)?;
        self.uow.stage(mutation);
        Ok(Staged(ticket))
    }

    fn require_committed(&self, id: EntityId) -> RepoResult<T> {
        load_by_id::<T>(self.uow.conn, id)?.ok_or(RepoError::NotFound { kind: T::KIND, id })
    }
}

fn ensure_gateway_update(kind: EntityKind) -> RepoResult<()> {
    if kind.allows_gateway_update() {
        Ok(())
    } else {
        Err(RepoError::GatewayForbidden {
            kind,
            action: AuditAction::Update,
        })
    }
}

fn ensure_gateway_delete(kind: EntityKind) -> RepoResult<()> {
    if kind.allows_gateway_delete() {
        Ok(())
    } else {
        Err(RepoError::GatewayForbidden {
            kind,
            action: AuditAction::Delete,
        })
    }
}

impl<T: Entity> StorageGateway<T> for EntitySet<'_, '_, T> {
    fn get_by_id(&self, id: EntityId) -> RepoResult<Option<T>> {
        load_by_id(self.uow.conn, id)
    }

    fn get_all(&self) -> RepoResult<Vec<T>> {
        load_where(self.uow.conn, None, "id ASC", [])
    }

    fn find(&self, predicate: &dyn Fn(&T) -> bool) -> RepoResult<Vec<T>> {
        let mut rows = self.get_all()?;
        rows.retain(|row| predicate(row));
        Ok(rows)
    }

    fn add(&mut self, entity: T) -> RepoResult<Staged> {
        entity.validate()?;
        let ticket = self.uow.issue_ticket();
        self.uow.stage(PendingMutation::create(&entity, ticket)?);
        Ok(Staged(ticket))
    }

    fn add_range(&mut self, entities: Vec<T>) -> RepoResult<Vec<Staged>> {
        let mut mutations = Vec::with_capacity(entities.len());
        for entity in &entities {
            entity.validate()?;
            mutations.push(PendingMutation::create(entity, 0)?);
        }

        let mut tickets = Vec::with_capacity(mutations.len());
        for mut mutation in mutations {
            let ticket = self.uow.issue_ticket();
            mutation.ticket = Some(ticket);
            self.uow.stage(mutation);
            tickets.push(Staged(ticket));
        }
        Ok(tickets)
    }

    fn update(&mut self, entity: &T) -> RepoResult<()> {
        ensure_gateway_update(T::KIND)?;
        let id = entity.id().ok_or(RepoError::Unsaved(T::KIND))?;
        entity.validate()?;
        let prior = self.require_committed(id)?;
        self.uow.stage(PendingMutation::update(&prior, entity)?);
        Ok(())
    }

    fn remove(&mut self, id: EntityId) -> RepoResult<()> {
        ensure_gateway_delete(T::KIND)?;
        let prior = self.require_committed(id)?;
        self.uow.stage(PendingMutation::delete(&prior)?);
        Ok(())
    }

    fn remove_range(&mut self, ids: &[EntityId]) -> RepoResult<()> {
        ensure_gateway_delete(T::KIND)?;
        let mut mutations = Vec::with_capacity(ids.len());
        for id in ids {
            let prior = self.require_committed(*id)?;
            mutations.push(PendingMutation::delete(&prior)?);
        }
        for mutation in mutations {
            self.uow.stage(mutation);
        }
        Ok(())
    }

    fn commit(&mut self) -> RepoResult<usize> {
        self.uow.commit()
    }
}
