//! Explicit pending-mutation arena entries.
//!
//! A unit of work records each staged write as a [`PendingMutation`] holding
//! the bind values plus JSON snapshots of the row before and after the write.
//! The auditor reads only this list; nothing is inferred from the store.
//!
//! The prior snapshot taken at staging time is provisional: the commit
//! re-reads it inside its own transaction before diffing.

use super::{load_by_id, Entity, RepoError, RepoResult};
use crate::model::audit::AuditAction;
use crate::model::kind::EntityKind;
use crate::model::EntityId;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use serde_json::Map;
use std::collections::HashMap;

pub(crate) type Snapshot = Map<String, serde_json::Value>;

/// Reads the committed row behind a mutation, typed per entity kind.
#[derive(Clone, Copy)]
pub(crate) struct PriorLoader(fn(&Connection, EntityId) -> RepoResult<Option<Snapshot>>);

impl PriorLoader {
    fn of<T: Entity>() -> Self {
        Self(committed_snapshot::<T>)
    }
}

impl std::fmt::Debug for PriorLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PriorLoader")
    }
}

/// Foreign-key column filled from the id of an earlier create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Link {
    pub(crate) field: &'static str,
    pub(crate) parent_ticket: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingMutation {
    pub(crate) kind: EntityKind,
    pub(crate) action: AuditAction,
    /// Row id; `None` for creates the store numbers.
    pub(crate) target: Option<EntityId>,
    pub(crate) columns: &'static [&'static str],
    pub(crate) values: Vec<Value>,
    pub(crate) before: Option<Snapshot>,
    pub(crate) after: Option<Snapshot>,
    /// Ticket handed back to the caller of `add`.
    pub(crate) ticket: Option<usize>,
    pub(crate) links: Vec<Link>,
    prior: PriorLoader,
}

/// Outcome of writing one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Applied {
    pub(crate) rows: usize,
    pub(crate) id: EntityId,
}

impl PendingMutation {
    pub(crate) fn create<T: Entity>(entity: &T, ticket: usize) -> RepoResult<Self> {
        Ok(Self {
            kind: T::KIND,
            action: AuditAction::Create,
            target: entity.id(),
            columns: T::COLUMNS,
            values: entity.encode()?,
            before: None,
            after: Some(snapshot(entity)?),
            ticket: Some(ticket),
            links: Vec::new(),
            prior: PriorLoader::of::<T>(),
        })
    }

    pub(crate) fn update<T: Entity>(prior: &T, entity: &T) -> RepoResult<Self> {
        let id = entity.id().ok_or(RepoError::Unsaved(T::KIND))?;
        Ok(Self {
            kind: T::KIND,
            action: AuditAction::Update,
            target: Some(id),
            columns: T::COLUMNS,
            values: entity.encode()?,
            before: Some(snapshot(prior)?),
            after: Some(snapshot(entity)?),
            ticket: None,
            links: Vec::new(),
            prior: PriorLoader::of::<T>(),
        })
    }

    pub(crate) fn delete<T: Entity>(prior: &T) -> RepoResult<Self> {
        let id = prior.id().ok_or(RepoError::Unsaved(T::KIND))?;
        Ok(Self {
            kind: T::KIND,
            action: AuditAction::Delete,
            target: Some(id),
            columns: T::COLUMNS,
            values: Vec::new(),
            before: Some(snapshot(prior)?),
            after: None,
            ticket: None,
            links: Vec::new(),
            prior: PriorLoader::of::<T>(),
        })
    }

    /// Fills `field` at commit time with the id assigned to `parent_ticket`.
    pub(crate) fn link(mut self, field: &'static str, parent_ticket: usize) -> RepoResult<Self> {
        if self.action != AuditAction::Create {
            return Err(RepoError::InvalidData(format!(
                "only creates can link to a staged parent, got {} of {}",
                self.action.as_str(),
                self.kind
            )));
        }
        if !self.columns.contains(&field) {
            return Err(RepoError::InvalidData(format!(
                "{} has no column `{field}`",
                self.kind
            )));
        }
        self.links.push(Link {
            field,
            parent_ticket,
        });
        Ok(self)
    }

    /// False for updates whose after-state equals the prior snapshot.
    pub(crate) fn is_effective(&self) -> bool {
        match (self.action, &self.before, &self.after) {
            (AuditAction::Update, Some(before), Some(after)) => before != after,
            _ => true,
        }
    }

    /// Replaces the prior snapshot with the row as committed on `conn` now.
    ///
    /// Fails with `NotFound` when the row vanished after it was staged.
    pub(crate) fn refresh_prior(&mut self, conn: &Connection) -> RepoResult<()> {
        if self.action == AuditAction::Create {
            return Ok(());
        }
        let id = self.target.ok_or(RepoError::Unsaved(self.kind))?;
        let current = (self.prior.0)(conn, id)?.ok_or(RepoError::NotFound {
            kind: self.kind,
            id,
        })?;
        self.before = Some(current);
        Ok(())
    }

    /// Writes linked parent ids into the bind values and the after snapshot.
    ///
    /// `assigned` maps tickets to ids of creates already applied.
    pub(crate) fn resolve_links(&mut self, assigned: &HashMap<usize, EntityId>) -> RepoResult<()> {
        for link in &self.links {
            let parent_id = assigned.get(&link.parent_ticket).copied().ok_or_else(|| {
                RepoError::InvalidData(format!(
                    "{}.{} links to a parent that was not written before it",
                    self.kind, link.field
                ))
            })?;
            let Some(index) = self.columns.iter().position(|column| *column == link.field) else {
                continue;
            };
            if let Some(value) = self.values.get_mut(index) {
                *value = Value::Integer(parent_id);
            }
            if let Some(after) = self.after.as_mut() {
                after.insert(link.field.to_string(), serde_json::Value::from(parent_id));
            }
        }
        Ok(())
    }
}

fn committed_snapshot<T: Entity>(conn: &Connection, id: EntityId) -> RepoResult<Option<Snapshot>> {
    load_by_id::<T>(conn, id)?
        .map(|row| snapshot(&row))
        .transpose()
}

/// Serializes `entity` into a field map.
pub(crate) fn snapshot<T: Serialize>(entity: &T) -> RepoResult<Snapshot> {
    match serde_json::to_value(entity)? {
        serde_json::Value::Object(fields) => Ok(fields),
        other => Err(RepoError::InvalidData(format!(
            "entity snapshot must be a JSON object, got `{other}`"
        ))),
    }
}

/// Writes one mutation on `conn`.
///
/// Updates and deletes that touch no row fail with `NotFound`: the row
/// vanished after it was staged.
pub(crate) fn apply_mutation(conn: &Connection, mutation: &PendingMutation) -> RepoResult<Applied> {
    let table = mutation.kind.table();
    match mutation.action {
        AuditAction::Create => {
            let mut columns: Vec<&str> = Vec::with_capacity(mutation.columns.len() + 1);
            let mut values: Vec<Value> = Vec::with_capacity(mutation.values.len() + 1);
            if let Some(id) = mutation.target {
                columns.push("id");
                values.push(Value::Integer(id));
            }
            columns.extend_from_slice(mutation.columns);
            values.extend(mutation.values.iter().cloned());

            let placeholders = (1..=values.len())
                .map(|index| format!("?{index}"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT INTO {table} ({}) VALUES ({placeholders});",
                columns.join(", ")
            );
            let rows = conn.execute(&sql, params_from_iter(values))?;
            Ok(Applied {
                rows,
                id: conn.last_insert_rowid(),
            })
        }
        AuditAction::Update => {
            let id = mutation.target.ok_or(RepoError::Unsaved(mutation.kind))?;
            let assignments = mutation
                .columns
                .iter()
                .enumerate()
                .map(|(index, column)| format!("{column} = ?{}", index + 1))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE {table} SET {assignments} WHERE id = ?{};",
                mutation.columns.len() + 1
            );
            let values = mutation
                .values
                .iter()
                .cloned()
                .chain(std::iter::once(Value::Integer(id)));
            let rows = conn.execute(&sql, params_from_iter(values))?;
            if rows == 0 {
                return Err(RepoError::NotFound {
                    kind: mutation.kind,
                    id,
                });
            }
            Ok(Applied { rows, id })
        }
        AuditAction::Delete => {
            let id = mutation.target.ok_or(RepoError::Unsaved(mutation.kind))?;
            let rows = conn.execute(&format!("DELETE FROM {table} WHERE id = ?1;"), [id])?;
            if rows == 0 {
                return Err(RepoError::NotFound {
                    kind: mutation.kind,
                    id,
                });
            }
            Ok(Applied { rows, id })
        }
    }
}
