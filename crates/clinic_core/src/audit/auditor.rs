use super::identity::IdentityProvider;
use crate::model::audit::AuditAction;
use crate::model::kind::EntityKind;
use crate::model::timestamp::from_epoch_millis;
use crate::model::EntityId;
use crate::repo::{Entity, PendingMutation, RepoResult};
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};

const DEFAULT_SYSTEM_ACTOR: &str = "system";

static LAST_CAPTURE_MS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Audit entry built before the business commit, persisted after it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AuditDraft {
    pub(crate) timestamp_utc: DateTime<Utc>,
    pub(crate) actor: String,
    pub(crate) action: AuditAction,
    pub(crate) entity_kind: EntityKind,
    pub(crate) entity_id: Option<EntityId>,
    pub(crate) payload: Value,
    /// Index of the pending mutation this draft describes.
    pub(crate) source: usize,
}

/// Builds and persists audit entries for watched mutations.
pub struct Auditor<'a> {
    identity: &'a dyn IdentityProvider,
    system_actor: String,
}

impl<'a> Auditor<'a> {
    pub fn new(identity: &'a dyn IdentityProvider) -> Self {
        Self {
            identity,
            system_actor: DEFAULT_SYSTEM_ACTOR.to_string(),
        }
    }

    /// Replaces the actor recorded when nobody is signed in.
    pub fn with_system_actor(mut self, system_actor: impl Into<String>) -> Self {
        let system_actor = system_actor.into();
        if !system_actor.trim().is_empty() {
            self.system_actor = system_actor;
        }
        self
    }

    /// Actor to attribute right now: the signed-in identity or the system tag.
    pub fn resolve_actor(&self) -> String {
        self.identity
            .current_actor()
            .map(|actor| actor.trim().to_string())
            .filter(|actor| !actor.is_empty())
            .unwrap_or_else(|| self.system_actor.clone())
    }

    /// Builds one draft per effective mutation on a watched kind.
    pub(crate) fn capture(&self, pending: &[PendingMutation]) -> Vec<AuditDraft> {
        let actor = self.resolve_actor();
        let drafts: Vec<AuditDraft> = pending
            .iter()
            .enumerate()
            .filter(|(_, mutation)| mutation.kind.is_watched() && mutation.is_effective())
            .map(|(source, mutation)| AuditDraft {
                timestamp_utc: capture_time(),
                actor: actor.clone(),
                action: mutation.action,
                entity_kind: mutation.kind,
                entity_id: mutation.target,
                payload: payload_for(mutation),
                source,
            })
            .collect();

        debug!(
            "event=audit_capture module=audit status=ok pending={} drafts={}",
            pending.len(),
            drafts.len()
        );
        drafts
    }

    /// Fills in store-assigned ids for creates.
    ///
    /// `assigned[i]` is the id written by `pending[i]`. Create payloads are
    /// rebuilt from the applied snapshot so linked foreign keys show their
    /// resolved ids.
    pub(crate) fn backfill(
        drafts: &mut [AuditDraft],
        pending: &[PendingMutation],
        assigned: &[EntityId],
    ) {
        for draft in drafts
            .iter_mut()
            .filter(|draft| draft.action == AuditAction::Create)
        {
            let Some(id) = assigned.get(draft.source).copied() else {
                continue;
            };
            draft.entity_id = Some(id);
            if let Some(mutation) = pending.get(draft.source) {
                draft.payload = payload_for(mutation);
            }
            if let Value::Object(fields) = &mut draft.payload {
                fields.insert("id".to_string(), Value::from(id));
            }
        }
    }

    /// Inserts drafts into `audit_entries`; returns the number written.
    pub(crate) fn persist(conn: &Connection, drafts: &[AuditDraft]) -> RepoResult<usize> {
        if drafts.is_empty() {
            return Ok(0);
        }

        let mut stmt = conn.prepare_cached(
            "INSERT INTO audit_entries (
                timestamp_utc,
                actor,
                action_kind,
                entity_kind,
                entity_id,
                diff
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        )?;
        for draft in drafts {
            stmt.execute(params![
                draft.timestamp_utc.timestamp_millis(),
                draft.actor,
                draft.action.as_str(),
                draft.entity_kind.as_str(),
                draft.entity_id,
                serde_json::to_string(&draft.payload)?,
            ])?;
        }
        Ok(drafts.len())
    }

    /// Captures and persists the delete entry for `prior` on `conn`.
    ///
    /// Used by ledger operations that delete inside their own transaction.
    pub(crate) fn record_delete<T: Entity>(&self, conn: &Connection, prior: &T) -> RepoResult<usize> {
        if !T::KIND.is_watched() {
            return Ok(0);
        }
        let mutation = PendingMutation::delete(prior)?;
        let drafts = self.capture(std::slice::from_ref(&mutation));
        Self::persist(conn, &drafts)
    }
}

fn payload_for(mutation: &PendingMutation) -> Value {
    match mutation.action {
        AuditAction::Create => Value::Object(mutation.after.clone().unwrap_or_default()),
        AuditAction::Delete => Value::Object(mutation.before.clone().unwrap_or_default()),
        AuditAction::Update => {
            let empty = Map::new();
            let before = mutation.before.as_ref().unwrap_or(&empty);
            let after = mutation.after.as_ref().unwrap_or(&empty);
            Value::Object(field_diff(before, after))
        }
    }
}

/// `{field: {"old": .., "new": ..}}` for every field whose value changed.
fn field_diff(before: &Map<String, Value>, after: &Map<String, Value>) -> Map<String, Value> {
    let fields: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    let mut diff = Map::new();
    for field in fields {
        let old = before.get(field).unwrap_or(&Value::Null);
        let new = after.get(field).unwrap_or(&Value::Null);
        if old != new {
            diff.insert(field.clone(), json!({ "old": old, "new": new }));
        }
    }
    diff
}

/// Current UTC time in whole milliseconds, never earlier than the last capture.
fn capture_time() -> DateTime<Utc> {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_CAPTURE_MS.fetch_max(now, Ordering::SeqCst);
    from_epoch_millis(previous.max(now)).unwrap_or_else(Utc::now)
}
