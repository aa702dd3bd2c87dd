//! Read paths over persisted audit entries.
//!
//! # Invariants
//! - This module only reads `audit_entries`.
//! - Entity history is returned oldest first; filtered listings newest first.
//! - Listing limits default to 100 and clamp to 1000.

use super::{ensure_connection_ready, RepoError, RepoResult};
use crate::cancel::CancelToken;
use crate::model::audit::{AuditAction, AuditEntry};
use crate::model::kind::EntityKind;
use crate::model::timestamp::from_epoch_millis;
use crate::model::EntityId;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

const AUDIT_DEFAULT_LIMIT: u32 = 100;
const AUDIT_LIMIT_MAX: u32 = 1000;

const AUDIT_COLUMNS: &str = "id, timestamp_utc, actor, action_kind, entity_kind, entity_id, diff";

/// Filters for audit listings. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub entity_kind: Option<EntityKind>,
    pub actor: Option<String>,
    pub action: Option<AuditAction>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    /// Maximum rows to return. Defaults to 100 and clamps to 1000.
    pub limit: Option<u32>,
}

/// Audit history contract.
pub trait AuditRepository {
    /// Every entry recorded for one entity, oldest first.
    fn history_for(
        &self,
        kind: EntityKind,
        id: EntityId,
        cancel: &CancelToken,
    ) -> RepoResult<Vec<AuditEntry>>;
    /// Entries matching `query`, newest first.
    fn list_entries(&self, query: &AuditQuery, cancel: &CancelToken) -> RepoResult<Vec<AuditEntry>>;
}

/// SQLite-backed audit history reader.
pub struct SqliteAuditRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAuditRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl AuditRepository for SqliteAuditRepository<'_> {
    fn history_for(
        &self,
        kind: EntityKind,
        id: EntityId,
        cancel: &CancelToken,
    ) -> RepoResult<Vec<AuditEntry>> {
        cancel.run(self.conn, || {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {AUDIT_COLUMNS}
                 FROM audit_entries
                 WHERE entity_kind = ?1
                   AND entity_id = ?2
                 ORDER BY timestamp_utc ASC, id ASC;"
            ))?;
            let mut rows = stmt.query(params![kind.as_str(), id])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(parse_entry_row(row)?);
            }
            Ok(entries)
        })
    }

    fn list_entries(&self, query: &AuditQuery, cancel: &CancelToken) -> RepoResult<Vec<AuditEntry>> {
        let mut sql = format!("SELECT {AUDIT_COLUMNS} FROM audit_entries WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(kind) = query.entity_kind {
            sql.push_str(" AND entity_kind = ?");
            bind_values.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(actor) = query.actor.as_ref() {
            sql.push_str(" AND actor = ?");
            bind_values.push(Value::Text(actor.clone()));
        }
        if let Some(action) = query.action {
            sql.push_str(" AND action_kind = ?");
            bind_values.push(Value::Text(action.as_str().to_string()));
        }
        if let Some(since) = query.since {
            sql.push_str(" AND timestamp_utc >= ?");
            bind_values.push(Value::Integer(since.timestamp_millis()));
        }
        if let Some(until) = query.until {
            sql.push_str(" AND timestamp_utc < ?");
            bind_values.push(Value::Integer(until.timestamp_millis()));
        }

        sql.push_str(" ORDER BY timestamp_utc DESC, id DESC LIMIT ?;");
        bind_values.push(Value::Integer(i64::from(normalize_audit_limit(query.limit))));

        cancel.run(self.conn, || {
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(bind_values))?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(parse_entry_row(row)?);
            }
            Ok(entries)
        })
    }
}

/// Applies default and maximum bounds to a listing limit.
pub fn normalize_audit_limit(limit: Option<u32>) -> u32 {
    limit
        .unwrap_or(AUDIT_DEFAULT_LIMIT)
        .clamp(1, AUDIT_LIMIT_MAX)
}

fn parse_entry_row(row: &Row<'_>) -> RepoResult<AuditEntry> {
    let millis: i64 = row.get("timestamp_utc")?;
    let action: String = row.get("action_kind")?;
    let kind: String = row.get("entity_kind")?;

    Ok(AuditEntry {
        id: row.get("id")?,
        timestamp_utc: from_epoch_millis(millis).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid audit timestamp `{millis}`"))
        })?,
        actor: row.get("actor")?,
        action: AuditAction::parse(&action)
            .ok_or_else(|| RepoError::InvalidData(format!("invalid audit action `{action}`")))?,
        entity_kind: EntityKind::parse(&kind)
            .ok_or_else(|| RepoError::InvalidData(format!("invalid entity kind `{kind}`")))?,
        entity_id: row.get("entity_id")?,
        diff: row.get("diff")?,
    })
}
