//! Repository layer: storage gateway, ledger, sequences and audit history.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository writes run `Entity::validate()` before persistence.
//! - Repositories refuse connections that are not migrated to the schema
//!   version this build expects.
//! - Multi-row writes run inside one IMMEDIATE transaction and roll back
//!   entirely on any failure.

mod entity;
mod error;
mod mutation;

pub mod audit_repo;
pub mod ledger_repo;
pub mod sequence_repo;
pub mod unit_of_work;

pub use entity::{Entity, RowColumns};
pub use error::{RepoError, RepoResult};
pub(crate) use entity::{aliased_columns, select_sql};
pub(crate) use mutation::PendingMutation;

use crate::db::migrations::{current_user_version, latest_version};
use crate::model::EntityId;
use rusqlite::{Connection, OptionalExtension};

const REQUIRED_TABLES: [&str; 10] = [
    "patients",
    "users",
    "clinical_entries",
    "payments",
    "allocations",
    "budgets",
    "treatment_plan_items",
    "linked_documents",
    "audit_entries",
    "sequence_counters",
];

/// Verifies `conn` carries the schema this build writes to.
pub fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

/// Loads one committed row by id.
pub(crate) fn load_by_id<T: Entity>(conn: &Connection, id: EntityId) -> RepoResult<Option<T>> {
    let sql = format!("{} WHERE id = ?1;", select_sql::<T>());
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(T::from_row(row)?)),
        None => Ok(None),
    }
}

/// Loads rows matching an optional `WHERE` clause, ordered by `order_by`.
pub(crate) fn load_where<T: Entity, P: rusqlite::Params>(
    conn: &Connection,
    filter: Option<&str>,
    order_by: &str,
    params: P,
) -> RepoResult<Vec<T>> {
    let mut sql = select_sql::<T>();
    if let Some(filter) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(order_by);
    sql.push(';');

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params)?;
    let mut entities = Vec::new();
    while let Some(row) = rows.next()? {
        entities.push(T::from_row(row)?);
    }
    Ok(entities)
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1;",
            [table],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use super::{ensure_connection_ready, RepoError};
    use crate::db::open_db_in_memory;
    use rusqlite::Connection;

    #[test]
    fn migrated_connection_is_ready() {
        let conn = open_db_in_memory().unwrap();
        ensure_connection_ready(&conn).unwrap();
    }

    #[test]
    fn raw_connection_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let err = ensure_connection_ready(&conn).unwrap_err();
        assert!(matches!(
            err,
            RepoError::UninitializedConnection {
                actual_version: 0,
                ..
            }
        ));
    }

    #[test]
    fn dropped_table_is_reported() {
        let conn = open_db_in_memory().unwrap();
        conn.execute_batch("DROP TABLE sequence_counters;").unwrap();
        let err = ensure_connection_ready(&conn).unwrap_err();
        assert!(matches!(err, RepoError::MissingRequiredTable("sequence_counters")));
    }
}
