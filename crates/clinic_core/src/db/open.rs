//! Connection bootstrap for the clinic store.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`; allocation integrity relies
//!   on it.
//! - Returned connections have every migration applied.
//! - Concurrent writers on separate connections wait up to the busy timeout
//!   for SQLite's writer lock instead of failing immediately.

use super::migrations::apply_migrations;
use super::{DbError, DbResult, MAX_BUSY_TIMEOUT, MIN_BUSY_TIMEOUT};
use crate::config::CoreConfig;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a SQLite database file and applies all pending migrations.
///
/// # Side effects
/// - Creates the file when it does not exist.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_with("file", DEFAULT_BUSY_TIMEOUT, || Connection::open(path))
}

/// Opens an in-memory SQLite database and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_with("memory", DEFAULT_BUSY_TIMEOUT, Connection::open_in_memory)
}

/// Opens the database described by `config`, honouring its busy timeout.
///
/// An out-of-range busy timeout is rejected before the file is touched.
pub fn open_db_with_config(config: &CoreConfig) -> DbResult<Connection> {
    let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
    if !(MIN_BUSY_TIMEOUT..=MAX_BUSY_TIMEOUT).contains(&busy_timeout) {
        return Err(DbError::InvalidBusyTimeout {
            millis: config.busy_timeout_ms,
        });
    }
    let path = config.database_path.as_path();
    open_with("file", busy_timeout, || Connection::open(path))
}

fn open_with<F>(mode: &'static str, busy_timeout: Duration, open: F) -> DbResult<Connection>
where
    F: FnOnce() -> rusqlite::Result<Connection>,
{
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = match open() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    if let Err(err) = bootstrap_connection(&mut conn, busy_timeout) {
        error!(
            "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={}",
            started_at.elapsed().as_millis(),
            err
        );
        return Err(err);
    }

    info!(
        "event=db_open module=db status=ok mode={mode} duration_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(conn)
}

fn bootstrap_connection(conn: &mut Connection, busy_timeout: Duration) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|source| DbError::Setup {
            setting: "foreign_keys",
            source,
        })?;
    conn.busy_timeout(busy_timeout)
        .map_err(|source| DbError::Setup {
            setting: "busy_timeout",
            source,
        })?;
    apply_migrations(conn)?;
    Ok(())
}
