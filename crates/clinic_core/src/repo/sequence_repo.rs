//! Period-scoped document numbering (`YYYY-NNNN`).
//!
//! # Responsibility
//! - Issue budget and invoice numbers that are unique per period and kind.
//!
//! # Invariants
//! - Each increment runs in one IMMEDIATE transaction; SQLite's writer lock
//!   serialises concurrent callers across connections.
//! - A new value is always greater than both the stored counter and the
//!   highest number already present in the owning table for that period.
//! - Values may skip (a caller can drop an issued number) but never repeat.

use super::{ensure_connection_ready, RepoError, RepoResult};
use chrono::Datelike;
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

static DOCUMENT_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{4,})$").expect("valid document number regex"));

/// Document families with their own numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    Budget,
    Invoice,
}

impl SequenceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Budget => "budget",
            Self::Invoice => "invoice",
        }
    }

    /// Table and column holding numbers already issued for this kind.
    const fn issued_column(self) -> (&'static str, &'static str) {
        match self {
            Self::Budget => ("budgets", "number"),
            Self::Invoice => ("clinical_entries", "invoice_number"),
        }
    }
}

/// Sequence generator contract.
pub trait SequenceRepository {
    /// Reserves and returns the next value for `(kind, period)`.
    fn next_value(&self, kind: SequenceKind, period: i32) -> RepoResult<i64>;

    /// Highest value issued so far for `(kind, period)`; zero when none.
    fn current_value(&self, kind: SequenceKind, period: i32) -> RepoResult<i64>;

    /// Reserves the next value and formats it as `YYYY-NNNN`.
    fn next_number(&self, kind: SequenceKind, period: i32) -> RepoResult<String> {
        let value = self.next_value(kind, period)?;
        Ok(format_document_number(period, value))
    }

    /// Next budget number for the current local calendar year.
    fn next_budget_number(&self) -> RepoResult<String> {
        self.next_number(SequenceKind::Budget, current_period())
    }
}

/// SQLite-backed sequence generator over `sequence_counters`.
pub struct SqliteSequenceRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSequenceRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl SequenceRepository for SqliteSequenceRepository<'_> {
    fn next_value(&self, kind: SequenceKind, period: i32) -> RepoResult<i64> {
        ensure_period(period)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let last_value = read_high_water_mark(&tx, kind, period)?;
        let next = last_value.checked_add(1).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "sequence {} exhausted for period {period}",
                kind.as_str()
            ))
        })?;

        tx.execute(
            "INSERT INTO sequence_counters (kind, period, last_value)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (kind, period) DO UPDATE SET last_value = excluded.last_value;",
            params![kind.as_str(), period, next],
        )?;
        tx.commit()?;

        info!(
            "event=sequence_next module=sequence status=ok kind={} period={} value={}",
            kind.as_str(),
            period,
            next
        );
        Ok(next)
    }

    fn current_value(&self, kind: SequenceKind, period: i32) -> RepoResult<i64> {
        ensure_period(period)?;
        read_high_water_mark(self.conn, kind, period)
    }
}

/// `max(stored counter, highest issued number in the owning table)`.
fn read_high_water_mark(conn: &Connection, kind: SequenceKind, period: i32) -> RepoResult<i64> {
    let counter: i64 = conn
        .query_row(
            "SELECT last_value
             FROM sequence_counters
             WHERE kind = ?1 AND period = ?2;",
            params![kind.as_str(), period],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);
    Ok(counter.max(max_issued(conn, kind, period)?))
}

fn max_issued(conn: &Connection, kind: SequenceKind, period: i32) -> RepoResult<i64> {
    let (table, column) = kind.issued_column();
    let mut stmt = conn.prepare(&format!(
        "SELECT {column} FROM {table} WHERE {column} LIKE ?1;"
    ))?;
    let mut rows = stmt.query([format!("{period:04}-%")])?;

    let mut highest = 0;
    while let Some(row) = rows.next()? {
        let number: String = row.get(0)?;
        if let Some((issued_period, value)) = parse_document_number(&number) {
            if issued_period == period {
                highest = highest.max(value);
            }
        }
    }
    Ok(highest)
}

fn ensure_period(period: i32) -> RepoResult<()> {
    if !(0..=9999).contains(&period) {
        return Err(RepoError::InvalidData(format!(
            "sequence period {period} is outside 0..=9999"
        )));
    }
    Ok(())
}

/// Formats `value` as `YYYY-NNNN`, widening past four digits when needed.
pub fn format_document_number(period: i32, value: i64) -> String {
    format!("{period:04}-{value:04}")
}

/// Parses `YYYY-NNNN` into `(period, value)`.
pub fn parse_document_number(number: &str) -> Option<(i32, i64)> {
    let captures = DOCUMENT_NUMBER_RE.captures(number.trim())?;
    let period = captures.get(1)?.as_str().parse().ok()?;
    let value = captures.get(2)?.as_str().parse().ok()?;
    Some((period, value))
}

/// Current local calendar year.
pub fn current_period() -> i32 {
    chrono::Local::now().year()
}
