//! Clinic store bootstrap: connection setup and schema migrations.
//!
//! # Responsibility
//! - Hand out connections that are configured and migrated before any ledger
//!   or audit row is read.
//! - Report setup failures with the setting that failed.
//!
//! # Invariants
//! - The schema version lives in `PRAGMA user_version`.
//! - A store written by a newer build is refused, never downgraded.
//! - Busy timeouts stay within `MIN_BUSY_TIMEOUT..=MAX_BUSY_TIMEOUT`, so
//!   concurrent writers always queue on the lock for a bounded time.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, open_db_with_config};

pub const MIN_BUSY_TIMEOUT: Duration = Duration::from_millis(1);
pub const MAX_BUSY_TIMEOUT: Duration = Duration::from_secs(600);

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    /// SQLite failure while opening or migrating.
    Sqlite(rusqlite::Error),
    /// A connection setting could not be applied.
    Setup {
        setting: &'static str,
        source: rusqlite::Error,
    },
    /// Configured busy timeout is outside the accepted range.
    InvalidBusyTimeout { millis: u64 },
    /// The store was migrated by a newer build.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Setup { setting, source } => {
                write!(f, "failed to apply connection setting `{setting}`: {source}")
            }
            Self::InvalidBusyTimeout { millis } => write!(
                f,
                "busy timeout {millis} ms is outside {}..={} ms",
                MIN_BUSY_TIMEOUT.as_millis(),
                MAX_BUSY_TIMEOUT.as_millis()
            ),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "store schema version {db_version} is newer than this build supports ({latest_supported})"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) | Self::Setup { source: err, .. } => Some(err),
            Self::InvalidBusyTimeout { .. } | Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
