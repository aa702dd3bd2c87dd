//! Repository error taxonomy.
//!
//! SQLite result codes are sorted into the kinds callers act on differently:
//! constraint failures, interrupted queries, and transient lock/IO failures
//! that a caller may retry. The core itself never retries.

use crate::db::DbError;
use crate::model::audit::AuditAction;
use crate::model::kind::EntityKind;
use crate::model::{EntityId, ValidationError};
use rusqlite::ErrorCode;
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    /// Non-classified SQLite or bootstrap failure.
    Db(DbError),
    /// Entity failed validation before any write.
    Validation(ValidationError),
    /// Target row does not exist (or vanished before the write).
    NotFound { kind: EntityKind, id: EntityId },
    /// The storage gateway does not offer this action for this kind.
    GatewayForbidden {
        kind: EntityKind,
        action: AuditAction,
    },
    /// Uniqueness, foreign-key, check or trigger failure from the store.
    ConstraintViolation(String),
    /// Lock contention, IO or open failure; retry policy belongs to callers.
    Transient(rusqlite::Error),
    /// The query was cancelled through its `CancelToken`.
    Cancelled,
    /// Allocation would exceed the unallocated part of the payment.
    OverAllocation {
        payment_id: EntityId,
        available: Decimal,
        requested: Decimal,
    },
    /// Business rows committed but audit rows did not (two-phase mode only).
    AuditCommit {
        committed_rows: usize,
        source: Box<RepoError>,
    },
    /// Entity has no store id but the operation needs one.
    Unsaved(EntityKind),
    /// Connection is not migrated to the schema this build expects.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Connection reports the right version but lacks a table the core owns.
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be decoded into the domain model.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::GatewayForbidden { kind, action } => write!(
                f,
                "{} of {kind} is not available through the storage gateway",
                action.as_str()
            ),
            Self::ConstraintViolation(message) => write!(f, "constraint violation: {message}"),
            Self::Transient(err) => write!(f, "transient storage failure: {err}"),
            Self::Cancelled => write!(f, "query cancelled"),
            Self::OverAllocation {
                payment_id,
                available,
                requested,
            } => write!(
                f,
                "payment {payment_id} has {available} unallocated, cannot allocate {requested}"
            ),
            Self::AuditCommit {
                committed_rows,
                source,
            } => write!(
                f,
                "{committed_rows} row(s) committed without audit entries: {source}"
            ),
            Self::Unsaved(kind) => write!(f, "{kind} has no store id"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "missing required table `{table}`"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Transient(err) => Some(err),
            Self::AuditCommit { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl RepoError {
    /// Returns whether a caller-side retry may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::AuditCommit { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        let failure = match &value {
            rusqlite::Error::SqliteFailure(err, message) => Some((err.code, message.clone())),
            _ => None,
        };

        match failure {
            Some((ErrorCode::ConstraintViolation, message)) => {
                Self::ConstraintViolation(message.unwrap_or_else(|| value.to_string()))
            }
            Some((ErrorCode::OperationInterrupted, _)) => Self::Cancelled,
            Some((
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen
                | ErrorCode::DiskFull,
                _,
            )) => Self::Transient(value),
            _ => Self::Db(DbError::Sqlite(value)),
        }
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidData(format!("json encoding failed: {value}"))
    }
}
