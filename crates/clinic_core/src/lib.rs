//! Persistence core for the clinic: audited storage, ledger consistency and
//! document numbering.
//! This crate is the single source of truth for ledger and audit invariants.

pub mod audit;
pub mod cancel;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use audit::{
    AuditCommitMode, Auditor, IdentityProvider, SessionIdentity, StaticIdentity, SystemIdentity,
};
pub use cancel::CancelToken;
pub use config::{ConfigError, CoreConfig};
pub use db::{open_db, open_db_in_memory, open_db_with_config, DbError, DbResult};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::kind::EntityKind;
pub use model::{EntityId, ValidationError};
pub use repo::audit_repo::{AuditQuery, AuditRepository, SqliteAuditRepository};
pub use repo::ledger_repo::{
    ChargeListing, DeleteOutcome, LedgerRepository, PaymentListing, SqliteLedgerRepository,
};
pub use repo::sequence_repo::{SequenceKind, SequenceRepository, SqliteSequenceRepository};
pub use repo::unit_of_work::{EntitySet, Staged, StorageGateway, UnitOfWork};
pub use repo::{Entity, RepoError, RepoResult};
pub use service::document_service::DocumentService;
pub use service::ledger_service::LedgerService;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
