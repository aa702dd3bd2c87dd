//! Change-tracking audit capture.
//!
//! # Responsibility
//! - Turn the pending mutations of a unit of work into audit entries.
//! - Resolve the acting identity at commit time.
//!
//! # Invariants
//! - Only watched entity kinds produce entries; no-op updates produce none.
//! - Audit entries are insert-only. The core never updates or deletes them.
//! - Capture timestamps never go backwards within one process.

mod auditor;
mod identity;

pub use auditor::Auditor;
pub use identity::{IdentityProvider, SessionIdentity, StaticIdentity, SystemIdentity};

use serde::{Deserialize, Serialize};

/// How audit rows are committed relative to the business rows they describe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCommitMode {
    /// Business and audit rows share one transaction.
    #[default]
    Atomic,
    /// Business rows commit first, audit rows in a second transaction.
    /// A failed second commit surfaces as `RepoError::AuditCommit`.
    TwoPhase,
}

impl AuditCommitMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Atomic => "atomic",
            Self::TwoPhase => "two_phase",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "atomic" => Some(Self::Atomic),
            "two_phase" | "two-phase" => Some(Self::TwoPhase),
            _ => None,
        }
    }
}
