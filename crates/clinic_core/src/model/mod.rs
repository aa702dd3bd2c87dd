//! Domain model for the clinic ledger and its audit trail.
//!
//! # Responsibility
//! - Define the records the persistence core stores and audits.
//! - Own field-level validation that must hold before any write.
//!
//! # Invariants
//! - Money is a fixed-point `Decimal` with at most two fractional digits and
//!   never passes through binary floating point.
//! - Store ids are `None` until the store assigns them.
//! - Model types carry no SQL; row mapping lives in `repo::entity`.

pub mod audit;
pub mod billing;
pub mod budget;
pub mod document;
pub mod kind;
pub mod money;
pub mod patient;
pub mod staff;
pub mod timestamp;
mod validation;

pub use validation::ValidationError;

/// Store-assigned row identifier.
pub type EntityId = i64;
