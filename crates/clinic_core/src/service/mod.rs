//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Keep UI and report layers decoupled from storage details.

pub mod document_service;
pub mod ledger_service;
