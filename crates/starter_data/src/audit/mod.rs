//! Audit trail configuration.
//!
//! # Responsibility
//! - Decide which entity types are audited and into which table.
//! - Derive the copied column set once, at registration.
//!
//! # Invariants
//! - A type absent from the registry is written without audit rows.

pub mod registry;
