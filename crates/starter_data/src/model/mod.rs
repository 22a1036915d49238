//! Entity and audit data model.
//!
//! # Responsibility
//! - Define the plain records persisted by repositories.
//! - Define the mirrored audit records written on every commit.
//!
//! # Invariants
//! - Every entity carries `id`, `row_version` and `created_on`.
//! - Column lists are static and match the migration schema.

pub mod audit;
pub mod company;
pub mod department;
pub mod employee;
pub mod entity;
