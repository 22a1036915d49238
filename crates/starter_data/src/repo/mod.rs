//! Repository layer over the persistence context.
//!
//! # Responsibility
//! - Offer generic CRUD staging plus filtered, paged reads per entity.
//! - Keep SQL composition out of callers.
//!
//! # Invariants
//! - Repositories stage writes in the context; nothing is written until
//!   the context commits.
//! - Reads return untracked copies; use `find` to get a tracked handle.

pub mod audit_trail;
pub mod base;
pub mod company_repo;
pub mod department_repo;
pub mod employee_repo;
pub mod query;
