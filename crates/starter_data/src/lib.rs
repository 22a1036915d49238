//! Data-access layer for the starter backend.
//!
//! Repositories stage changes in a `DbContext`; committing the context
//! writes them in one transaction and mirrors every insert, update and
//! delete of a registered entity type into its audit table.

pub mod audit;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;

pub use audit::registry::{init_registry, starter_registry, AuditMapping, AuditRegistry};
pub use config::DataConfig;
pub use context::{ConcurrencyMode, ContextOptions, DbContext, EntityState, Tracked};
pub use error::{DataError, DataResult, ValidationFailure};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::audit::{
    AuditEntity, AuditOperation, AuditStamp, CompanyAudit, DepartmentAudit, EmployeeAudit,
};
pub use model::company::Company;
pub use model::department::Department;
pub use model::employee::Employee;
pub use model::entity::{Entity, EntityId, FieldError};
pub use repo::audit_trail::AuditTrail;
pub use repo::base::{Repository, SearchRepository};
pub use repo::company_repo::{CompanyCriteria, CompanyRepository};
pub use repo::department_repo::{DepartmentCriteria, DepartmentRepository};
pub use repo::employee_repo::{EmployeeCriteria, EmployeeRepository};
pub use repo::query::{DateRange, Filter, Page};

/// Returns the data crate version.
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
