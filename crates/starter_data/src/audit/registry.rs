//! Entity type to audit type registry.
//!
//! # Invariants
//! - Registration is idempotent: an existing mapping is never replaced.
//! - The process registry is built once by `init_registry` and only read
//!   afterwards, so lookups take no lock.

use crate::model::audit::{AuditEntity, CompanyAudit, DepartmentAudit, EmployeeAudit};
use crate::model::company::Company;
use crate::model::department::Department;
use crate::model::employee::Employee;
use crate::model::entity::{all_columns, Entity, ROW_VERSION_COLUMN};
use log::info;
use once_cell::sync::OnceCell;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

static PROCESS_REGISTRY: OnceCell<Arc<AuditRegistry>> = OnceCell::new();

/// How one entity type is mirrored into its audit table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditMapping {
    pub entity_name: &'static str,
    pub audit_type: TypeId,
    pub audit_table: &'static str,
    /// Columns present on both sides; `row_version` is stamped instead.
    pub copied_columns: Vec<&'static str>,
}

#[derive(Debug, Default)]
pub struct AuditRegistry {
    mappings: HashMap<TypeId, AuditMapping>,
}

impl AuditRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps entity type `E` to audit type `A`.
    ///
    /// Returns `false` and leaves the registry untouched when `E` already
    /// has a mapping.
    pub fn register<E: Entity, A: AuditEntity>(&mut self) -> bool {
        let key = TypeId::of::<E>();
        if self.mappings.contains_key(&key) {
            return false;
        }

        let entity_columns = all_columns::<E>();
        let copied_columns = A::COLUMNS
            .iter()
            .copied()
            .filter(|column| *column != ROW_VERSION_COLUMN && entity_columns.contains(column))
            .collect();

        self.mappings.insert(
            key,
            AuditMapping {
                entity_name: E::ENTITY_NAME,
                audit_type: TypeId::of::<A>(),
                audit_table: A::TABLE,
                copied_columns,
            },
        );
        true
    }

    pub fn lookup<E: Entity>(&self) -> Option<&AuditMapping> {
        self.lookup_type(TypeId::of::<E>())
    }

    pub fn lookup_type(&self, entity_type: TypeId) -> Option<&AuditMapping> {
        self.mappings.get(&entity_type)
    }

    pub fn contains<E: Entity>(&self) -> bool {
        self.mappings.contains_key(&TypeId::of::<E>())
    }

    /// Iterates the registered mappings in no particular order.
    pub fn mappings(&self) -> impl Iterator<Item = &AuditMapping> {
        self.mappings.values()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Builds a registry holding the built-in audit mappings.
pub fn starter_registry() -> AuditRegistry {
    let mut registry = AuditRegistry::new();
    registry.register::<Company, CompanyAudit>();
    registry.register::<Employee, EmployeeAudit>();
    registry.register::<Department, DepartmentAudit>();
    registry
}

/// Returns the process-wide registry, building it on first call.
///
/// Call once during startup; later calls return the same instance.
pub fn init_registry() -> Arc<AuditRegistry> {
    Arc::clone(PROCESS_REGISTRY.get_or_init(|| {
        let registry = starter_registry();
        info!(
            "event=registry_init module=audit status=ok mappings={}",
            registry.len()
        );
        Arc::new(registry)
    }))
}

#[cfg(test)]
mod tests {
    use super::{init_registry, starter_registry, AuditRegistry};
    use crate::model::audit::{CompanyAudit, DepartmentAudit, EmployeeAudit};
    use crate::model::company::Company;
    use crate::model::department::Department;
    use crate::model::employee::Employee;
    use std::any::TypeId;
    use std::sync::Arc;

    #[test]
    fn registers_and_looks_up_mapping() {
        let mut registry = AuditRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.register::<Company, CompanyAudit>());

        let mapping = registry.lookup::<Company>().expect("company is mapped");
        assert_eq!(mapping.entity_name, "Company");
        assert_eq!(mapping.audit_table, "company_audit");
        assert_eq!(mapping.audit_type, TypeId::of::<CompanyAudit>());
        assert!(registry.lookup::<Employee>().is_none());
    }

    #[test]
    fn second_registration_is_a_no_op() {
        let mut registry = AuditRegistry::new();
        assert!(registry.register::<Company, CompanyAudit>());
        let before = registry.lookup::<Company>().cloned();

        assert!(!registry.register::<Company, CompanyAudit>());
        assert!(!registry.register::<Company, DepartmentAudit>());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup::<Company>().cloned(), before);
    }

    #[test]
    fn copied_columns_skip_stamped_row_version() {
        let registry = starter_registry();
        let mapping = registry.lookup::<Employee>().expect("employee is mapped");
        assert_eq!(
            mapping.copied_columns,
            vec![
                "id",
                "name",
                "birth_date",
                "address",
                "phone",
                "company_id",
                "department_id",
                "created_on",
            ]
        );
    }

    #[test]
    fn copied_columns_are_intersection_of_both_shapes() {
        // Department has no creation_date column, so it is dropped.
        let mut registry = AuditRegistry::new();
        registry.register::<Department, CompanyAudit>();
        let mapping = registry.lookup::<Department>().expect("mapped");
        assert!(!mapping.copied_columns.contains(&"creation_date"));
        assert!(mapping.copied_columns.contains(&"name"));
    }

    #[test]
    fn starter_registry_maps_all_entities() {
        let registry = starter_registry();
        assert_eq!(registry.len(), 3);
        assert!(registry.contains::<Company>());
        assert!(registry.contains::<Employee>());
        assert!(registry.contains::<Department>());
        assert_eq!(
            registry
                .lookup::<Employee>()
                .map(|mapping| mapping.audit_type),
            Some(TypeId::of::<EmployeeAudit>())
        );
    }

    #[test]
    fn process_registry_is_initialized_once() {
        let first = init_registry();
        let second = init_registry();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 3);
    }
}
