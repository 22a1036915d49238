//! Employee repository.

use crate::context::DbContext;
use crate::error::DataResult;
use crate::model::employee::Employee;
use crate::model::entity::EntityId;
use crate::repo::base::{Repository, SearchRepository};
use crate::repo::query::Filter;

/// Search criteria; absent or empty fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmployeeCriteria {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub company_id: Option<EntityId>,
    pub department_id: Option<EntityId>,
}

pub struct EmployeeRepository<'ctx> {
    repo: Repository<'ctx, Employee>,
}

impl<'ctx> EmployeeRepository<'ctx> {
    pub fn new(ctx: &'ctx mut DbContext) -> Self {
        Self {
            repo: Repository::new(ctx),
        }
    }

    /// Generic CRUD for employees.
    pub fn crud(&mut self) -> &mut Repository<'ctx, Employee> {
        &mut self.repo
    }

    /// Lists the employees of one company, newest first.
    pub fn by_company(&self, company_id: EntityId) -> DataResult<Vec<Employee>> {
        self.repo
            .search(&Filter::new().eq("company_id", company_id), None)
    }
}

impl<'ctx> SearchRepository<'ctx> for EmployeeRepository<'ctx> {
    type Entity = Employee;
    type Criteria = EmployeeCriteria;

    const RANGE_COLUMN: &'static str = "birth_date";

    fn repository(&self) -> &Repository<'ctx, Employee> {
        &self.repo
    }

    fn criteria_filter(criteria: &EmployeeCriteria) -> Filter {
        Filter::new()
            .eq_text("name", criteria.name.as_deref())
            .eq_text("address", criteria.address.as_deref())
            .eq_text("phone", criteria.phone.as_deref())
            .eq_opt("company_id", criteria.company_id)
            .eq_opt("department_id", criteria.department_id)
    }
}
