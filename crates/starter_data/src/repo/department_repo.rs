//! Department repository.
//!
//! Departments carry no business date, so searches range over `created_on`.

use crate::context::DbContext;
use crate::model::department::Department;
use crate::repo::base::{Repository, SearchRepository};
use crate::repo::query::Filter;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepartmentCriteria {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
}

pub struct DepartmentRepository<'ctx> {
    repo: Repository<'ctx, Department>,
}

impl<'ctx> DepartmentRepository<'ctx> {
    pub fn new(ctx: &'ctx mut DbContext) -> Self {
        Self {
            repo: Repository::new(ctx),
        }
    }

    pub fn crud(&mut self) -> &mut Repository<'ctx, Department> {
        &mut self.repo
    }
}

impl<'ctx> SearchRepository<'ctx> for DepartmentRepository<'ctx> {
    type Entity = Department;
    type Criteria = DepartmentCriteria;

    const RANGE_COLUMN: &'static str = "created_on";

    fn repository(&self) -> &Repository<'ctx, Department> {
        &self.repo
    }

    fn criteria_filter(criteria: &DepartmentCriteria) -> Filter {
        Filter::new()
            .eq_text("name", criteria.name.as_deref())
            .eq_text("address", criteria.address.as_deref())
            .eq_text("phone", criteria.phone.as_deref())
    }
}
