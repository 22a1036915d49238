//! Company repository.

use crate::context::DbContext;
use crate::model::company::Company;
use crate::repo::base::{Repository, SearchRepository};
use crate::repo::query::Filter;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanyCriteria {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
}

pub struct CompanyRepository<'ctx> {
    repo: Repository<'ctx, Company>,
}

impl<'ctx> CompanyRepository<'ctx> {
    pub fn new(ctx: &'ctx mut DbContext) -> Self {
        Self {
            repo: Repository::new(ctx),
        }
    }

    pub fn crud(&mut self) -> &mut Repository<'ctx, Company> {
        &mut self.repo
    }
}

impl<'ctx> SearchRepository<'ctx> for CompanyRepository<'ctx> {
    type Entity = Company;
    type Criteria = CompanyCriteria;

    const RANGE_COLUMN: &'static str = "creation_date";

    fn repository(&self) -> &Repository<'ctx, Company> {
        &self.repo
    }

    fn criteria_filter(criteria: &CompanyCriteria) -> Filter {
        Filter::new()
            .eq_text("name", criteria.name.as_deref())
            .eq_text("address", criteria.address.as_deref())
            .eq_text("phone", criteria.phone.as_deref())
    }
}
