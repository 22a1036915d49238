//! Generic repository and the shared search contract.

use crate::context::{DbContext, Tracked};
use crate::error::DataResult;
use crate::model::entity::{Entity, EntityId};
use crate::repo::query::{count_rows, search_rows, DateRange, Filter, Page};
use std::marker::PhantomData;

/// CRUD staging and reads for one entity type.
pub struct Repository<'ctx, T: Entity> {
    ctx: &'ctx mut DbContext,
    _entity: PhantomData<T>,
}

impl<'ctx, T: Entity> Repository<'ctx, T> {
    pub fn new(ctx: &'ctx mut DbContext) -> Self {
        Self {
            ctx,
            _entity: PhantomData,
        }
    }

    pub fn context(&mut self) -> &mut DbContext {
        &mut *self.ctx
    }

    pub fn add(&mut self, entity: T) -> Tracked<T> {
        self.ctx.add(entity)
    }

    pub fn update(&mut self, entity: T) -> DataResult<Tracked<T>> {
        self.ctx.update(entity)
    }

    pub fn delete(&mut self, key: Tracked<T>) -> DataResult<()> {
        self.ctx.remove(key)
    }

    /// Stages deletion of the row with `id`; returns `false` when it does not
    /// exist.
    pub fn delete_by_id(&mut self, id: EntityId) -> DataResult<bool> {
        match self.ctx.find::<T>(id)? {
            Some(key) => {
                self.ctx.remove(key)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn find(&mut self, id: EntityId) -> DataResult<Option<Tracked<T>>> {
        self.ctx.find(id)
    }

    /// Reads the persisted row without tracking it.
    pub fn get_by_id(&self, id: EntityId) -> DataResult<Option<T>> {
        let filter = Filter::new().eq("id", id);
        Ok(self.search(&filter, None)?.into_iter().next())
    }

    pub fn get_all(&self) -> DataResult<Vec<T>> {
        self.search(&Filter::new(), None)
    }

    pub fn search(&self, filter: &Filter, page: Option<Page>) -> DataResult<Vec<T>> {
        self.ctx
            .with_connection(|conn| search_rows::<T>(conn, filter, page))
    }

    pub fn count(&self, filter: &Filter) -> DataResult<u64> {
        self.ctx.with_connection(|conn| count_rows::<T>(conn, filter))
    }

    /// Returns whether no persisted row matches `filter`.
    pub fn check_is_unique(&self, filter: &Filter) -> DataResult<bool> {
        Ok(self.count(filter)? == 0)
    }
}

/// Criteria-driven search shared by entity-specific repositories.
///
/// Implementors only describe how criteria and range map onto a `Filter`.
pub trait SearchRepository<'ctx> {
    type Entity: Entity;
    type Criteria;

    /// Column bounded by the search range.
    const RANGE_COLUMN: &'static str;

    fn repository(&self) -> &Repository<'ctx, Self::Entity>;

    fn criteria_filter(criteria: &Self::Criteria) -> Filter;

    fn build_filter(criteria: Option<&Self::Criteria>, range: &DateRange) -> Filter {
        let filter = criteria.map_or_else(Filter::new, Self::criteria_filter);
        filter.range(Self::RANGE_COLUMN, range.start, range.end)
    }

    /// Returns matches ordered by descending identity, one page of them
    /// when both `page_no` and `page_size` are supplied.
    fn search(
        &self,
        criteria: Option<&Self::Criteria>,
        range: &DateRange,
        page_no: Option<u32>,
        page_size: Option<u32>,
    ) -> DataResult<Vec<Self::Entity>> {
        let page = Page::from_parts(page_no, page_size)?;
        self.repository()
            .search(&Self::build_filter(criteria, range), page)
    }

    fn search_count(
        &self,
        criteria: Option<&Self::Criteria>,
        range: &DateRange,
    ) -> DataResult<u64> {
        self.repository()
            .count(&Self::build_filter(criteria, range))
    }

    /// Returns whether no row other than `exclude_id` carries `name`.
    fn check_is_unique(&self, name: &str, exclude_id: EntityId) -> DataResult<bool> {
        let filter = Filter::new()
            .eq("name", name.to_string())
            .not_eq("id", exclude_id);
        self.repository().check_is_unique(&filter)
    }
}
