//! Predicate composition and paging over entity tables.
//!
//! # Invariants
//! - Filters are conjunctions; an empty filter matches every row.
//! - Column names come from `'static` entity metadata, never from callers'
//!   runtime input, and values are always bound.
//! - Listing order is descending identity.

use crate::error::{DataError, DataResult};
use crate::model::entity::{all_columns, Entity, EntityId};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

/// Conjunction of equality and inclusive-range predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<String>,
    binds: Vec<Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.clauses.push(format!("{column} = ?"));
        self.binds.push(value.into());
        self
    }

    /// Adds an equality predicate unless `value` is absent or empty.
    pub fn eq_text(self, column: &'static str, value: Option<&str>) -> Self {
        match value {
            Some(text) if !text.is_empty() => self.eq(column, text.to_string()),
            _ => self,
        }
    }

    pub fn eq_opt(self, column: &'static str, value: Option<i64>) -> Self {
        match value {
            Some(value) => self.eq(column, value),
            None => self,
        }
    }

    pub fn not_eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.clauses.push(format!("{column} <> ?"));
        self.binds.push(value.into());
        self
    }

    /// Adds `lower <= column <= upper`; either bound may be absent.
    pub fn range(mut self, column: &'static str, lower: Option<i64>, upper: Option<i64>) -> Self {
        if let Some(lower) = lower {
            self.clauses.push(format!("{column} >= ?"));
            self.binds.push(Value::Integer(lower));
        }
        if let Some(upper) = upper {
            self.clauses.push(format!("{column} <= ?"));
            self.binds.push(Value::Integer(upper));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

/// One-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page_no: u32,
    pub page_size: u32,
}

impl Page {
    pub fn new(page_no: u32, page_size: u32) -> DataResult<Self> {
        if page_no == 0 || page_size == 0 {
            return Err(DataError::InvalidArgument(format!(
                "page number and size must be at least 1, got page_no={page_no} page_size={page_size}"
            )));
        }
        Ok(Self { page_no, page_size })
    }

    /// Pages only when both parts are supplied.
    pub fn from_parts(page_no: Option<u32>, page_size: Option<u32>) -> DataResult<Option<Self>> {
        match (page_no, page_size) {
            (Some(page_no), Some(page_size)) => Self::new(page_no, page_size).map(Some),
            _ => Ok(None),
        }
    }

    fn offset(&self) -> i64 {
        i64::from(self.page_no - 1) * i64::from(self.page_size)
    }
}

/// Inclusive bounds on an epoch-millisecond column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl DateRange {
    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }
}

pub(crate) fn select_sql<T: Entity>() -> String {
    format!("SELECT {} FROM {}", all_columns::<T>().join(", "), T::TABLE)
}

pub(crate) fn load_by_id<T: Entity>(conn: &Connection, id: EntityId) -> DataResult<Option<T>> {
    let entity = conn
        .query_row(
            &format!("{} WHERE id = ?1;", select_sql::<T>()),
            [id],
            |row| T::from_row(row),
        )
        .optional()?;
    Ok(entity)
}

pub(crate) fn search_rows<T: Entity>(
    conn: &Connection,
    filter: &Filter,
    page: Option<Page>,
) -> DataResult<Vec<T>> {
    let mut sql = format!(
        "{}{} ORDER BY id DESC",
        select_sql::<T>(),
        filter.where_clause()
    );
    let mut binds = filter.binds.clone();
    if let Some(page) = page {
        sql.push_str(" LIMIT ? OFFSET ?");
        binds.push(Value::Integer(i64::from(page.page_size)));
        binds.push(Value::Integer(page.offset()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(binds.iter()), |row| T::from_row(row))?;
    let mut entities = Vec::new();
    for entity in rows {
        entities.push(entity?);
    }
    Ok(entities)
}

pub(crate) fn count_rows<T: Entity>(conn: &Connection, filter: &Filter) -> DataResult<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}{}", T::TABLE, filter.where_clause());
    let count = conn.query_row(&sql, params_from_iter(filter.binds.iter()), |row| {
        row.get::<_, i64>(0)
    })?;
    u64::try_from(count).map_err(|_| DataError::InvalidData(format!("negative row count {count}")))
}

#[cfg(test)]
mod tests {
    use super::{DateRange, Filter, Page};
    use crate::error::DataError;

    #[test]
    fn empty_filter_has_no_where_clause() {
        assert_eq!(Filter::new().where_clause(), "");
        assert!(Filter::new().eq_text("name", Some("")).is_empty());
        assert!(Filter::new().eq_text("name", None).is_empty());
        assert!(Filter::new().eq_opt("company_id", None).is_empty());
    }

    #[test]
    fn predicates_are_joined_with_and() {
        let range = DateRange::new(Some(10), Some(20));
        let filter = Filter::new()
            .eq_text("name", Some("Acme"))
            .eq_opt("company_id", Some(3))
            .range("birth_date", range.start, range.end);
        assert_eq!(
            filter.where_clause(),
            " WHERE name = ? AND company_id = ? AND birth_date >= ? AND birth_date <= ?"
        );
        assert_eq!(filter.binds.len(), 4);
    }

    #[test]
    fn paging_requires_both_parts() {
        assert_eq!(Page::from_parts(Some(2), None).unwrap(), None);
        assert_eq!(Page::from_parts(None, Some(10)).unwrap(), None);

        let page = Page::from_parts(Some(3), Some(10)).unwrap().unwrap();
        assert_eq!(page.offset(), 20);
    }

    #[test]
    fn zero_page_is_rejected() {
        let err = Page::new(0, 10).unwrap_err();
        assert!(matches!(err, DataError::InvalidArgument(_)));
        assert!(Page::new(1, 0).is_err());
    }
}
