//! Entity capability shared by every persisted record.
//!
//! # Responsibility
//! - Describe table layout and column values without runtime reflection.
//! - Provide the field-level validation run during commit.
//!
//! # Invariants
//! - `COLUMNS` lists business columns only; `id`, `row_version` and
//!   `created_on` are handled generically.
//! - `column_values()` is aligned index-by-index with `COLUMNS`.

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::Row;

/// Store-assigned integer identity.
pub type EntityId = i64;

pub const ID_COLUMN: &str = "id";
pub const ROW_VERSION_COLUMN: &str = "row_version";
pub const CREATED_ON_COLUMN: &str = "created_on";

pub const NAME_MAX_CHARS: usize = 100;
pub const ADDRESS_MAX_CHARS: usize = 200;

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9 ().-]{4,20}$").expect("valid phone regex"));

/// One failed field constraint, reported by `Entity::validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub property: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(property: &'static str, message: impl Into<String>) -> Self {
        Self {
            property,
            message: message.into(),
        }
    }
}

/// Auditable entity capability.
///
/// Implementors are plain data holders. The persistence context drives
/// change tracking, versioning and auditing through this trait alone.
pub trait Entity: Clone + Send + 'static {
    /// Human-readable type name used in logs and errors.
    const ENTITY_NAME: &'static str;
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> Option<EntityId>;
    fn set_id(&mut self, id: EntityId);
    fn row_version(&self) -> i64;
    fn set_row_version(&mut self, row_version: i64);
    /// Epoch milliseconds of the first insert.
    fn created_on(&self) -> Option<i64>;
    fn set_created_on(&mut self, created_on: Option<i64>);
    fn column_values(&self) -> Vec<Value>;
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    fn validate(&self) -> Vec<FieldError> {
        Vec::new()
    }
}

/// Returns every persisted field of `entity` as `(column, value)` pairs,
/// identity first and bookkeeping columns last.
pub fn field_values<T: Entity>(entity: &T) -> Vec<(&'static str, Value)> {
    let mut fields = Vec::with_capacity(T::COLUMNS.len() + 3);
    fields.push((ID_COLUMN, opt_int(entity.id())));
    fields.extend(T::COLUMNS.iter().copied().zip(entity.column_values()));
    fields.push((ROW_VERSION_COLUMN, Value::Integer(entity.row_version())));
    fields.push((CREATED_ON_COLUMN, opt_int(entity.created_on())));
    fields
}

/// Returns every column name `field_values` produces for `T`.
pub fn all_columns<T: Entity>() -> Vec<&'static str> {
    let mut columns = Vec::with_capacity(T::COLUMNS.len() + 3);
    columns.push(ID_COLUMN);
    columns.extend_from_slice(T::COLUMNS);
    columns.push(ROW_VERSION_COLUMN);
    columns.push(CREATED_ON_COLUMN);
    columns
}

pub(crate) fn opt_int(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

pub(crate) fn opt_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |text| Value::Text(text.to_string()))
}

pub(crate) fn check_name(name: &str, errors: &mut Vec<FieldError>) {
    if name.trim().is_empty() {
        errors.push(FieldError::new("name", "name is required"));
    } else if name.chars().count() > NAME_MAX_CHARS {
        errors.push(FieldError::new(
            "name",
            format!("name must be at most {NAME_MAX_CHARS} characters"),
        ));
    }
}

pub(crate) fn check_address(address: Option<&str>, errors: &mut Vec<FieldError>) {
    if address.is_some_and(|value| value.chars().count() > ADDRESS_MAX_CHARS) {
        errors.push(FieldError::new(
            "address",
            format!("address must be at most {ADDRESS_MAX_CHARS} characters"),
        ));
    }
}

pub(crate) fn check_phone(phone: Option<&str>, errors: &mut Vec<FieldError>) {
    if let Some(value) = phone {
        if !PHONE_RE.is_match(value) {
            errors.push(FieldError::new(
                "phone",
                format!("phone `{value}` is not a valid phone number"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{check_name, check_phone, FieldError};

    #[test]
    fn blank_name_is_rejected() {
        let mut errors = Vec::new();
        check_name("   ", &mut errors);
        assert_eq!(errors, vec![FieldError::new("name", "name is required")]);
    }

    #[test]
    fn phone_accepts_common_formats() {
        let mut errors = Vec::new();
        check_phone(Some("+33 (1) 23-45-67"), &mut errors);
        check_phone(Some("0123456789"), &mut errors);
        check_phone(None, &mut errors);
        assert!(errors.is_empty());

        check_phone(Some("call me"), &mut errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].property, "phone");
    }
}
