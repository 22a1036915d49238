//! Audit records mirrored from audited entities.
//!
//! # Responsibility
//! - Define the append-only rows written by the persistence context.
//! - Describe each audit table so the registry can derive copied columns.
//!
//! # Invariants
//! - Audit rows are never updated or deleted by this crate.
//! - `row_version` on an audit row is the entity version *after* the
//!   operation (unchanged for deletes).

use crate::model::entity::EntityId;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, Value, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub const AUDIT_ID_COLUMN: &str = "audit_id";
pub const AUDIT_OPERATION_COLUMN: &str = "audit_operation";
pub const AUDIT_CREATED_DATE_COLUMN: &str = "created_date";
pub const AUDIT_USER_COLUMN: &str = "logged_user_name";

/// Kind of mutation captured by one audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditOperation {
    Insert,
    Update,
    Delete,
}

impl AuditOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl Display for AuditOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AuditOperation> for Value {
    fn from(operation: AuditOperation) -> Self {
        Value::Text(operation.as_str().to_string())
    }
}

impl FromSql for AuditOperation {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Self::parse(text).ok_or_else(|| {
            FromSqlError::Other(format!("invalid audit operation `{text}`").into())
        })
    }
}

/// Columns stamped by the persistence context on every audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub operation: AuditOperation,
    pub row_version: i64,
    /// Epoch milliseconds at which the audit row was produced.
    pub created_date: i64,
    pub logged_user_name: Option<String>,
}

impl AuditStamp {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            operation: row.get(AUDIT_OPERATION_COLUMN)?,
            row_version: row.get("row_version")?,
            created_date: row.get(AUDIT_CREATED_DATE_COLUMN)?,
            logged_user_name: row.get(AUDIT_USER_COLUMN)?,
        })
    }
}

/// Audit table description.
///
/// `COLUMNS` lists the mirrored entity columns; `audit_id` and the stamped
/// columns are implied.
pub trait AuditEntity: Sized + 'static {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyAudit {
    pub audit_id: i64,
    pub id: EntityId,
    pub name: Option<String>,
    pub creation_date: Option<i64>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub created_on: Option<i64>,
    pub audit: AuditStamp,
}

impl AuditEntity for CompanyAudit {
    const TABLE: &'static str = "company_audit";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "creation_date",
        "address",
        "phone",
        "created_on",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            audit_id: row.get(AUDIT_ID_COLUMN)?,
            id: row.get("id")?,
            name: row.get("name")?,
            creation_date: row.get("creation_date")?,
            address: row.get("address")?,
            phone: row.get("phone")?,
            created_on: row.get("created_on")?,
            audit: AuditStamp::from_row(row)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentAudit {
    pub audit_id: i64,
    pub id: EntityId,
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub created_on: Option<i64>,
    pub audit: AuditStamp,
}

impl AuditEntity for DepartmentAudit {
    const TABLE: &'static str = "department_audit";
    const COLUMNS: &'static [&'static str] = &["id", "name", "address", "phone", "created_on"];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            audit_id: row.get(AUDIT_ID_COLUMN)?,
            id: row.get("id")?,
            name: row.get("name")?,
            address: row.get("address")?,
            phone: row.get("phone")?,
            created_on: row.get("created_on")?,
            audit: AuditStamp::from_row(row)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeAudit {
    pub audit_id: i64,
    pub id: EntityId,
    pub name: Option<String>,
    pub birth_date: Option<i64>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub company_id: Option<EntityId>,
    pub department_id: Option<EntityId>,
    pub created_on: Option<i64>,
    pub audit: AuditStamp,
}

impl AuditEntity for EmployeeAudit {
    const TABLE: &'static str = "employee_audit";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "birth_date",
        "address",
        "phone",
        "company_id",
        "department_id",
        "created_on",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            audit_id: row.get(AUDIT_ID_COLUMN)?,
            id: row.get("id")?,
            name: row.get("name")?,
            birth_date: row.get("birth_date")?,
            address: row.get("address")?,
            phone: row.get("phone")?,
            company_id: row.get("company_id")?,
            department_id: row.get("department_id")?,
            created_on: row.get("created_on")?,
            audit: AuditStamp::from_row(row)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::AuditOperation;

    #[test]
    fn operation_text_is_uppercase_and_parses_back() {
        for operation in [
            AuditOperation::Insert,
            AuditOperation::Update,
            AuditOperation::Delete,
        ] {
            assert_eq!(AuditOperation::parse(operation.as_str()), Some(operation));
        }
        assert_eq!(AuditOperation::parse("insert"), None);
    }
}
