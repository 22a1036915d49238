//! Employee entity.
//!
//! # Invariants
//! - `company_id` and `department_id`, when set, reference existing rows
//!   (enforced by SQLite foreign keys at flush time).

use crate::model::entity::{
    check_address, check_name, check_phone, opt_int, opt_text, Entity, EntityId, FieldError,
};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Employee {
    pub id: Option<EntityId>,
    pub name: String,
    /// Epoch milliseconds.
    pub birth_date: Option<i64>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub company_id: Option<EntityId>,
    pub department_id: Option<EntityId>,
    pub row_version: i64,
    pub created_on: Option<i64>,
}

impl Employee {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Entity for Employee {
    const ENTITY_NAME: &'static str = "Employee";
    const TABLE: &'static str = "employees";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "birth_date",
        "address",
        "phone",
        "company_id",
        "department_id",
    ];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn row_version(&self) -> i64 {
        self.row_version
    }

    fn set_row_version(&mut self, row_version: i64) {
        self.row_version = row_version;
    }

    fn created_on(&self) -> Option<i64> {
        self.created_on
    }

    fn set_created_on(&mut self, created_on: Option<i64>) {
        self.created_on = created_on;
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.name.clone()),
            opt_int(self.birth_date),
            opt_text(self.address.as_deref()),
            opt_text(self.phone.as_deref()),
            opt_int(self.company_id),
            opt_int(self.department_id),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get("id")?),
            name: row.get("name")?,
            birth_date: row.get("birth_date")?,
            address: row.get("address")?,
            phone: row.get("phone")?,
            company_id: row.get("company_id")?,
            department_id: row.get("department_id")?,
            row_version: row.get("row_version")?,
            created_on: row.get("created_on")?,
        })
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        check_name(&self.name, &mut errors);
        check_address(self.address.as_deref(), &mut errors);
        check_phone(self.phone.as_deref(), &mut errors);
        errors
    }
}
