//! Department entity.

use crate::model::entity::{
    check_address, check_name, check_phone, opt_text, Entity, EntityId, FieldError,
};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Department {
    pub id: Option<EntityId>,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub row_version: i64,
    pub created_on: Option<i64>,
}

impl Department {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Entity for Department {
    const ENTITY_NAME: &'static str = "Department";
    const TABLE: &'static str = "departments";
    const COLUMNS: &'static [&'static str] = &["name", "address", "phone"];

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
            opt_text(self.address.as_deref()),
            opt_text(self.phone.as_deref()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get("id")?),
            name: row.get("name")?,
            address: row.get("address")?,
            phone: row.get("phone")?,
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
