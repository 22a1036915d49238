//! Read-only access to audit tables.
//!
//! Audit rows are only produced by `DbContext::commit`; this module never
//! writes.

use crate::context::DbContext;
use crate::error::{DataError, DataResult};
use crate::model::audit::{AuditEntity, AUDIT_ID_COLUMN};
use crate::model::entity::EntityId;

pub struct AuditTrail<'ctx> {
    ctx: &'ctx DbContext,
}

impl<'ctx> AuditTrail<'ctx> {
    pub fn new(ctx: &'ctx DbContext) -> Self {
        Self { ctx }
    }

    /// Returns every audit row for one entity identity, oldest first.
    pub fn history<A: AuditEntity>(&self, entity_id: EntityId) -> DataResult<Vec<A>> {
        self.ctx.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM {} WHERE id = ?1 ORDER BY {AUDIT_ID_COLUMN} ASC;",
                A::TABLE
            ))?;
            let rows = stmt.query_map([entity_id], |row| A::from_row(row))?;
            let mut records = Vec::new();
            for record in rows {
                records.push(record?);
            }
            Ok(records)
        })
    }

    pub fn all<A: AuditEntity>(&self) -> DataResult<Vec<A>> {
        self.ctx.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM {} ORDER BY {AUDIT_ID_COLUMN} ASC;",
                A::TABLE
            ))?;
            let rows = stmt.query_map([], |row| A::from_row(row))?;
            let mut records = Vec::new();
            for record in rows {
                records.push(record?);
            }
            Ok(records)
        })
    }

    pub fn count<A: AuditEntity>(&self) -> DataResult<u64> {
        self.ctx.with_connection(|conn| {
            let count = conn.query_row(&format!("SELECT COUNT(*) FROM {};", A::TABLE), [], |row| {
                row.get::<_, i64>(0)
            })?;
            u64::try_from(count)
                .map_err(|_| DataError::InvalidData(format!("negative row count {count}")))
        })
    }
}
