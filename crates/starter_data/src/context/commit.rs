//! Audit-then-write commit protocol.
//!
//! # Responsibility
//! - Validate pending entries and stage their audit rows.
//! - Flush entity writes, then insert audits, inside one transaction.
//!
//! # Invariants
//! - Update/delete audit rows are synthesized before the primary flush;
//!   insert audit rows after it, once identities exist.
//! - A modified row's next version is the *persisted* version plus one, and
//!   its `created_on` is re-read from storage.
//! - Delete audits copy original values and keep the original version.
//! - A tracked entity keeps the identity it was loaded or attached with;
//!   rewriting `id` on a modified entity rejects the whole commit.
//! - Nothing is committed unless every step succeeds.

use super::tracker::{EntityState, PendingEntry, TrackedEntity};
use super::ConcurrencyMode;
use crate::audit::registry::{AuditMapping, AuditRegistry};
use crate::error::{DataError, DataResult, ValidationFailure};
use crate::model::audit::{
    AuditOperation, AUDIT_CREATED_DATE_COLUMN, AUDIT_OPERATION_COLUMN, AUDIT_USER_COLUMN,
};
use crate::model::entity::{EntityId, ID_COLUMN, ROW_VERSION_COLUMN};
use log::{debug, error};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub(crate) struct CommitOutcome {
    pub entries: Vec<PendingEntry>,
    pub primary_rows: usize,
    pub final_rows: usize,
    pub audit_rows: usize,
}

/// One staged row for an audit table.
struct AuditRow {
    table: &'static str,
    columns: Vec<&'static str>,
    values: Vec<Value>,
}

impl AuditRow {
    fn synthesize(
        mapping: &AuditMapping,
        source: &dyn TrackedEntity,
        operation: AuditOperation,
        row_version: i64,
        created_date: i64,
        user_name: Option<&str>,
    ) -> Self {
        let fields = source.fields();
        let mut columns = Vec::with_capacity(mapping.copied_columns.len() + 4);
        let mut values = Vec::with_capacity(mapping.copied_columns.len() + 4);

        for column in &mapping.copied_columns {
            if let Some((_, value)) = fields.iter().find(|(name, _)| name == column) {
                columns.push(*column);
                values.push(value.clone());
            }
        }

        columns.extend([
            ROW_VERSION_COLUMN,
            AUDIT_OPERATION_COLUMN,
            AUDIT_CREATED_DATE_COLUMN,
            AUDIT_USER_COLUMN,
        ]);
        values.extend([
            Value::Integer(row_version),
            Value::from(operation),
            Value::Integer(created_date),
            user_name.map_or(Value::Null, |name| Value::Text(name.to_string())),
        ]);

        Self {
            table: mapping.audit_table,
            columns,
            values,
        }
    }

    fn write(&self, tx: &Transaction<'_>) -> rusqlite::Result<usize> {
        let sql = insert_sql(self.table, &self.columns);
        tx.execute(&sql, params_from_iter(self.values.iter()))
    }
}

/// Runs the full commit for already-cloned pending entries.
///
/// The returned entries carry assigned identities and versions; the caller
/// folds them back into its tracker.
pub(crate) fn execute_commit(
    conn: &mut Connection,
    registry: &AuditRegistry,
    mode: ConcurrencyMode,
    mut entries: Vec<PendingEntry>,
    user_name: Option<&str>,
    commit_id: Uuid,
) -> DataResult<CommitOutcome> {
    validate_entries(&entries, commit_id)?;
    check_identities(&entries, commit_id)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let created_date = now_epoch_ms();

    let added: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.state == EntityState::Added)
        .map(|(index, _)| index)
        .collect();

    let mut staged = Vec::new();
    for entry in &mut entries {
        let audit = stage_entry(&tx, registry, mode, entry, created_date, user_name)?;
        if let Some(row) = audit {
            debug!(
                "event=audit_staged module=context commit_id={} entity={} state={} table={}",
                commit_id,
                entry.current.entity_name(),
                entry.state,
                row.table
            );
            staged.push(row);
        }
    }

    let mut primary_rows = 0;
    for entry in &mut entries {
        primary_rows += flush_entry(&tx, mode, entry, commit_id)?;
    }
    for row in &staged {
        primary_rows += row.write(&tx)?;
    }

    let inserted_audits: Vec<AuditRow> = added
        .iter()
        .filter_map(|index| {
            let entry = &entries[*index];
            registry
                .lookup_type(entry.current.entity_type())
                .map(|mapping| {
                    AuditRow::synthesize(
                        mapping,
                        &*entry.current,
                        AuditOperation::Insert,
                        1,
                        created_date,
                        user_name,
                    )
                })
        })
        .collect();

    let mut final_rows = 0;
    for row in &inserted_audits {
        final_rows += row.write(&tx)?;
    }

    tx.commit()?;

    Ok(CommitOutcome {
        entries,
        primary_rows,
        final_rows,
        audit_rows: staged.len() + inserted_audits.len(),
    })
}

fn validate_entries(entries: &[PendingEntry], commit_id: Uuid) -> DataResult<()> {
    let mut failures = Vec::new();
    for entry in entries {
        if !matches!(entry.state, EntityState::Added | EntityState::Modified) {
            continue;
        }
        for field in entry.current.check() {
            failures.push(ValidationFailure {
                entity: entry.current.entity_name(),
                state: entry.state,
                property: field.property,
                message: field.message,
            });
        }
    }

    if failures.is_empty() {
        return Ok(());
    }

    for failure in &failures {
        error!(
            "event=commit_validation module=context status=error commit_id={} entity={} state={} property={} error={}",
            commit_id, failure.entity, failure.state, failure.property, failure.message
        );
    }
    Err(DataError::Validation(failures))
}

fn check_identities(entries: &[PendingEntry], commit_id: Uuid) -> DataResult<()> {
    for entry in entries {
        if entry.state != EntityState::Modified {
            continue;
        }
        let tracked = entry.original.identity();
        let current = entry.current.identity();
        if current != tracked {
            error!(
                "event=commit_identity module=context status=error commit_id={} entity={} tracked_id={:?} current_id={:?}",
                commit_id,
                entry.current.entity_name(),
                tracked,
                current
            );
            return Err(DataError::InvalidArgument(format!(
                "{} identity changed from {tracked:?} to {current:?}; identities are immutable once tracked",
                entry.current.entity_name()
            )));
        }
    }
    Ok(())
}

/// Prepares one entry for the primary flush and returns its audit row, if
/// the entry is audited at this stage.
fn stage_entry(
    tx: &Transaction<'_>,
    registry: &AuditRegistry,
    mode: ConcurrencyMode,
    entry: &mut PendingEntry,
    created_date: i64,
    user_name: Option<&str>,
) -> DataResult<Option<AuditRow>> {
    match entry.state {
        EntityState::Added => {
            entry.current.assign_version(1);
            entry.current.assign_creation(Some(created_date));
            Ok(None)
        }
        EntityState::Modified => {
            let id = require_identity(entry)?;
            let (live_version, live_created_on) =
                read_persisted(tx, entry.current.table(), id)?.ok_or(DataError::Concurrency {
                    entity: entry.current.entity_name(),
                    id,
                    expected: entry.original.version(),
                    actual: None,
                })?;

            if mode == ConcurrencyMode::Strict && live_version != entry.original.version() {
                return Err(DataError::Concurrency {
                    entity: entry.current.entity_name(),
                    id,
                    expected: entry.original.version(),
                    actual: Some(live_version),
                });
            }

            entry.current.assign_version(live_version + 1);
            entry.current.assign_creation(live_created_on);

            Ok(registry
                .lookup_type(entry.current.entity_type())
                .map(|mapping| {
                    AuditRow::synthesize(
                        mapping,
                        &*entry.current,
                        AuditOperation::Update,
                        live_version + 1,
                        created_date,
                        user_name,
                    )
                }))
        }
        EntityState::Deleted => {
            require_identity(entry)?;
            Ok(registry
                .lookup_type(entry.original.entity_type())
                .map(|mapping| {
                    AuditRow::synthesize(
                        mapping,
                        &*entry.original,
                        AuditOperation::Delete,
                        entry.original.version(),
                        created_date,
                        user_name,
                    )
                }))
        }
        EntityState::Unchanged | EntityState::Detached => Ok(None),
    }
}

fn flush_entry(
    tx: &Transaction<'_>,
    mode: ConcurrencyMode,
    entry: &mut PendingEntry,
    commit_id: Uuid,
) -> DataResult<usize> {
    let result = match entry.state {
        EntityState::Added => insert_entity(tx, &mut *entry.current),
        EntityState::Modified => update_entity(tx, &*entry.current),
        EntityState::Deleted => delete_entity(tx, mode, &*entry.original),
        EntityState::Unchanged | EntityState::Detached => Ok(0),
    };

    result.map_err(|err| {
        error!(
            "event=commit_flush module=context status=error commit_id={} entity={} state={} id={} error={}",
            commit_id,
            entry.current.entity_name(),
            entry.state,
            entry
                .original
                .identity()
                .map_or_else(|| "none".to_string(), |id| id.to_string()),
            err
        );
        err
    })
}

fn insert_entity(tx: &Transaction<'_>, entity: &mut dyn TrackedEntity) -> DataResult<usize> {
    let (columns, values): (Vec<&'static str>, Vec<Value>) = entity
        .fields()
        .into_iter()
        .filter(|(column, value)| !(*column == ID_COLUMN && *value == Value::Null))
        .unzip();

    let changed = tx.execute(
        &insert_sql(entity.table(), &columns),
        params_from_iter(values.iter()),
    )?;
    if entity.identity().is_none() {
        entity.assign_identity(tx.last_insert_rowid());
    }
    Ok(changed)
}

fn update_entity(tx: &Transaction<'_>, entity: &dyn TrackedEntity) -> DataResult<usize> {
    let id = entity.identity().ok_or_else(|| missing_identity(entity))?;
    // Version was bumped from the live value during staging.
    let live_version = entity.version() - 1;

    let (columns, mut values): (Vec<&'static str>, Vec<Value>) = entity
        .fields()
        .into_iter()
        .filter(|(column, _)| *column != ID_COLUMN)
        .unzip();
    let assignments = columns
        .iter()
        .enumerate()
        .map(|(index, column)| format!("{column} = ?{}", index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?{} AND row_version = ?{};",
        entity.table(),
        assignments,
        columns.len() + 1,
        columns.len() + 2
    );
    values.push(Value::Integer(id));
    values.push(Value::Integer(live_version));

    let changed = tx.execute(&sql, params_from_iter(values.iter()))?;
    if changed == 0 {
        return Err(DataError::Concurrency {
            entity: entity.entity_name(),
            id,
            expected: live_version,
            actual: read_persisted(tx, entity.table(), id)?.map(|(version, _)| version),
        });
    }
    Ok(changed)
}

fn delete_entity(
    tx: &Transaction<'_>,
    mode: ConcurrencyMode,
    original: &dyn TrackedEntity,
) -> DataResult<usize> {
    let id = original.identity().ok_or_else(|| missing_identity(original))?;
    let changed = match mode {
        ConcurrencyMode::LiveVersion => tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1;", original.table()),
            [id],
        )?,
        ConcurrencyMode::Strict => tx.execute(
            &format!(
                "DELETE FROM {} WHERE id = ?1 AND row_version = ?2;",
                original.table()
            ),
            [id, original.version()],
        )?,
    };

    if changed == 0 {
        return Err(DataError::Concurrency {
            entity: original.entity_name(),
            id,
            expected: original.version(),
            actual: read_persisted(tx, original.table(), id)?.map(|(version, _)| version),
        });
    }
    Ok(changed)
}

/// Reads the persisted `(row_version, created_on)` of one row.
fn read_persisted(
    tx: &Transaction<'_>,
    table: &str,
    id: EntityId,
) -> DataResult<Option<(i64, Option<i64>)>> {
    let row = tx
        .query_row(
            &format!("SELECT row_version, created_on FROM {table} WHERE id = ?1;"),
            [id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?)),
        )
        .optional()?;
    Ok(row)
}

fn require_identity(entry: &PendingEntry) -> DataResult<EntityId> {
    entry
        .original
        .identity()
        .ok_or_else(|| missing_identity(&*entry.original))
}

fn missing_identity(entity: &dyn TrackedEntity) -> DataError {
    DataError::InvalidArgument(format!(
        "{} has no identity and cannot be updated or deleted",
        entity.entity_name()
    ))
}

fn insert_sql(table: &str, columns: &[&str]) -> String {
    let placeholders = (1..=columns.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders});",
        columns.join(", ")
    )
}

pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::insert_sql;

    #[test]
    fn insert_sql_numbers_placeholders() {
        assert_eq!(
            insert_sql("company_audit", &["id", "name"]),
            "INSERT INTO company_audit (id, name) VALUES (?1, ?2);"
        );
    }
}
