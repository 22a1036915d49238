//! Schema migrations for entity and audit tables.
//!
//! # Invariants
//! - Scripts run in ascending `version` order inside one transaction, so a
//!   failing script leaves the store at its previous version.
//! - Every audited entity table gets its audit table in the same or a later
//!   migration; `verify_audit_schema` checks the result against the registry.
//! - The applied version is mirrored to `PRAGMA user_version`.

use crate::audit::registry::AuditRegistry;
use crate::db::{DbError, DbResult};
use crate::model::audit::{AUDIT_CREATED_DATE_COLUMN, AUDIT_OPERATION_COLUMN, AUDIT_USER_COLUMN};
use crate::model::entity::ROW_VERSION_COLUMN;
use log::{debug, info};
use rusqlite::{Connection, Transaction};
use std::collections::HashSet;

/// Columns the commit protocol stamps on every audit row.
const STAMPED_AUDIT_COLUMNS: [&str; 4] = [
    ROW_VERSION_COLUMN,
    AUDIT_OPERATION_COLUMN,
    AUDIT_CREATED_DATE_COLUMN,
    AUDIT_USER_COLUMN,
];

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "entities",
        sql: include_str!("0001_init.sql"),
    },
    Migration {
        version: 2,
        name: "audit_tables",
        sql: include_str!("0002_audit.sql"),
    },
];

/// Schema version produced by the newest bundled migration.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Brings the store up to `latest_version()`.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the store was written by a newer build.
/// - `Migration` naming the script that failed.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let from_version = stored_version(conn)?;
    let latest = latest_version();

    if from_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from_version,
            latest_supported: latest,
        });
    }
    if from_version == latest {
        debug!("event=db_migrate module=db status=skipped version={from_version}");
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS.iter().skip_while(|m| m.version <= from_version) {
        run_migration(&tx, migration)?;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={}",
        from_version, latest
    );
    Ok(())
}

/// Checks that every mapping in `registry` has its audit table with the
/// copied and stamped columns.
///
/// # Errors
/// - `MissingAuditTable` or `MissingAuditColumn` for the first gap found,
///   in audit-table order.
pub fn verify_audit_schema(conn: &Connection, registry: &AuditRegistry) -> DbResult<()> {
    let mut mappings: Vec<_> = registry.mappings().collect();
    mappings.sort_by_key(|mapping| mapping.audit_table);

    for mapping in mappings {
        let columns = table_columns(conn, mapping.audit_table)?;
        if columns.is_empty() {
            return Err(DbError::MissingAuditTable {
                entity: mapping.entity_name,
                table: mapping.audit_table,
            });
        }
        let required = mapping
            .copied_columns
            .iter()
            .chain(STAMPED_AUDIT_COLUMNS.iter());
        for column in required {
            if !columns.contains(*column) {
                return Err(DbError::MissingAuditColumn {
                    table: mapping.audit_table,
                    column: *column,
                });
            }
        }
    }
    debug!(
        "event=db_verify_audit module=db status=ok mappings={}",
        registry.len()
    );
    Ok(())
}

fn run_migration(tx: &Transaction<'_>, migration: &Migration) -> DbResult<()> {
    let failed = |source| DbError::Migration {
        version: migration.version,
        name: migration.name,
        source,
    };
    tx.execute_batch(migration.sql).map_err(failed)?;
    tx.pragma_update(None, "user_version", migration.version)
        .map_err(failed)?;
    debug!(
        "event=db_migrate module=db status=step version={} name={}",
        migration.version, migration.name
    );
    Ok(())
}

fn stored_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn table_columns(conn: &Connection, table: &str) -> DbResult<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1);")?;
    let names = stmt.query_map([table], |row| row.get::<_, String>(0))?;
    let mut columns = HashSet::new();
    for name in names {
        columns.insert(name?);
    }
    Ok(columns)
}
