//! SQLite storage bootstrap for the data layer.
//!
//! # Responsibility
//! - Open connections with foreign keys enforced and every migration applied.
//! - Check that each registered audit mapping has a matching audit table.
//!
//! # Invariants
//! - Contexts never see a connection whose `user_version` differs from
//!   `migrations::latest_version()`.
//! - A schema lacking an audit table or stamped column fails at open time,
//!   not halfway through a commit.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use migrations::verify_audit_schema;
pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Storage-level failure raised below the persistence context.
#[derive(Debug)]
pub enum DbError {
    /// Any SQLite failure outside schema management, including constraint
    /// violations during a commit.
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// One migration script failed; nothing from the run was kept.
    Migration {
        version: u32,
        name: &'static str,
        source: rusqlite::Error,
    },
    MissingAuditTable {
        entity: &'static str,
        table: &'static str,
    },
    MissingAuditColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl DbError {
    /// Stable code used in `error_code=` log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::UnsupportedSchemaVersion { .. } => "schema_too_new",
            Self::Migration { .. } => "migration_failed",
            Self::MissingAuditTable { .. } => "audit_table_missing",
            Self::MissingAuditColumn { .. } => "audit_column_missing",
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "storage error: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "store schema version {db_version} is ahead of this build (latest {latest_supported})"
            ),
            Self::Migration {
                version,
                name,
                source,
            } => write!(f, "migration {version:04}_{name} failed: {source}"),
            Self::MissingAuditTable { entity, table } => {
                write!(f, "audit table `{table}` for {entity} does not exist")
            }
            Self::MissingAuditColumn { table, column } => {
                write!(f, "audit table `{table}` has no `{column}` column")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) | Self::Migration { source: err, .. } => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
