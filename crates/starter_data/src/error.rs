//! Error model for the persistence context and repositories.
//!
//! # Invariants
//! - A missing audit mapping is never an error.
//! - Errors surfacing from a commit are returned unmodified after logging;
//!   this layer never retries.

use crate::context::EntityState;
use crate::db::DbError;
use crate::model::entity::EntityId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type DataResult<T> = Result<T, DataError>;

/// One failed field constraint on one tracked entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub entity: &'static str,
    pub state: EntityState,
    pub property: &'static str,
    pub message: String,
}

impl Display for ValidationFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) property `{}`: {}",
            self.entity, self.state, self.property, self.message
        )
    }
}

#[derive(Debug)]
pub enum DataError {
    /// Storage failure, including constraint violations raised by SQLite.
    Db(DbError),
    Validation(Vec<ValidationFailure>),
    /// The persisted row moved or vanished underneath a pending write.
    Concurrency {
        entity: &'static str,
        id: EntityId,
        expected: i64,
        actual: Option<i64>,
    },
    NotTracked(&'static str),
    InvalidArgument(String),
    InvalidData(String),
    /// The blocking commit task or the connection lock failed.
    Interrupted(String),
    Config(String),
}

impl Display for DataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Validation(failures) => {
                write!(f, "validation failed for {} field(s)", failures.len())?;
                for failure in failures {
                    write!(f, "; {failure}")?;
                }
                Ok(())
            }
            Self::Concurrency {
                entity,
                id,
                expected,
                actual: Some(actual),
            } => write!(
                f,
                "{entity} {id} changed concurrently: expected row version {expected}, found {actual}"
            ),
            Self::Concurrency {
                entity,
                id,
                expected,
                actual: None,
            } => write!(
                f,
                "{entity} {id} no longer exists (expected row version {expected})"
            ),
            Self::NotTracked(entity) => write!(f, "{entity} is not tracked by this context"),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Interrupted(message) => write!(f, "commit interrupted: {message}"),
            Self::Config(message) => write!(f, "invalid configuration: {message}"),
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for DataError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for DataError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
