//! Data-layer configuration.
//!
//! # Responsibility
//! - Describe where the store lives, how logging starts and which
//!   concurrency mode contexts use.
//! - Build ready-to-use contexts from that description.
//!
//! # Invariants
//! - An absent `database_path` means an in-memory store.
//! - Contexts built here share the process audit registry.

use crate::audit::registry::init_registry;
use crate::context::{ConcurrencyMode, ContextOptions, DbContext};
use crate::db::{open_db, open_db_in_memory};
use crate::error::{DataError, DataResult};
use crate::logging::{default_log_level, init_logging};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    /// Absolute directory; logging stays off when absent.
    pub log_dir: Option<String>,
    pub concurrency: ConcurrencyMode,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: default_log_level().to_string(),
            log_dir: None,
            concurrency: ConcurrencyMode::default(),
        }
    }
}

impl DataConfig {
    pub fn from_json_str(json: &str) -> DataResult<Self> {
        serde_json::from_str(json).map_err(|err| DataError::Config(err.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> DataResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| {
            DataError::Config(format!("failed to read `{}`: {err}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Starts file logging when `log_dir` is configured.
    pub fn init_logging(&self) -> DataResult<bool> {
        match self.log_dir.as_deref() {
            Some(log_dir) => init_logging(&self.log_level, log_dir)
                .map(|()| true)
                .map_err(DataError::Config),
            None => Ok(false),
        }
    }

    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            concurrency: self.concurrency,
        }
    }

    /// Opens the configured store and wraps it in a new context.
    pub fn open_context(&self) -> DataResult<DbContext> {
        let conn = match &self.database_path {
            Some(path) => open_db(path)?,
            None => open_db_in_memory()?,
        };
        DbContext::verified(conn, init_registry(), self.context_options())
    }
}
