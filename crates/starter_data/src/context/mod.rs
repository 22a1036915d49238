//! Audit-aware persistence context (unit of work).
//!
//! # Responsibility
//! - Track added, modified and deleted entities between commits.
//! - Run the audit-then-write commit protocol as one transaction.
//!
//! # Invariants
//! - `commit`, `commit_async` and `save_changes` are the only write paths,
//!   and all of them audit.
//! - The tracker only reflects a commit once its transaction committed; a
//!   failed commit leaves every tracked entry as it was.
//! - The storage work of an abandoned `commit_async` is folded into the
//!   tracker before the next commit computes its change set.
//! - One context serves one logical operation; every mutating call takes
//!   `&mut self`.

mod commit;
mod tracker;

pub use tracker::{EntityState, Tracked};

use crate::audit::registry::AuditRegistry;
use crate::db::verify_audit_schema;
use crate::error::{DataError, DataResult};
use crate::model::entity::{Entity, EntityId};
use crate::repo::query::load_by_id;
use commit::{execute_commit, CommitOutcome};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracker::ChangeTracker;
use uuid::Uuid;

/// How a modified row's persisted version is reconciled with the version
/// the entity carried when it was loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// Next version is the persisted version plus one; the in-memory
    /// version is ignored.
    #[default]
    LiveVersion,
    /// Reject the commit when the persisted version moved since load.
    Strict,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextOptions {
    pub concurrency: ConcurrencyMode,
}

pub struct DbContext {
    conn: Arc<Mutex<Connection>>,
    registry: Arc<AuditRegistry>,
    tracker: ChangeTracker,
    options: ContextOptions,
    in_flight: Option<InFlightCommit>,
}

/// Blocking-pool commit whose outcome is not folded into the tracker yet.
struct InFlightCommit {
    commit_id: Uuid,
    started_at: Instant,
    task: JoinHandle<()>,
    outcome: Receiver<DataResult<CommitOutcome>>,
}

impl DbContext {
    /// Wraps a migrated connection; see `db::open_db`.
    pub fn new(conn: Connection, registry: Arc<AuditRegistry>) -> Self {
        Self::with_options(conn, registry, ContextOptions::default())
    }

    pub fn with_options(
        conn: Connection,
        registry: Arc<AuditRegistry>,
        options: ContextOptions,
    ) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            registry,
            tracker: ChangeTracker::default(),
            options,
            in_flight: None,
        }
    }

    /// Like `with_options`, but first checks that the store carries every
    /// audit table `registry` maps to.
    ///
    /// # Errors
    /// - `Db(MissingAuditTable | MissingAuditColumn)` for a schema gap.
    pub fn verified(
        conn: Connection,
        registry: Arc<AuditRegistry>,
        options: ContextOptions,
    ) -> DataResult<Self> {
        verify_audit_schema(&conn, &registry)?;
        Ok(Self::with_options(conn, registry, options))
    }

    pub fn registry(&self) -> &AuditRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Stages a new entity for insertion.
    pub fn add<T: Entity>(&mut self, entity: T) -> Tracked<T> {
        Tracked::new(self.tracker.insert(EntityState::Added, Box::new(entity)))
    }

    /// Tracks an entity that already exists in storage as unchanged.
    ///
    /// # Errors
    /// - `InvalidArgument` when the entity has no identity or the same
    ///   identity is already tracked.
    pub fn attach<T: Entity>(&mut self, entity: T) -> DataResult<Tracked<T>> {
        let id = require_id(&entity)?;
        if self.tracker.key_for(TypeId::of::<T>(), id).is_some() {
            return Err(DataError::InvalidArgument(format!(
                "{} {id} is already tracked",
                T::ENTITY_NAME
            )));
        }
        Ok(Tracked::new(
            self.tracker.insert(EntityState::Unchanged, Box::new(entity)),
        ))
    }

    /// Marks `entity` as modified, replacing the tracked values when the
    /// same identity is already tracked.
    pub fn update<T: Entity>(&mut self, entity: T) -> DataResult<Tracked<T>> {
        let id = require_id(&entity)?;
        let Some(key) = self.tracker.key_for(TypeId::of::<T>(), id) else {
            return Ok(Tracked::new(
                self.tracker.insert(EntityState::Modified, Box::new(entity)),
            ));
        };

        if let Some(entry) = self.tracker.get_mut(key) {
            entry.current = Box::new(entity);
            if entry.state != EntityState::Added {
                entry.state = EntityState::Modified;
            }
        }
        Ok(Tracked::new(key))
    }

    /// Returns the tracked handle for `id`, loading the row when it is not
    /// tracked yet. Entities staged for deletion are reported as absent.
    pub fn find<T: Entity>(&mut self, id: EntityId) -> DataResult<Option<Tracked<T>>> {
        self.settle_in_flight();
        if let Some(key) = self.tracker.key_for(TypeId::of::<T>(), id) {
            let deleted = self
                .tracker
                .get(key)
                .is_some_and(|entry| entry.state == EntityState::Deleted);
            return Ok((!deleted).then(|| Tracked::new(key)));
        }

        let Some(entity) = self.with_connection(|conn| load_by_id::<T>(conn, id))? else {
            return Ok(None);
        };
        Ok(Some(Tracked::new(
            self.tracker.insert(EntityState::Unchanged, Box::new(entity)),
        )))
    }

    pub fn entity<T: Entity>(&self, key: Tracked<T>) -> Option<&T> {
        self.tracker
            .get(key.key())?
            .current
            .as_any()
            .downcast_ref::<T>()
    }

    pub fn entity_mut<T: Entity>(&mut self, key: Tracked<T>) -> Option<&mut T> {
        self.tracker
            .get_mut(key.key())?
            .current
            .as_any_mut()
            .downcast_mut::<T>()
    }

    pub fn state<T: Entity>(&self, key: Tracked<T>) -> EntityState {
        match self.tracker.get(key.key()) {
            Some(entry) if entry.current.entity_type() == TypeId::of::<T>() => entry.state,
            _ => EntityState::Detached,
        }
    }

    pub fn is_detached<T: Entity>(&self, key: Tracked<T>) -> bool {
        self.state(key) == EntityState::Detached
    }

    /// Forces a tracked entity into the next change set even when none of
    /// its fields changed. Entities staged for insertion stay added.
    pub fn set_modified<T: Entity>(&mut self, key: Tracked<T>) -> DataResult<()> {
        if self.is_detached(key) {
            return Err(DataError::NotTracked(T::ENTITY_NAME));
        }
        if let Some(entry) = self.tracker.get_mut(key.key()) {
            if entry.state != EntityState::Added {
                entry.state = EntityState::Modified;
            }
        }
        Ok(())
    }

    /// Stages a tracked entity for deletion. An entity that was only added
    /// is simply detached.
    pub fn remove<T: Entity>(&mut self, key: Tracked<T>) -> DataResult<()> {
        match self.state(key) {
            EntityState::Detached => Err(DataError::NotTracked(T::ENTITY_NAME)),
            EntityState::Added => {
                self.tracker.remove(key.key());
                Ok(())
            }
            _ => {
                if let Some(entry) = self.tracker.get_mut(key.key()) {
                    entry.state = EntityState::Deleted;
                }
                Ok(())
            }
        }
    }

    pub fn has_changes(&self) -> bool {
        self.tracker.has_changes()
    }

    /// Audits and writes every pending change as `user_name`.
    ///
    /// Returns the number of rows written by the final flush, i.e. the
    /// insert audit rows.
    ///
    /// # Errors
    /// - `Validation` when a pending entity fails its field constraints.
    /// - `Concurrency` when a row moved or vanished under a pending write.
    /// - `Db` for storage failures, including foreign-key violations.
    pub fn commit(&mut self, user_name: Option<&str>) -> DataResult<usize> {
        let commit_id = Uuid::new_v4();
        let started_at = Instant::now();
        let entries = self.prepare(commit_id);
        if entries.is_empty() {
            return Ok(0);
        }

        let mode = self.options.concurrency;
        let result = lock_connection(&self.conn).and_then(|mut conn| {
            execute_commit(
                &mut conn,
                &self.registry,
                mode,
                entries,
                user_name,
                commit_id,
            )
        });
        self.finish(commit_id, started_at, result)
    }

    /// Non-blocking variant of `commit`.
    ///
    /// Change detection runs on the caller; the storage work runs on the
    /// blocking pool. Dropping the future does not cancel that work: its
    /// outcome stays parked on the context and is folded into the tracker
    /// by the next `find` or commit, so committed inserts are never
    /// replayed.
    pub async fn commit_async(&mut self, user_name: Option<&str>) -> DataResult<usize> {
        self.join_in_flight().await;

        let commit_id = Uuid::new_v4();
        let started_at = Instant::now();
        let entries = self.prepare(commit_id);
        if entries.is_empty() {
            return Ok(0);
        }

        let conn = Arc::clone(&self.conn);
        let registry = Arc::clone(&self.registry);
        let mode = self.options.concurrency;
        let user_name = user_name.map(str::to_owned);
        let (sender, outcome) = mpsc::sync_channel(1);

        let task = tokio::task::spawn_blocking(move || {
            let result = lock_connection(&conn).and_then(|mut conn| {
                execute_commit(
                    &mut conn,
                    &registry,
                    mode,
                    entries,
                    user_name.as_deref(),
                    commit_id,
                )
            });
            // The receiver is gone only when the context was dropped.
            let _ = sender.send(result);
        });
        self.in_flight = Some(InFlightCommit {
            commit_id,
            started_at,
            task,
            outcome,
        });

        self.join_in_flight()
            .await
            .unwrap_or_else(|| Err(DataError::Interrupted("commit outcome lost".to_string())))
    }

    /// Commits without an acting user; audit rows record a null user name.
    pub fn save_changes(&mut self) -> DataResult<usize> {
        self.commit(None)
    }

    pub(crate) fn with_connection<R>(
        &self,
        op: impl FnOnce(&Connection) -> DataResult<R>,
    ) -> DataResult<R> {
        let conn = lock_connection(&self.conn)?;
        op(&conn)
    }

    /// Awaits the in-flight commit without blocking the runtime, then folds
    /// it. Cancelling this future keeps the commit parked.
    async fn join_in_flight(&mut self) -> Option<DataResult<usize>> {
        if let Some(in_flight) = self.in_flight.as_mut() {
            if let Err(err) = (&mut in_flight.task).await {
                warn!(
                    "event=commit module=context status=task_failed commit_id={} error={}",
                    in_flight.commit_id, err
                );
            }
        }
        self.settle_in_flight()
    }

    /// Folds a parked commit outcome into the tracker, waiting for its
    /// storage work when it is still running.
    fn settle_in_flight(&mut self) -> Option<DataResult<usize>> {
        let in_flight = self.in_flight.take()?;
        let result = in_flight.outcome.recv().unwrap_or_else(|_| {
            Err(DataError::Interrupted(
                "commit task ended without an outcome".to_string(),
            ))
        });
        debug!(
            "event=commit module=context status=settled commit_id={} ok={}",
            in_flight.commit_id,
            result.is_ok()
        );
        Some(self.finish(in_flight.commit_id, in_flight.started_at, result))
    }

    fn prepare(&mut self, commit_id: Uuid) -> Vec<tracker::PendingEntry> {
        self.settle_in_flight();
        self.tracker.detect_changes();
        let entries = self.tracker.pending();
        if entries.is_empty() {
            debug!("event=commit module=context status=skipped commit_id={commit_id} reason=no_changes");
        } else {
            info!(
                "event=commit module=context status=start commit_id={} pending={} tracked={}",
                commit_id,
                entries.len(),
                self.tracker.len()
            );
        }
        entries
    }

    fn finish(
        &mut self,
        commit_id: Uuid,
        started_at: Instant,
        result: DataResult<CommitOutcome>,
    ) -> DataResult<usize> {
        match result {
            Ok(outcome) => {
                info!(
                    "event=commit module=context status=ok commit_id={} duration_ms={} primary_rows={} final_rows={} audit_rows={}",
                    commit_id,
                    started_at.elapsed().as_millis(),
                    outcome.primary_rows,
                    outcome.final_rows,
                    outcome.audit_rows
                );
                let final_rows = outcome.final_rows;
                self.tracker.apply_committed(outcome.entries);
                Ok(final_rows)
            }
            Err(err) => {
                error!(
                    "event=commit module=context status=error commit_id={} duration_ms={} error={}",
                    commit_id,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }
}

fn require_id<T: Entity>(entity: &T) -> DataResult<EntityId> {
    entity.id().ok_or_else(|| {
        DataError::InvalidArgument(format!("{} has no identity", T::ENTITY_NAME))
    })
}

fn lock_connection(conn: &Mutex<Connection>) -> DataResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| DataError::Interrupted("connection lock poisoned".to_string()))
}
