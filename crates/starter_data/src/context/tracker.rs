//! Change tracker backing the persistence context.
//!
//! # Invariants
//! - Each `(entity type, identity)` pair maps to at most one entry.
//! - `original` holds the last persisted (or attached) values of an entry;
//!   it only changes after a successful commit.
//! - Entries iterate in tracking order, which is also flush order.

use crate::model::entity::{field_values, Entity, EntityId, FieldError};
use rusqlite::types::Value;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Lifecycle state of one tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    Detached,
    Unchanged,
    Added,
    Modified,
    Deleted,
}

impl EntityState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detached => "detached",
            Self::Unchanged => "unchanged",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl Display for EntityState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed handle to an entity tracked by a `DbContext`.
pub struct Tracked<T> {
    key: u64,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Tracked<T> {
    pub(crate) fn new(key: u64) -> Self {
        Self {
            key,
            _entity: PhantomData,
        }
    }

    pub(crate) fn key(&self) -> u64 {
        self.key
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Tracked<T> {}

impl<T> PartialEq for Tracked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Tracked<T> {}

impl<T> Hash for Tracked<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<T> Debug for Tracked<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Tracked").field(&self.key).finish()
    }
}

/// Type-erased view of an `Entity` stored in the tracker.
pub(crate) trait TrackedEntity: Send {
    fn entity_type(&self) -> TypeId;
    fn entity_name(&self) -> &'static str;
    fn table(&self) -> &'static str;
    fn identity(&self) -> Option<EntityId>;
    fn assign_identity(&mut self, id: EntityId);
    fn version(&self) -> i64;
    fn assign_version(&mut self, row_version: i64);
    fn assign_creation(&mut self, created_on: Option<i64>);
    fn fields(&self) -> Vec<(&'static str, Value)>;
    fn check(&self) -> Vec<FieldError>;
    fn clone_boxed(&self) -> Box<dyn TrackedEntity>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Entity> TrackedEntity for T {
    fn entity_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn entity_name(&self) -> &'static str {
        T::ENTITY_NAME
    }

    fn table(&self) -> &'static str {
        T::TABLE
    }

    fn identity(&self) -> Option<EntityId> {
        Entity::id(self)
    }

    fn assign_identity(&mut self, id: EntityId) {
        Entity::set_id(self, id);
    }

    fn version(&self) -> i64 {
        Entity::row_version(self)
    }

    fn assign_version(&mut self, row_version: i64) {
        Entity::set_row_version(self, row_version);
    }

    fn assign_creation(&mut self, created_on: Option<i64>) {
        Entity::set_created_on(self, created_on);
    }

    fn fields(&self) -> Vec<(&'static str, Value)> {
        field_values(self)
    }

    fn check(&self) -> Vec<FieldError> {
        Entity::validate(self)
    }

    fn clone_boxed(&self) -> Box<dyn TrackedEntity> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub(crate) struct TrackedEntry {
    pub state: EntityState,
    pub current: Box<dyn TrackedEntity>,
    pub original: Box<dyn TrackedEntity>,
}

/// Cloned pending entry handed to the commit step.
pub(crate) struct PendingEntry {
    pub key: u64,
    pub state: EntityState,
    pub current: Box<dyn TrackedEntity>,
    pub original: Box<dyn TrackedEntity>,
}

#[derive(Default)]
pub(crate) struct ChangeTracker {
    next_key: u64,
    entries: BTreeMap<u64, TrackedEntry>,
    identities: HashMap<(TypeId, EntityId), u64>,
}

impl ChangeTracker {
    pub fn insert(&mut self, state: EntityState, entity: Box<dyn TrackedEntity>) -> u64 {
        let key = self.next_key;
        self.next_key += 1;

        if let Some(id) = entity.identity() {
            self.identities.insert((entity.entity_type(), id), key);
        }
        let original = entity.clone_boxed();
        self.entries.insert(
            key,
            TrackedEntry {
                state,
                current: entity,
                original,
            },
        );
        key
    }

    pub fn key_for(&self, entity_type: TypeId, id: EntityId) -> Option<u64> {
        self.identities.get(&(entity_type, id)).copied()
    }

    pub fn get(&self, key: u64) -> Option<&TrackedEntry> {
        self.entries.get(&key)
    }

    pub fn get_mut(&mut self, key: u64) -> Option<&mut TrackedEntry> {
        self.entries.get_mut(&key)
    }

    pub fn remove(&mut self, key: u64) -> Option<TrackedEntry> {
        let entry = self.entries.remove(&key)?;
        if let Some(id) = entry.original.identity() {
            self.identities.remove(&(entry.original.entity_type(), id));
        }
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Promotes unchanged entries whose values drifted from the snapshot.
    pub fn detect_changes(&mut self) {
        for entry in self.entries.values_mut() {
            if entry.state == EntityState::Unchanged && is_dirty(entry) {
                entry.state = EntityState::Modified;
            }
        }
    }

    pub fn has_changes(&self) -> bool {
        self.entries.values().any(|entry| match entry.state {
            EntityState::Unchanged => is_dirty(entry),
            EntityState::Detached => false,
            _ => true,
        })
    }

    pub fn pending(&self) -> Vec<PendingEntry> {
        self.entries
            .iter()
            .filter(|(_, entry)| {
                matches!(
                    entry.state,
                    EntityState::Added | EntityState::Modified | EntityState::Deleted
                )
            })
            .map(|(key, entry)| PendingEntry {
                key: *key,
                state: entry.state,
                current: entry.current.clone_boxed(),
                original: entry.original.clone_boxed(),
            })
            .collect()
    }

    /// Folds committed entries back: written rows become unchanged with a
    /// fresh snapshot, deleted rows are detached.
    pub fn apply_committed(&mut self, committed: Vec<PendingEntry>) {
        for pending in committed {
            if pending.state == EntityState::Deleted {
                self.remove(pending.key);
                continue;
            }

            let identity = pending.current.identity();
            let entity_type = pending.current.entity_type();
            if let Some(entry) = self.entries.get_mut(&pending.key) {
                entry.state = EntityState::Unchanged;
                entry.original = pending.current.clone_boxed();
                entry.current = pending.current;
            }
            if let Some(id) = identity {
                self.identities.insert((entity_type, id), pending.key);
            }
        }
    }
}

fn is_dirty(entry: &TrackedEntry) -> bool {
    entry.current.fields() != entry.original.fields()
}

#[cfg(test)]
mod tests {
    use super::{ChangeTracker, EntityState, PendingEntry};
    use crate::model::company::Company;
    use std::any::TypeId;

    fn persisted(id: i64, name: &str) -> Company {
        Company {
            id: Some(id),
            row_version: 1,
            ..Company::new(name)
        }
    }

    #[test]
    fn field_drift_promotes_unchanged_entry() {
        let mut tracker = ChangeTracker::default();
        let key = tracker.insert(EntityState::Unchanged, Box::new(persisted(7, "Acme")));
        assert!(!tracker.has_changes());

        let entry = tracker.get_mut(key).unwrap();
        let company = entry.current.as_any_mut().downcast_mut::<Company>().unwrap();
        company.name = "Acme Corp".to_string();
        assert!(tracker.has_changes());

        tracker.detect_changes();
        assert_eq!(tracker.get(key).unwrap().state, EntityState::Modified);
        assert_eq!(tracker.pending().len(), 1);
    }

    #[test]
    fn identity_map_follows_insert_and_remove() {
        let mut tracker = ChangeTracker::default();
        let key = tracker.insert(EntityState::Unchanged, Box::new(persisted(3, "Initech")));
        assert_eq!(tracker.key_for(TypeId::of::<Company>(), 3), Some(key));

        tracker.remove(key).unwrap();
        assert_eq!(tracker.key_for(TypeId::of::<Company>(), 3), None);
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn apply_committed_refreshes_snapshot_and_registers_identity() {
        let mut tracker = ChangeTracker::default();
        let added = tracker.insert(EntityState::Added, Box::new(Company::new("Globex")));
        let deleted = tracker.insert(EntityState::Deleted, Box::new(persisted(9, "Gone")));

        let mut committed = tracker.pending();
        assert_eq!(committed.len(), 2);
        let first: &mut PendingEntry = &mut committed[0];
        first.current.assign_identity(11);
        first.current.assign_version(1);
        tracker.apply_committed(committed);

        let entry = tracker.get(added).unwrap();
        assert_eq!(entry.state, EntityState::Unchanged);
        assert_eq!(entry.original.identity(), Some(11));
        assert_eq!(tracker.key_for(TypeId::of::<Company>(), 11), Some(added));
        assert!(tracker.get(deleted).is_none());
        assert!(!tracker.has_changes());
    }

    #[test]
    fn pending_preserves_tracking_order() {
        let mut tracker = ChangeTracker::default();
        tracker.insert(EntityState::Added, Box::new(Company::new("First")));
        tracker.insert(EntityState::Unchanged, Box::new(persisted(1, "Skipped")));
        tracker.insert(EntityState::Added, Box::new(Company::new("Second")));

        let names: Vec<String> = tracker
            .pending()
            .iter()
            .map(|entry| {
                entry
                    .current
                    .as_any()
                    .downcast_ref::<Company>()
                    .unwrap()
                    .name
                    .clone()
            })
            .collect();
        assert_eq!(names, vec!["First", "Second"]);
    }
}
