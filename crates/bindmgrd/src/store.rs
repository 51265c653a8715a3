//! Binding Store - transactional table of bindings and profiles
//!
//! All mutation goes through [`BindingStore::transaction`]. The closure sees
//! a [`BindingTxn`]; if it returns `Err` nothing it did becomes visible.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Bound;
use tracing::{debug, warn};

use segbind_common::{
    BindError, BindResult, Binding, BindingFilter, BindingKey, Profile, ProfileId, ProfileKind,
    RefIndex, RefTransition, SegmentId, SegmentTarget,
};

/// Row operations available inside a transaction.
pub trait BindingTxn {
    /// All rows matching the filter; empty is fine.
    fn find(&self, filter: &BindingFilter) -> Vec<Binding>;

    /// All rows matching the filter; `NotFound` when there are none.
    fn find_all(&self, filter: &BindingFilter) -> BindResult<Vec<Binding>>;

    /// First matching row in key order; `NotFound` when there is none.
    fn find_first(&self, filter: &BindingFilter) -> BindResult<Binding>;

    /// The single matching row; `NotFound` on zero, `Ambiguous` on several.
    fn find_one(&self, filter: &BindingFilter) -> BindResult<Binding>;

    /// Inserts a new row; `Conflict` if the key exists. Reports whether the
    /// row created its segment/target pair.
    fn insert(&mut self, binding: Binding) -> BindResult<RefTransition>;

    /// Overwrites the attributes of an existing row with the same key.
    /// Returns the previous row.
    fn replace(&mut self, binding: Binding) -> BindResult<Binding>;

    /// Moves the single binding of `resource_id` to `new_segment`.
    /// Returns the previous row. Never creates.
    fn update(&mut self, resource_id: &str, new_segment: SegmentId) -> BindResult<Binding>;

    /// Deletes every matching row and returns them. Never errors on absence.
    fn delete(&mut self, filter: &BindingFilter) -> Vec<Binding>;

    /// Number of rows referencing a segment/target pair.
    fn segment_refs(&self, pair: &SegmentTarget) -> u32;

    /// Adds a profile; `Conflict` if the id or the (name, kind) pair is taken.
    fn add_profile(&mut self, profile: Profile) -> BindResult<()>;

    fn profile_by_id(&self, id: ProfileId) -> BindResult<Profile>;

    fn profile_by_name(&self, name: &str, kind: ProfileKind) -> BindResult<Profile>;

    fn profiles_by_kind(&self, kind: ProfileKind) -> Vec<Profile>;

    /// Number of bindings referencing the profile.
    fn profile_in_use(&self, id: ProfileId) -> usize;

    /// Deletes an unreferenced profile.
    fn delete_profile(&mut self, id: ProfileId) -> BindResult<Profile>;
}

/// How many rows a lookup expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cardinality {
    All,
    First,
    One,
}

/// In-memory tables with a segment/target reference index.
#[derive(Debug, Default)]
struct Tables {
    bindings: BTreeMap<BindingKey, Binding>,
    segment_refs: RefIndex<SegmentTarget>,
    profiles: BTreeMap<ProfileId, Profile>,
}

/// Inverse of one write made inside an open transaction.
#[derive(Debug)]
enum Undo {
    Inserted(BindingKey),
    Removed(Binding),
    Replaced(Binding),
    ProfileAdded(ProfileId),
    ProfileRemoved(Profile),
}

impl Tables {
    fn matching<'a>(&'a self, filter: &'a BindingFilter) -> Box<dyn Iterator<Item = &'a Binding> + 'a> {
        match &filter.resource_id {
            // Keys sort by resource first, so a resource filter is a range scan.
            Some(resource_id) => {
                let start = BindingKey {
                    resource_id: resource_id.clone(),
                    segment_id: SegmentId::MIN,
                    physical_target: String::new(),
                };
                Box::new(
                    self.bindings
                        .range((Bound::Included(start), Bound::Unbounded))
                        .map(|(_, b)| b)
                        .take_while(move |b| b.resource_id == *resource_id)
                        .filter(move |b| filter.matches(b)),
                )
            }
            None => Box::new(self.bindings.values().filter(move |b| filter.matches(b))),
        }
    }

    fn lookup(&self, filter: &BindingFilter, cardinality: Cardinality) -> BindResult<Vec<Binding>> {
        let mut rows = self.matching(filter);
        match cardinality {
            Cardinality::All => {
                let rows: Vec<Binding> = rows.cloned().collect();
                if rows.is_empty() {
                    return Err(BindError::not_found(filter));
                }
                Ok(rows)
            }
            Cardinality::First => rows
                .next()
                .map(|b| vec![b.clone()])
                .ok_or_else(|| BindError::not_found(filter)),
            Cardinality::One => {
                let first = rows.next().ok_or_else(|| BindError::not_found(filter))?;
                let extra = rows.count();
                if extra > 0 {
                    return Err(BindError::ambiguous(filter, extra + 1));
                }
                Ok(vec![first.clone()])
            }
        }
    }

    fn single(&self, filter: &BindingFilter, cardinality: Cardinality) -> BindResult<Binding> {
        self.lookup(filter, cardinality)?
            .into_iter()
            .next()
            .ok_or_else(|| BindError::not_found(filter))
    }

    fn check_profile(&self, binding: &Binding) -> BindResult<()> {
        match binding.profile_id {
            Some(id) if !self.profiles.contains_key(&id) => Err(BindError::profile_not_found(id)),
            _ => Ok(()),
        }
    }

    fn put_row(&mut self, binding: Binding) -> RefTransition {
        let transition = self.segment_refs.acquire(binding.segment_target());
        self.bindings.insert(binding.key(), binding);
        transition
    }

    fn remove_row(&mut self, key: &BindingKey) -> Option<Binding> {
        let row = self.bindings.remove(key)?;
        if self.segment_refs.release(&row.segment_target()).is_err() {
            warn!(key = %key, "Segment reference index missing an entry for removed row");
        }
        Some(row)
    }

    fn profile_by_id(&self, id: ProfileId) -> BindResult<Profile> {
        self.profiles
            .get(&id)
            .cloned()
            .ok_or_else(|| BindError::profile_not_found(id))
    }

    fn profile_in_use(&self, id: ProfileId) -> usize {
        self.bindings
            .values()
            .filter(|b| b.profile_id == Some(id))
            .count()
    }

    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::Inserted(key) => {
                self.remove_row(&key);
            }
            Undo::Removed(row) => {
                self.put_row(row);
            }
            Undo::Replaced(row) => {
                self.bindings.insert(row.key(), row);
            }
            Undo::ProfileAdded(id) => {
                self.profiles.remove(&id);
            }
            Undo::ProfileRemoved(profile) => {
                self.profiles.insert(profile.id, profile);
            }
        }
    }
}

/// Open transaction over the locked tables.
///
/// Writes go straight to the tables and push their inverse onto a journal;
/// [`Txn::rollback`] replays the journal backwards.
struct Txn<'a> {
    tables: &'a mut Tables,
    journal: Vec<Undo>,
}

impl<'a> Txn<'a> {
    fn new(tables: &'a mut Tables) -> Self {
        Self {
            tables,
            journal: Vec::new(),
        }
    }

    /// Undoes every write; returns how many were reverted.
    fn rollback(mut self) -> usize {
        let reverted = self.journal.len();
        while let Some(undo) = self.journal.pop() {
            self.tables.revert(undo);
        }
        reverted
    }

    fn remove_row(&mut self, key: &BindingKey) -> Option<Binding> {
        let row = self.tables.remove_row(key)?;
        self.journal.push(Undo::Removed(row.clone()));
        Some(row)
    }
}

impl BindingTxn for Txn<'_> {
    fn find(&self, filter: &BindingFilter) -> Vec<Binding> {
        self.tables.matching(filter).cloned().collect()
    }

    fn find_all(&self, filter: &BindingFilter) -> BindResult<Vec<Binding>> {
        self.tables.lookup(filter, Cardinality::All)
    }

    fn find_first(&self, filter: &BindingFilter) -> BindResult<Binding> {
        self.tables.single(filter, Cardinality::First)
    }

    fn find_one(&self, filter: &BindingFilter) -> BindResult<Binding> {
        self.tables.single(filter, Cardinality::One)
    }

    fn insert(&mut self, binding: Binding) -> BindResult<RefTransition> {
        let key = binding.key();
        if self.tables.bindings.contains_key(&key) {
            return Err(BindError::conflict(key));
        }
        self.tables.check_profile(&binding)?;
        let transition = self.tables.put_row(binding);
        self.journal.push(Undo::Inserted(key));
        Ok(transition)
    }

    fn replace(&mut self, binding: Binding) -> BindResult<Binding> {
        self.tables.check_profile(&binding)?;
        let key = binding.key();
        let Some(row) = self.tables.bindings.get_mut(&key) else {
            return Err(BindError::not_found(BindingFilter::from_key(&key)));
        };
        let previous = std::mem::replace(row, binding);
        self.journal.push(Undo::Replaced(previous.clone()));
        Ok(previous)
    }

    fn update(&mut self, resource_id: &str, new_segment: SegmentId) -> BindResult<Binding> {
        let previous = self.find_one(&BindingFilter::all().resource(resource_id))?;
        if previous.segment_id == new_segment {
            return Ok(previous);
        }

        let mut moved = previous.clone();
        moved.segment_id = new_segment;
        if self.tables.bindings.contains_key(&moved.key()) {
            return Err(BindError::conflict(moved.key()));
        }

        self.remove_row(&previous.key());
        self.insert(moved)?;
        Ok(previous)
    }

    fn delete(&mut self, filter: &BindingFilter) -> Vec<Binding> {
        let keys: Vec<BindingKey> = self.tables.matching(filter).map(Binding::key).collect();
        keys.iter().filter_map(|key| self.remove_row(key)).collect()
    }

    fn segment_refs(&self, pair: &SegmentTarget) -> u32 {
        self.tables.segment_refs.count(pair)
    }

    fn add_profile(&mut self, profile: Profile) -> BindResult<()> {
        if self.tables.profiles.contains_key(&profile.id) {
            return Err(BindError::conflict(format!("profile {}", profile.id)));
        }
        if self
            .tables
            .profiles
            .values()
            .any(|p| p.kind == profile.kind && p.name == profile.name)
        {
            return Err(BindError::conflict(format!(
                "{} profile '{}'",
                profile.kind, profile.name
            )));
        }
        self.journal.push(Undo::ProfileAdded(profile.id));
        self.tables.profiles.insert(profile.id, profile);
        Ok(())
    }

    fn profile_by_id(&self, id: ProfileId) -> BindResult<Profile> {
        self.tables.profile_by_id(id)
    }

    fn profile_by_name(&self, name: &str, kind: ProfileKind) -> BindResult<Profile> {
        self.tables
            .profiles
            .values()
            .find(|p| p.kind == kind && p.name == name)
            .cloned()
            .ok_or_else(|| BindError::profile_not_found(name))
    }

    fn profiles_by_kind(&self, kind: ProfileKind) -> Vec<Profile> {
        self.tables
            .profiles
            .values()
            .filter(|p| p.kind == kind)
            .cloned()
            .collect()
    }

    fn profile_in_use(&self, id: ProfileId) -> usize {
        self.tables.profile_in_use(id)
    }

    fn delete_profile(&mut self, id: ProfileId) -> BindResult<Profile> {
        let name = self.tables.profile_by_id(id)?.name;
        let in_use = self.tables.profile_in_use(id);
        if in_use > 0 {
            return Err(BindError::profile_in_use(name, in_use));
        }
        let removed = self
            .tables
            .profiles
            .remove(&id)
            .ok_or_else(|| BindError::profile_not_found(id))?;
        self.journal.push(Undo::ProfileRemoved(removed.clone()));
        Ok(removed)
    }
}

/// Persistent, transactional binding table.
pub trait BindingStore: Send + Sync {
    /// Runs `f` atomically. Every mutation is discarded if `f` returns `Err`.
    fn transaction<T, F>(&self, f: F) -> BindResult<T>
    where
        F: FnOnce(&mut dyn BindingTxn) -> BindResult<T>;

    /// Runs a read-only closure against a consistent snapshot.
    fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&dyn BindingTxn) -> T;

    fn find(&self, filter: &BindingFilter) -> Vec<Binding> {
        self.read(|tx| tx.find(filter))
    }

    fn find_all(&self, filter: &BindingFilter) -> BindResult<Vec<Binding>> {
        self.read(|tx| tx.find_all(filter))
    }

    fn find_first(&self, filter: &BindingFilter) -> BindResult<Binding> {
        self.read(|tx| tx.find_first(filter))
    }

    fn find_one(&self, filter: &BindingFilter) -> BindResult<Binding> {
        self.read(|tx| tx.find_one(filter))
    }

    fn insert(&self, binding: Binding) -> BindResult<RefTransition> {
        self.transaction(|tx| tx.insert(binding))
    }

    fn update(&self, resource_id: &str, new_segment: SegmentId) -> BindResult<Binding> {
        self.transaction(|tx| tx.update(resource_id, new_segment))
    }

    fn delete(&self, filter: &BindingFilter) -> Vec<Binding> {
        // A delete cannot fail, so the transaction always commits.
        self.transaction(|tx| Ok(tx.delete(filter)))
            .unwrap_or_default()
    }

    fn segment_refs(&self, pair: &SegmentTarget) -> u32 {
        self.read(|tx| tx.segment_refs(pair))
    }

    fn add_profile(&self, profile: Profile) -> BindResult<()> {
        self.transaction(|tx| tx.add_profile(profile))
    }

    fn profile_by_name(&self, name: &str, kind: ProfileKind) -> BindResult<Profile> {
        self.read(|tx| tx.profile_by_name(name, kind))
    }

    fn delete_profile(&self, id: ProfileId) -> BindResult<Profile> {
        self.transaction(|tx| tx.delete_profile(id))
    }
}

/// In-memory store.
///
/// A transaction holds the lock for its whole run, so writers are
/// serialized and readers never see a partially applied transaction. Writes
/// are journaled and undone when the closure returns `Err`, so a transaction
/// costs what it touches rather than the size of the tables.
#[derive(Debug, Default)]
pub struct MemoryBindingStore {
    tables: Mutex<Tables>,
}

impl MemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of binding rows.
    pub fn len(&self) -> usize {
        self.tables.lock().bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of referenced segment/target pairs.
    pub fn referenced_segments(&self) -> usize {
        self.tables.lock().segment_refs.len()
    }
}

impl BindingStore for MemoryBindingStore {
    fn transaction<T, F>(&self, f: F) -> BindResult<T>
    where
        F: FnOnce(&mut dyn BindingTxn) -> BindResult<T>,
    {
        let mut tables = self.tables.lock();
        let mut txn = Txn::new(&mut tables);
        match f(&mut txn) {
            Ok(value) => Ok(value),
            Err(e) => {
                let reverted = txn.rollback();
                debug!(error = %e, reverted, "Binding transaction rolled back");
                Err(e)
            }
        }
    }

    fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&dyn BindingTxn) -> T,
    {
        let mut tables = self.tables.lock();
        let txn = Txn::new(&mut tables);
        f(&txn)
    }
}
