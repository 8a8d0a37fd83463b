use crate::{HypervisorError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One record: the operation lock serializes read-modify-write sequences,
/// the snapshot is what readers see.
#[derive(Debug)]
struct Slot<T> {
    op: Arc<Mutex<()>>,
    snapshot: RwLock<T>,
    removed: AtomicBool,
}

impl<T: Clone> Slot<T> {
    fn new(record: T) -> Self {
        Self {
            op: Arc::new(Mutex::new(())),
            snapshot: RwLock::new(record),
            removed: AtomicBool::new(false),
        }
    }

    fn read(&self) -> T {
        self.snapshot.read().clone()
    }
}

/// Typed record table with per-record locking.
///
/// The map's shard locks are only held for lookup, insert and remove; no
/// operation holds them across an await point or a record lock.
pub struct Table<K, T> {
    slots: DashMap<K, Arc<Slot<T>>>,
    not_found: fn(String) -> HypervisorError,
}

impl<K: Eq + Hash, T> std::fmt::Debug for Table<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table").field("len", &self.slots.len()).finish()
    }
}

/// Exclusive hold on a record for a multi-step sequence. The lock is
/// released when the guard is dropped, whatever the exit path.
pub struct RecordGuard<K, T> {
    id: K,
    slot: Arc<Slot<T>>,
    current: T,
    _lock: OwnedMutexGuard<()>,
}

/// Result of a non-blocking lock attempt.
pub enum TryLock<K, T> {
    Acquired(RecordGuard<K, T>),
    /// Another sequence holds the record; carries the published state.
    Busy(T),
}

impl<K, T> Table<K, T>
where
    K: Clone + Eq + Hash + Ord + Display,
    T: Clone,
{
    pub fn new(not_found: fn(String) -> HypervisorError) -> Self {
        Self {
            slots: DashMap::new(),
            not_found,
        }
    }

    fn missing(&self, id: &K) -> HypervisorError {
        (self.not_found)(id.to_string())
    }

    fn slot(&self, id: &K) -> Result<Arc<Slot<T>>> {
        self.slots
            .get(id)
            .map(|s| s.value().clone())
            .ok_or_else(|| self.missing(id))
    }

    /// Insert a new record. Creation is not idempotent.
    pub fn put(&self, id: K, record: T) -> Result<()> {
        match self.slots.entry(id) {
            Entry::Occupied(entry) => Err(HypervisorError::AlreadyExists(entry.key().to_string())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Slot::new(record)));
                Ok(())
            }
        }
    }

    /// Last published state of a record.
    pub fn get(&self, id: &K) -> Result<T> {
        Ok(self.slot(id)?.read())
    }

    pub fn contains(&self, id: &K) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Atomic read-modify-write under the record's lock.
    pub async fn update<R>(&self, id: &K, mutate: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut guard = self.lock(id).await?;
        let out = mutate(&mut guard.current);
        guard.publish();
        Ok(out)
    }

    /// Wait for exclusive access to a record.
    pub async fn lock(&self, id: &K) -> Result<RecordGuard<K, T>> {
        let slot = self.slot(id)?;
        let lock = slot.op.clone().lock_owned().await;
        self.guard(id, slot, lock)
    }

    /// Take the record lock only if nobody else holds it.
    pub fn try_lock(&self, id: &K) -> Result<TryLock<K, T>> {
        let slot = self.slot(id)?;
        match slot.op.clone().try_lock_owned() {
            Ok(lock) => Ok(TryLock::Acquired(self.guard(id, slot, lock)?)),
            Err(_) => Ok(TryLock::Busy(slot.read())),
        }
    }

    fn guard(
        &self,
        id: &K,
        slot: Arc<Slot<T>>,
        lock: OwnedMutexGuard<()>,
    ) -> Result<RecordGuard<K, T>> {
        // The record may have been removed while we waited.
        if slot.removed.load(Ordering::Acquire) {
            return Err(self.missing(id));
        }
        Ok(RecordGuard {
            id: id.clone(),
            current: slot.read(),
            slot,
            _lock: lock,
        })
    }

    /// Remove a record nobody is operating on.
    pub async fn remove(&self, id: &K) -> Result<T> {
        let guard = self.lock(id).await?;
        Ok(self.remove_locked(guard))
    }

    /// Remove a record while holding its lock.
    pub fn remove_locked(&self, guard: RecordGuard<K, T>) -> T {
        guard.slot.removed.store(true, Ordering::Release);
        self.slots
            .remove_if(&guard.id, |_, slot| Arc::ptr_eq(slot, &guard.slot));
        guard.current
    }

    /// Lazy listing of the records matching `filter`.
    ///
    /// Only the set of record handles is captured up front; each record is
    /// read when iteration reaches it, so the listing never waits on record
    /// locks and may observe writes made after it was created.
    pub fn list<F>(&self, filter: F) -> Listing<K, T, F>
    where
        F: Fn(&T) -> bool,
    {
        let mut entries: Vec<(K, Arc<Slot<T>>)> = self
            .slots
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        Listing { entries, filter }
    }

    /// Listing restricted to `ids`, in request order. Unknown ids are skipped.
    pub fn list_ids<F>(&self, ids: &[K], filter: F) -> Listing<K, T, F>
    where
        F: Fn(&T) -> bool,
    {
        let entries = ids
            .iter()
            .filter_map(|id| self.slots.get(id).map(|s| (id.clone(), s.value().clone())))
            .collect();

        Listing { entries, filter }
    }
}

impl<K, T: Clone> RecordGuard<K, T> {
    pub fn id(&self) -> &K {
        &self.id
    }

    /// Working copy; changes are invisible to readers until [`publish`](Self::publish).
    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut T {
        &mut self.current
    }

    /// Make the working copy the record's visible state.
    pub fn publish(&mut self) {
        *self.slot.snapshot.write() = self.current.clone();
    }

    /// Change the working copy and publish it in one step.
    pub fn apply(&mut self, mutate: impl FnOnce(&mut T)) {
        mutate(&mut self.current);
        self.publish();
    }
}

/// Restartable snapshot listing returned by [`Table::list`].
pub struct Listing<K, T, F> {
    entries: Vec<(K, Arc<Slot<T>>)>,
    filter: F,
}

impl<K, T, F> Listing<K, T, F>
where
    T: Clone,
    F: Fn(&T) -> bool,
{
    /// Iterate from the start. Each pass re-reads the current state.
    pub fn iter(&self) -> ListingIter<'_, K, T, F> {
        ListingIter {
            listing: self,
            pos: 0,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(id, _)| id)
    }
}

pub struct ListingIter<'a, K, T, F> {
    listing: &'a Listing<K, T, F>,
    pos: usize,
}

impl<'a, K, T, F> Iterator for ListingIter<'a, K, T, F>
where
    T: Clone,
    F: Fn(&T) -> bool,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while let Some((_, slot)) = self.listing.entries.get(self.pos) {
            self.pos += 1;
            if slot.removed.load(Ordering::Acquire) {
                continue;
            }
            let record = slot.read();
            if (self.listing.filter)(&record) {
                return Some(record);
            }
        }
        None
    }
}

impl<'a, K, T, F> IntoIterator for &'a Listing<K, T, F>
where
    T: Clone,
    F: Fn(&T) -> bool,
{
    type Item = T;
    type IntoIter = ListingIter<'a, K, T, F>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
#[path = "table_tests.rs"]
mod table_tests;
