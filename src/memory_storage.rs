//! The in-memory sibling of [`crate::block_storage::BlockStorage`] (spec.md §4.5).
//!
//! Used both as a reference oracle for tests (callers can drive the same sequence of
//! `store`/`read`/`remove`/`search` calls against this and a real `BlockStorage` and expect
//! identical observable behavior, modulo addressing width and durability) and as a swap-in for
//! buckets that need no durability at all.
//!
//! Unlike `BlockStorage`, there is no serialization round-trip here: a stored object is kept as
//! an `Arc<dyn StoredObject>` and `read` hands back a cloned `Arc` rather than a freshly decoded
//! `Box`, since there's no encoded form to decode from. This is the one place this crate's
//! in-memory and on-disk storages genuinely differ in shape, not just in durability.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StorageError};
use crate::serializator::StoredObject;

/// A 32-bit index into a [`MemoryStorage`]'s slot array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryAddress(u32);

impl MemoryAddress {
    fn index(self) -> usize {
        self.0 as usize
    }
}

struct Inner {
    slots: Vec<Option<Arc<dyn StoredObject>>>,
    tombstones: usize,
}

/// A growable array of optional payloads with a tombstone counter, matching `BlockStorage`'s
/// `size`/`fragmentation`/`store`/`read`/`remove`/`search` contract.
///
/// Cheaply `Clone`: every clone shares the same backing slot array, mirroring
/// [`crate::block_storage::BlockStorage`]'s own cheap-clone handle shape.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { slots: Vec::new(), tombstones: 0 })),
        }
    }

    /// Appends `obj`, reusing the trailing slot if it was left empty by a previous `remove`.
    pub fn store(&self, obj: Arc<dyn StoredObject>) -> MemoryAddress {
        let mut inner = self.inner.lock();
        if matches!(inner.slots.last(), Some(None)) {
            let idx = inner.slots.len() - 1;
            inner.slots[idx] = Some(obj);
            inner.tombstones -= 1;
            return MemoryAddress(idx as u32);
        }
        inner.slots.push(Some(obj));
        MemoryAddress((inner.slots.len() - 1) as u32)
    }

    /// Reads the object at `addr`, if it hasn't been removed.
    pub fn read(&self, addr: MemoryAddress) -> Result<Arc<dyn StoredObject>> {
        let inner = self.inner.lock();
        match inner.slots.get(addr.index()) {
            Some(Some(obj)) => Ok(Arc::clone(obj)),
            Some(None) | None => Err(StorageError::InvalidAddress { address: addr.0 as u64 }),
        }
    }

    /// Empties the slot at `addr`. Idempotent on an already-empty slot, matching
    /// [`crate::block_storage::BlockStorage::remove`]'s choice for an already-tombstoned
    /// address.
    ///
    /// If `addr` names the last occupied slot, the vector is shrunk, collapsing any trailing
    /// emptied slots left behind by earlier removals.
    pub fn remove(&self, addr: MemoryAddress) -> Result<()> {
        let mut inner = self.inner.lock();
        let idx = addr.index();
        match inner.slots.get(idx) {
            None => return Err(StorageError::InvalidAddress { address: addr.0 as u64 }),
            Some(None) => return Ok(()),
            Some(Some(_)) => {}
        }
        inner.slots[idx] = None;
        inner.tombstones += 1;
        while matches!(inner.slots.last(), Some(None)) {
            inner.slots.pop();
            inner.tombstones -= 1;
        }
        Ok(())
    }

    /// The number of live (non-removed) entries.
    pub fn size(&self) -> u32 {
        let inner = self.inner.lock();
        (inner.slots.len() - inner.tombstones) as u32
    }

    /// `tombstones / (live + tombstones)`, or `0.0` if empty.
    pub fn fragmentation(&self) -> f64 {
        let inner = self.inner.lock();
        let total = inner.slots.len();
        if total == 0 {
            0.0
        } else {
            inner.tombstones as f64 / total as f64
        }
    }

    /// A forward [`MemorySearch`] over this storage's current live entries.
    ///
    /// Snapshots the live entries at call time: unlike `BlockStorage::search`, which walks a
    /// file whose tail can still grow, this iterates a fixed list taken up front.
    pub fn search(&self) -> MemorySearch {
        let inner = self.inner.lock();
        let entries: Vec<(MemoryAddress, Arc<dyn StoredObject>)> = inner
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|obj| (MemoryAddress(i as u32), Arc::clone(obj))))
            .collect();
        MemorySearch {
            storage: self.clone(),
            entries: entries.into_iter(),
            comparator: None,
            filter: MemoryKeyFilter::None,
            current: None,
        }
    }
}

/// Compares two stored objects for ordering, used to test them against [`MemoryKeyFilter`]
/// bounds. Mirrors [`crate::search::Comparator`].
pub type MemoryComparator = Arc<dyn Fn(&dyn StoredObject, &dyn StoredObject) -> Ordering + Send + Sync>;

/// Restricts a [`MemorySearch`] to a subset of the entries it would otherwise visit. Mirrors
/// [`crate::search::KeyFilter`].
pub enum MemoryKeyFilter {
    None,
    KeySet(Vec<Arc<dyn StoredObject>>),
    Interval { low: Arc<dyn StoredObject>, high: Arc<dyn StoredObject> },
}

/// A forward cursor over a [`MemoryStorage`]'s live entries as of when the search was created.
pub struct MemorySearch {
    storage: MemoryStorage,
    entries: std::vec::IntoIter<(MemoryAddress, Arc<dyn StoredObject>)>,
    comparator: Option<MemoryComparator>,
    filter: MemoryKeyFilter,
    current: Option<MemoryAddress>,
}

impl MemorySearch {
    /// Restricts this search to entries matching `filter`, compared via `comparator`.
    pub fn with_filter(mut self, comparator: MemoryComparator, filter: MemoryKeyFilter) -> Self {
        self.comparator = Some(comparator);
        self.filter = filter;
        self
    }

    /// The address of the entry most recently yielded by [`Iterator::next`], if any.
    pub fn current_address(&self) -> Option<MemoryAddress> {
        self.current
    }

    /// Removes the entry most recently yielded by [`Iterator::next`].
    pub fn remove(&mut self) -> Result<()> {
        match self.current {
            Some(addr) => self.storage.remove(addr),
            None => Err(StorageError::InvalidAddress { address: 0 }),
        }
    }

    fn matches(&self, obj: &dyn StoredObject) -> bool {
        let Some(comparator) = &self.comparator else {
            return matches!(self.filter, MemoryKeyFilter::None);
        };
        match &self.filter {
            MemoryKeyFilter::None => true,
            MemoryKeyFilter::KeySet(keys) => {
                keys.iter().any(|k| comparator(obj, k.as_ref()) == Ordering::Equal)
            }
            MemoryKeyFilter::Interval { low, high } => {
                comparator(obj, low.as_ref()) != Ordering::Less
                    && comparator(obj, high.as_ref()) != Ordering::Greater
            }
        }
    }
}

impl Iterator for MemorySearch {
    type Item = Result<Arc<dyn StoredObject>>;

    fn next(&mut self) -> Option<Self::Item> {
        for (addr, obj) in self.entries.by_ref() {
            if self.matches(obj.as_ref()) {
                self.current = Some(addr);
                return Some(Ok(obj));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Payload(u32);

    #[test]
    fn store_then_read_round_trips() {
        let storage = MemoryStorage::new();
        let addr = storage.store(Arc::new(Payload(42)));
        let obj = storage.read(addr).unwrap();
        assert_eq!(obj.as_any().downcast_ref::<Payload>().unwrap().0, 42);
        assert_eq!(storage.size(), 1);
    }

    #[test]
    fn remove_of_last_slot_shrinks_and_collapses_trailing_tombstones() {
        let storage = MemoryStorage::new();
        let a = storage.store(Arc::new(Payload(1)));
        let b = storage.store(Arc::new(Payload(2)));
        let c = storage.store(Arc::new(Payload(3)));
        storage.remove(b).unwrap();
        assert_eq!(storage.size(), 2);
        assert!((storage.fragmentation() - (1.0 / 3.0)).abs() < 1e-9);

        storage.remove(c).unwrap();
        // Removing the trailing slot collapses it *and* the tombstone left behind by removing
        // `b`, since that tombstone was itself now trailing.
        assert_eq!(storage.size(), 1);
        assert_eq!(storage.fragmentation(), 0.0);

        assert!(storage.read(a).is_ok());
    }

    #[test]
    fn remove_is_idempotent_on_a_tombstoned_address() {
        let storage = MemoryStorage::new();
        let a = storage.store(Arc::new(Payload(1)));
        let _b = storage.store(Arc::new(Payload(2)));
        storage.remove(a).unwrap();
        assert!(storage.remove(a).is_ok());
    }

    #[test]
    fn remove_past_the_end_is_invalid_address() {
        let storage = MemoryStorage::new();
        let _ = storage.store(Arc::new(Payload(1)));
        let err = storage.remove(MemoryAddress(99)).unwrap_err();
        assert!(matches!(err, StorageError::InvalidAddress { .. }));
    }

    #[test]
    fn search_skips_removed_slots() {
        let storage = MemoryStorage::new();
        let a = storage.store(Arc::new(Payload(1)));
        let _b = storage.store(Arc::new(Payload(2)));
        let c = storage.store(Arc::new(Payload(3)));
        storage.remove(a).unwrap();

        let found: Vec<u32> = storage
            .search()
            .map(|r| r.unwrap().as_any().downcast_ref::<Payload>().unwrap().0)
            .collect();
        assert_eq!(found, vec![2, 3]);
        let _ = c;
    }

    #[test]
    fn search_remove_at_cursor() {
        let storage = MemoryStorage::new();
        storage.store(Arc::new(Payload(1)));
        storage.store(Arc::new(Payload(2)));

        let mut search = storage.search();
        assert!(search.next().is_some());
        search.remove().unwrap();
        assert_eq!(storage.size(), 1);
    }
}
