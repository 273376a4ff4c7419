//! Indexed search: a forward cursor over a storage's live records (spec.md §4.4).

use std::cmp::Ordering;
use std::sync::Arc;

use crate::address::{Address, StorageEpoch};
use crate::block_storage::BlockStorage;
use crate::cursor::InputCursor;
use crate::error::Result;
use crate::serializator::{Serializator, SingleRead, StoredObject};

/// Compares two stored objects for ordering, used to test them against [`KeyFilter`] bounds.
pub type Comparator = Arc<dyn Fn(&dyn StoredObject, &dyn StoredObject) -> Ordering + Send + Sync>;

/// Restricts a [`Search`] to a subset of the records it would otherwise visit.
pub enum KeyFilter {
    /// Every live record is visited.
    None,
    /// Only records comparing equal (via the search's [`Comparator`]) to one of these keys.
    KeySet(Vec<Box<dyn StoredObject>>),
    /// Only records whose key falls within `[low, high]`, inclusive, per the search's
    /// [`Comparator`].
    Interval { low: Box<dyn StoredObject>, high: Box<dyn StoredObject> },
}

/// A forward cursor over one storage's records, in log order, transparently skipping
/// tombstones.
///
/// Owns its own input cursor rather than drawing one from the storage's bounded pool, since a
/// search may legitimately run for the storage's entire lifetime and shouldn't compete with
/// point reads for a pool slot. The concrete cursor kind (mapped or buffered) is whatever the
/// owning storage's generation uses; `Search` itself is agnostic to it.
pub struct Search {
    cursor: Box<dyn InputCursor>,
    serializator: Arc<dyn Serializator>,
    storage: BlockStorage,
    epoch: StorageEpoch,
    comparator: Option<Comparator>,
    filter: KeyFilter,
    current: Option<Address>,
}

impl Search {
    pub(crate) fn new(
        cursor: Box<dyn InputCursor>,
        serializator: Arc<dyn Serializator>,
        storage: BlockStorage,
        epoch: StorageEpoch,
    ) -> Self {
        Self {
            cursor,
            serializator,
            storage,
            epoch,
            comparator: None,
            filter: KeyFilter::None,
            current: None,
        }
    }

    /// Restricts this search to records matching `filter`, compared via `comparator`.
    pub fn with_filter(mut self, comparator: Comparator, filter: KeyFilter) -> Self {
        self.comparator = Some(comparator);
        self.filter = filter;
        self
    }

    /// The address of the record most recently yielded by [`Iterator::next`], if any.
    pub fn current_address(&self) -> Option<Address> {
        self.current
    }

    /// Removes the record most recently yielded by [`Iterator::next`].
    pub fn remove(&mut self) -> Result<()> {
        match self.current {
            Some(addr) => self.storage.remove(addr),
            None => Err(crate::error::StorageError::InvalidAddress { address: self.cursor.position() }),
        }
    }

    fn matches(&self, obj: &dyn StoredObject) -> bool {
        let Some(comparator) = &self.comparator else {
            return matches!(self.filter, KeyFilter::None);
        };
        match &self.filter {
            KeyFilter::None => true,
            KeyFilter::KeySet(keys) => keys.iter().any(|k| comparator(obj, k.as_ref()) == Ordering::Equal),
            KeyFilter::Interval { low, high } => {
                comparator(obj, low.as_ref()) != Ordering::Less && comparator(obj, high.as_ref()) != Ordering::Greater
            }
        }
    }
}

impl Iterator for Search {
    type Item = Result<Box<dyn StoredObject>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record_start = self.cursor.position();
            match self.serializator.read_one(&mut *self.cursor) {
                Ok(SingleRead::EndOfLog) => return None,
                Ok(SingleRead::Tombstone) => continue,
                Ok(SingleRead::Live(obj)) => {
                    if self.matches(obj.as_ref()) {
                        self.current = Some(Address::new(record_start, self.epoch));
                        return Some(Ok(obj));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
