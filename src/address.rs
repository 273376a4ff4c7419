//! Opaque, crate-issued handles to a stored record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// Per-segment epoch counters, keyed by the exact path and start offset a storage was opened
/// with.
///
/// Reopening the same segment without compacting it must hand back addresses that are still
/// valid, so the epoch can't simply be "a fresh number every open": it has to be stable across
/// reopens and only change when [`StorageEpoch::bump`] is called on a compaction.
fn registry() -> &'static Mutex<HashMap<(PathBuf, u64), u64>> {
    static REGISTRY: OnceLock<Mutex<HashMap<(PathBuf, u64), u64>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Identifies one on-disk segment's current generation of addresses.
///
/// Stable across plain reopens of the same `(path, start_position)`; bumped only when that
/// segment compacts, since compaction reassigns every record's offset and so invalidates every
/// `Address` issued before it. An `Address` whose epoch doesn't match the storage's current one
/// is rejected as `InvalidAddress`, whether because it came from a different storage entirely or
/// because it predates the storage's most recent compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageEpoch(u64);

impl StorageEpoch {
    /// The current epoch for `(path, start)`, minting generation `1` the first time this segment
    /// is seen.
    pub(crate) fn for_segment(path: &Path, start: u64) -> Self {
        let mut reg = registry().lock().unwrap();
        let counter = reg.entry((path.to_path_buf(), start)).or_insert(1);
        Self(*counter)
    }

    /// Advances `(path, start)` to a new generation, invalidating every address issued under the
    /// previous one. Called once per successful compaction.
    pub(crate) fn bump(path: &Path, start: u64) -> Self {
        let mut reg = registry().lock().unwrap();
        let counter = reg.entry((path.to_path_buf(), start)).or_insert(1);
        *counter += 1;
        Self(*counter)
    }

    /// Drops `(path, start)`'s tracked generation. Called by `destroy()` so a later `file`/`dir`
    /// reuse of the same path starts again from generation `1` instead of inheriting a stale,
    /// arbitrarily high counter.
    pub(crate) fn forget(path: &Path, start: u64) {
        registry().lock().unwrap().remove(&(path.to_path_buf(), start));
    }
}

/// A handle to one record's position within its owning storage.
///
/// Addresses are opaque outside this crate: callers must not assume the offset is stable across
/// a compaction, and must not mix addresses issued by different `BlockStorage` instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    offset: u64,
    epoch: StorageEpoch,
}

impl Address {
    pub(crate) fn new(offset: u64, epoch: StorageEpoch) -> Self {
        Self { offset, epoch }
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn epoch(&self) -> StorageEpoch {
        self.epoch
    }

    pub(crate) fn belongs_to(&self, epoch: StorageEpoch) -> bool {
        self.epoch == epoch
    }
}
