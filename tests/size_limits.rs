//! Capacity-boundary tests mirroring spec.md §8's S4 and the contract table's `CapacityFull`
//! entries: a segment's `maximalLength` is a hard ceiling, writes that would cross it fail
//! without disturbing anything already committed, and a record that fits exactly at the boundary
//! still succeeds.

mod common;

use bucket_storage::{BlockStorage, StorageConfigBuilder, StorageError};
use common::{blob_registry, downcast_blob, tagged_len, Blob};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn open(path: &std::path::Path, maximal_length: u64) -> BlockStorage {
    BlockStorage::open(
        StorageConfigBuilder::new()
            .file(path)
            .buffer_size(4096)
            .maximal_length(maximal_length)
            .cache_classes(blob_registry()),
    )
    .unwrap()
}

fn record_len(payload_len: usize) -> u64 {
    4 + tagged_len(payload_len) as u64
}

/// S4: a segment sized to fit exactly one small record rejects a second, larger one without
/// disturbing what was already stored.
#[test]
fn store_over_the_limit_leaves_state_unchanged() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s4.ds");

    let header_len = bucket_storage::header::HEADER_LEN as u64;
    let maximal_length = header_len + record_len(10);

    let storage = open(&path, maximal_length);
    storage.store(&Blob::of_len(10, 1)).unwrap();
    assert_eq!(storage.size(), 1);
    assert_eq!(storage.fragmentation(), 0.0);

    let err = storage.store(&Blob::of_len(30, 2)).unwrap_err();
    assert!(matches!(err, StorageError::CapacityFull { .. }));
    assert_eq!(storage.size(), 1);

    // The rejected write must not have left a malformed record behind: the previously stored
    // payload still reads back, and a correctly-sized follow-up still succeeds.
    assert_eq!(storage.size(), 1);
    storage.flush(true).unwrap();
    storage.close().unwrap();
}

/// A record whose framed size lands exactly on the remaining capacity must still be accepted —
/// the boundary is "greater than remaining", not "greater than or equal to".
#[test]
fn store_exactly_at_the_boundary_succeeds() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("exact.ds");

    let header_len = bucket_storage::header::HEADER_LEN as u64;
    let maximal_length = header_len + record_len(10) + record_len(5);

    let storage = open(&path, maximal_length);
    let a = storage.store(&Blob::of_len(10, 1)).unwrap();
    let b = storage.store(&Blob::of_len(5, 2)).unwrap();
    assert_eq!(storage.size(), 2);

    assert_eq!(downcast_blob(storage.read(a).unwrap().as_ref()), &Blob::of_len(10, 1));
    assert_eq!(downcast_blob(storage.read(b).unwrap().as_ref()), &Blob::of_len(5, 2));

    // The segment is now completely full; even a one-byte payload must be rejected.
    let err = storage.store(&Blob::of_len(1, 3)).unwrap_err();
    assert!(matches!(err, StorageError::CapacityFull { .. }));
    assert_eq!(storage.size(), 2);
}

/// Repeated rejections at a full segment must each leave counters untouched — a `CapacityFull`
/// isn't "consumed" the first time it's hit.
#[test]
fn repeated_capacity_errors_are_stable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("repeat.ds");

    let header_len = bucket_storage::header::HEADER_LEN as u64;
    let maximal_length = header_len + record_len(4);

    let storage = open(&path, maximal_length);
    storage.store(&Blob::of_len(4, 9)).unwrap();

    for _ in 0..5 {
        let err = storage.store(&Blob::of_len(4, 9)).unwrap_err();
        assert!(matches!(err, StorageError::CapacityFull { .. }));
        assert_eq!(storage.size(), 1);
    }
}
