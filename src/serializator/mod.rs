//! Converts objects to and from the length-prefixed binary form stored in a record log
//! (spec.md §4.1).
//!
//! Two flavors are provided, differing only in how a payload's class is tagged:
//!
//! - [`MultiClassSerializator`] writes a class tag ahead of every payload, resolved against a
//!   registry that can grow at runtime.
//! - [`CachingSerializator`] freezes its registry at construction time (from `cacheClasses`) and
//!   folds the ordered class list into its fingerprint, so two storages opened with a different
//!   class order are treated as incompatible rather than silently misreading each other's tags.

mod caching;
mod multi_class;
mod registry;

pub use caching::CachingSerializator;
pub use multi_class::MultiClassSerializator;
pub use registry::{ClassCodec, ClassRegistry};

use std::any::Any;
use std::fmt;

use crate::cursor::{read_record_size, write_record_size, InputCursor, OutputCursor, RecordSize};
use crate::error::{Result, StorageError};

/// An object that can be stored in a bucket.
///
/// Blanket-implemented for any `'static` type that is `Send + Sync + Debug`; the bound exists so
/// a registered [`ClassCodec`] can recover the concrete type via [`Any::downcast_ref`].
pub trait StoredObject: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<T> StoredObject for T
where
    T: Any + Send + Sync + fmt::Debug,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The result of a [`Serializator::read_one`] call: reads exactly one record at the cursor's
/// current position without transparently skipping past tombstones.
pub enum SingleRead {
    Live(Box<dyn StoredObject>),
    Tombstone,
    EndOfLog,
}

/// The result of a [`Serializator::read`] call.
///
/// Per spec.md §9 design notes, hitting the terminator is modeled as a distinct return value
/// rather than as an error, so recovery and search loops don't need to use error handling for
/// ordinary control flow.
pub enum ReadOutcome {
    Object(Box<dyn StoredObject>),
    EndOfLog,
}

/// Converts objects to/from the length-prefixed binary form used by [`crate::block_storage`].
pub trait Serializator: Send + Sync {
    /// Emits the object's size prefix followed by its encoded payload, returning the total bytes
    /// written (including the 4-byte prefix).
    fn write(&self, cursor: &mut dyn OutputCursor, obj: &dyn StoredObject) -> Result<u64>;

    /// Reads one object, transparently skipping over any number of tombstones first.
    ///
    /// Returns [`ReadOutcome::EndOfLog`] rather than an error if the terminator is reached
    /// before a live record is found.
    fn read(&self, cursor: &mut dyn InputCursor) -> Result<ReadOutcome>;

    /// Reads exactly the record at the cursor's current position, without skipping past a
    /// tombstone found there.
    ///
    /// Used by [`crate::block_storage::BlockStorage::read`] and `remove`, which address a
    /// specific record and must treat a tombstone found at that exact position as "no longer
    /// present" rather than transparently continuing on to the next live record.
    fn read_one(&self, cursor: &mut dyn InputCursor) -> Result<SingleRead>;

    /// Reads and advances past exactly one record, without decoding its payload.
    ///
    /// Returns the signed size that was read (`0` at the terminator). When `include_deleted` is
    /// `false`, tombstones are themselves skipped transparently until a live record or the
    /// terminator is reached (used by compaction to walk straight to the next live record);
    /// when `true`, a tombstone is reported to the caller instead of being skipped over (used by
    /// the recovery scan, which needs to count tombstones).
    fn skip(&self, cursor: &mut dyn InputCursor, include_deleted: bool) -> Result<i32>;

    /// A stable hash of this serializator's registered class table.
    ///
    /// Folded into the storage header so two incompatible class layouts fail at open time
    /// ([`StorageError::VersionMismatch`]) instead of silently misreading tags.
    fn fingerprint(&self) -> u32;
}

/// Shared `skip` implementation used by both serializator flavors: the class tag scheme only
/// affects `write`/decode, not how the size-prefix framing is walked.
pub(crate) fn skip_impl(cursor: &mut dyn InputCursor, include_deleted: bool) -> Result<i32> {
    loop {
        match read_record_size(cursor)? {
            RecordSize::EndOfLog => return Ok(0),
            RecordSize::Live(len) => {
                advance_payload(cursor, len)?;
                return Ok(len as i32);
            }
            RecordSize::Tombstone(len) => {
                advance_payload(cursor, len)?;
                if include_deleted {
                    return Ok(-(len as i32));
                }
                // transparent: keep walking to the next record.
            }
        }
    }
}

/// Shared `read` implementation: skip transparently past tombstones, then hand the live payload
/// to `decode`.
pub(crate) fn read_impl(
    cursor: &mut dyn InputCursor,
    decode: impl FnOnce(&mut dyn InputCursor, u32) -> Result<Box<dyn StoredObject>>,
) -> Result<ReadOutcome> {
    loop {
        match read_record_size(cursor)? {
            RecordSize::EndOfLog => return Ok(ReadOutcome::EndOfLog),
            RecordSize::Tombstone(len) => advance_payload(cursor, len)?,
            RecordSize::Live(len) => return Ok(ReadOutcome::Object(decode(cursor, len)?)),
        }
    }
}

/// Shared `read_one` implementation: no looping, a tombstone found at the current position is
/// reported as such rather than skipped.
pub(crate) fn read_one_impl(
    cursor: &mut dyn InputCursor,
    decode: impl FnOnce(&mut dyn InputCursor, u32) -> Result<Box<dyn StoredObject>>,
) -> Result<SingleRead> {
    match read_record_size(cursor)? {
        RecordSize::EndOfLog => Ok(SingleRead::EndOfLog),
        RecordSize::Tombstone(len) => {
            advance_payload(cursor, len)?;
            Ok(SingleRead::Tombstone)
        }
        RecordSize::Live(len) => Ok(SingleRead::Live(decode(cursor, len)?)),
    }
}

pub(crate) fn advance_payload(cursor: &mut dyn InputCursor, len: u32) -> Result<()> {
    let mut remaining = len as usize;
    let mut scratch = [0u8; 4096];
    while remaining > 0 {
        let take = remaining.min(scratch.len());
        cursor.read_exact(&mut scratch[..take])?;
        remaining -= take;
    }
    Ok(())
}

pub(crate) fn write_framed(
    cursor: &mut dyn OutputCursor,
    payload: &[u8],
) -> Result<u64> {
    if payload.len() > i32::MAX as usize {
        return Err(StorageError::corrupted("encoded payload exceeds i32::MAX"));
    }
    let total = 4 + payload.len() as u64;
    let remaining = cursor.remaining();
    if total > remaining {
        return Err(StorageError::CapacityFull {
            requested: total,
            max: cursor.position() + remaining,
        });
    }
    write_record_size(cursor, payload.len() as i32)?;
    cursor.write(payload)?;
    Ok(total)
}
