//! Buffered byte cursors: the common contract shared by the mapped, buffered-channel, and
//! asynchronous cursor implementations (spec.md §4.2).
//!
//! A cursor tracks a logical file position independent of any other cursor over the same
//! storage. Cursors are single-owner: once handed out by the storage (via [`crate::pool`] for
//! reads, or held directly for the one writer), no other caller may use the same cursor
//! concurrently.

mod asynchronous;
mod buffered;
mod mapped;

pub use asynchronous::{build_worker_pool, AsyncCallback, AsyncCursor};
pub use buffered::{BufferedCursor, BufferedInputCursor};
pub use mapped::{MappedInputCursor, MappedOutputCursor};

use crate::error::{Result, StorageError};

/// A cursor that can be read from at an explicit logical position.
pub trait InputCursor: Send {
    /// The current logical file position.
    fn position(&self) -> u64;

    /// Repositions the cursor. Does not itself perform I/O.
    fn set_position(&mut self, position: u64) -> Result<()>;

    /// Fills `buf` completely, advancing the position by `buf.len()`.
    ///
    /// Fails with [`StorageError::Corrupted`] if fewer bytes than requested remain before the
    /// end of the backing file. A short read here always means a truncated payload, never a
    /// clean end-of-log, because callers only ever request exactly the number of bytes a prior
    /// size prefix promised.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Releases any mapping or file handle held by this cursor.
    fn close(&mut self) -> Result<()>;
}

/// A cursor that can be written to at its current logical position.
pub trait OutputCursor: Send {
    /// The current logical file position.
    fn position(&self) -> u64;

    /// Repositions the cursor.
    fn set_position(&mut self, position: u64) -> Result<()>;

    /// Writes `buf` at the current position, advancing it by `buf.len()`.
    ///
    /// Returns the number of bytes written, which is always `buf.len()` on success; a short
    /// write never happens quietly here; any short write is reported as [`StorageError::IoError`].
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Pushes any buffered bytes out to the backing file.
    ///
    /// `sync_physical` additionally requests `fsync`/`msync` so the write is durable, not just
    /// visible to other readers of the same file.
    fn flush(&mut self, sync_physical: bool) -> Result<()>;

    /// Bytes currently staged in this cursor's buffer but not yet pushed to the backing file.
    fn buffered_size(&self) -> usize;

    /// Whether a write has occurred since the last [`OutputCursor::flush`].
    fn is_dirty(&self) -> bool;

    /// Bytes that can still be written at the current position before hitting this cursor's
    /// configured limit. `u64::MAX` for a cursor with no enforced limit.
    ///
    /// Used by [`crate::serializator::write_framed`] to validate an entire record (size prefix
    /// plus payload) fits before writing any of it. A record that fails only partway through
    /// would leave a committed size prefix with no payload behind it, which recovery could not
    /// tell apart from a genuine live record.
    fn remaining(&self) -> u64;

    /// Releases any mapping or file handle held by this cursor.
    fn close(&mut self) -> Result<()>;
}

/// The outcome of reading one record's size prefix.
///
/// Per spec.md §9 design notes, end-of-log is modeled as a return value rather than signaled by
/// raising an error, so that recovery and search loops can treat it as ordinary control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSize {
    /// A live record of this many payload bytes follows.
    Live(u32),
    /// A tombstoned record; this many payload bytes follow and must be skipped.
    Tombstone(u32),
    /// The terminator: no more records follow at this position.
    EndOfLog,
}

/// Reads and decodes the 4-byte signed size prefix at the cursor's current position.
///
/// This is the single place that interprets the `> 0` / `< 0` / `== 0` convention from
/// spec.md §3, so every caller (the serializator, recovery scan, and `Search`) agrees on it.
pub fn read_record_size(cursor: &mut dyn InputCursor) -> Result<RecordSize> {
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf)?;
    let raw = i32::from_be_bytes(buf);
    Ok(match raw.cmp(&0) {
        std::cmp::Ordering::Greater => RecordSize::Live(raw as u32),
        std::cmp::Ordering::Less => RecordSize::Tombstone(raw.unsigned_abs()),
        std::cmp::Ordering::Equal => RecordSize::EndOfLog,
    })
}

/// Writes a 4-byte signed size prefix.
///
/// `size` must fit in an `i32`; callers are responsible for rejecting records that would
/// overflow this before calling (see `StorageConfig::max_record_size`-equivalent checks in
/// `BlockStorage::store`).
pub fn write_record_size(cursor: &mut dyn OutputCursor, size: i32) -> Result<()> {
    cursor.write(&size.to_be_bytes())?;
    Ok(())
}

/// Marks a previously-written live record as a tombstone, in place.
///
/// Used by `remove`: positions `cursor` at the record's size prefix and overwrites it with its
/// negation, leaving the payload bytes untouched.
pub fn write_tombstone_marker(cursor: &mut dyn OutputCursor, addr: u64, size: u32) -> Result<()> {
    cursor.set_position(addr)?;
    write_record_size(cursor, -(size as i32))
}

pub(crate) fn capacity_check(position: u64, len: usize, limit: u64) -> Result<()> {
    let end = position
        .checked_add(len as u64)
        .ok_or_else(|| StorageError::corrupted("cursor position overflow"))?;
    if end > limit {
        return Err(StorageError::CapacityFull {
            requested: len as u64,
            max: limit,
        });
    }
    Ok(())
}
