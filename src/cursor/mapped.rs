//! Cursor backed by a read/write memory mapping of `[start+header, start+max)`.
//!
//! Mapped cursors cannot grow the file they map (per spec.md §9 design notes), so they're only
//! used for pre-sized segments: shared one-file mode. Input cursors share one read-only
//! [`memmap2::Mmap`] (safe for any number of concurrent readers); the single output cursor owns
//! a writable [`memmap2::MmapMut`] and is only ever touched under the storage's mutex.

use std::sync::Arc;

use memmap2::{Mmap, MmapMut};

use super::{capacity_check, InputCursor, OutputCursor};
use crate::error::{Result, StorageError};

/// Read-only view into a mapped segment, shared by every cursor taken from the input pool.
pub struct MappedInputCursor {
    map: Arc<Mmap>,
    /// Offset of the mapping's first byte within the file (`start + header_size`).
    base: u64,
    limit: u64,
    position: u64,
}

impl MappedInputCursor {
    pub fn new(map: Arc<Mmap>, base: u64, limit: u64) -> Self {
        Self {
            map,
            base,
            limit,
            position: base,
        }
    }
}

impl InputCursor for MappedInputCursor {
    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        if position < self.base || position > self.limit {
            return Err(StorageError::InvalidAddress { address: position });
        }
        self.position = position;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let rel_start = (self.position - self.base) as usize;
        let rel_end = rel_start
            .checked_add(buf.len())
            .filter(|&end| end as u64 + self.base <= self.limit)
            .ok_or_else(|| StorageError::corrupted("truncated payload at end of mapping"))?;
        let bytes = self.map.as_ref();
        if rel_end > bytes.len() {
            return Err(StorageError::corrupted("truncated payload at end of mapping"));
        }
        buf.copy_from_slice(&bytes[rel_start..rel_end]);
        self.position += buf.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The single writable cursor over a mapped segment.
pub struct MappedOutputCursor {
    map: MmapMut,
    base: u64,
    limit: u64,
    position: u64,
    dirty: bool,
}

impl MappedOutputCursor {
    pub fn new(map: MmapMut, base: u64, limit: u64, position: u64) -> Self {
        Self {
            map,
            base,
            limit,
            position,
            dirty: false,
        }
    }
}

impl OutputCursor for MappedOutputCursor {
    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        if position < self.base || position > self.limit {
            return Err(StorageError::InvalidAddress { address: position });
        }
        self.position = position;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        capacity_check(self.position, buf.len(), self.limit)?;
        let rel_start = (self.position - self.base) as usize;
        let rel_end = rel_start + buf.len();
        self.map[rel_start..rel_end].copy_from_slice(buf);
        self.position += buf.len() as u64;
        self.dirty = true;
        Ok(buf.len())
    }

    fn flush(&mut self, sync_physical: bool) -> Result<()> {
        if sync_physical {
            self.map.flush()?;
        }
        self.dirty = false;
        Ok(())
    }

    fn buffered_size(&self) -> usize {
        0
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.position)
    }

    fn close(&mut self) -> Result<()> {
        self.flush(true)
    }
}
