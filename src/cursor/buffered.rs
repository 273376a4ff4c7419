//! Cursor backed by a fixed-size byte buffer fed by positional reads/writes against an open
//! file. This is the default cursor kind: unlike [`super::MappedOutputCursor`], it never needs
//! the file to be pre-sized, so it's used for every segment that isn't in shared one-file mode.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use bytes::BytesMut;

use super::{capacity_check, InputCursor, OutputCursor};
use crate::error::Result;

/// A [`BufferedCursor`] used for reading.
///
/// Positional reads (`pread`) are used rather than `seek` + `read` so that many input cursors
/// can share one [`File`] handle without racing on the kernel's per-fd seek offset.
pub struct BufferedInputCursor {
    file: Arc<File>,
    buf: BytesMut,
    /// File offset of `buf[0]`, or `position` if `buf` is empty.
    buf_start: u64,
    position: u64,
    buffer_size: usize,
}

impl BufferedInputCursor {
    pub fn new(file: Arc<File>, position: u64, buffer_size: usize) -> Self {
        Self {
            file,
            buf: BytesMut::new(),
            buf_start: position,
            position,
            buffer_size: buffer_size.max(1),
        }
    }

    fn refill(&mut self) -> Result<()> {
        let mut scratch = vec![0u8; self.buffer_size];
        let read = self.file.read_at(&mut scratch, self.position)?;
        scratch.truncate(read);
        self.buf = BytesMut::from(&scratch[..]);
        self.buf_start = self.position;
        Ok(())
    }
}

impl InputCursor for BufferedInputCursor {
    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.position = position;
        self.buf.clear();
        self.buf_start = position;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let avail_start = (self.position - self.buf_start) as usize;
            if avail_start >= self.buf.len() {
                self.refill()?;
                if self.buf.is_empty() {
                    return Err(crate::error::StorageError::corrupted(
                        "truncated payload: reached end of file before buffer was filled",
                    ));
                }
                continue;
            }
            let avail = &self.buf[avail_start..];
            let take = avail.len().min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&avail[..take]);
            filled += take;
            self.position += take as u64;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The single writer cursor: stages writes in `buf` and spills to the file once full or on
/// explicit flush.
pub struct BufferedCursor {
    file: Arc<File>,
    buf: BytesMut,
    /// File offset corresponding to the start of `buf` (i.e. where a flush will write to).
    flush_at: u64,
    position: u64,
    buffer_size: usize,
    limit: u64,
    dirty: bool,
}

impl BufferedCursor {
    pub fn new(file: Arc<File>, position: u64, buffer_size: usize, limit: u64) -> Self {
        Self {
            file,
            buf: BytesMut::with_capacity(buffer_size),
            flush_at: position,
            position,
            buffer_size: buffer_size.max(1),
            limit,
            dirty: false,
        }
    }
}

impl OutputCursor for BufferedCursor {
    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        // Re-positioning a dirty writer implies overwriting in place (used by `remove`'s
        // tombstone marker); flush first so the spill below always starts from a clean buffer.
        if self.dirty {
            self.flush(false)?;
        }
        self.position = position;
        self.flush_at = position;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        capacity_check(self.position, buf.len(), self.limit)?;
        if buf.len() >= self.buffer_size {
            // Larger than our staging buffer: flush what's pending, then write straight through.
            self.flush(false)?;
            self.file.write_at(buf, self.position)?;
            self.position += buf.len() as u64;
            self.flush_at = self.position;
            return Ok(buf.len());
        }
        if self.buf.len() + buf.len() > self.buffer_size {
            self.flush(false)?;
        }
        self.buf.extend_from_slice(buf);
        self.position += buf.len() as u64;
        self.dirty = true;
        Ok(buf.len())
    }

    fn flush(&mut self, sync_physical: bool) -> Result<()> {
        if !self.buf.is_empty() {
            self.file.write_at(&self.buf, self.flush_at)?;
            self.flush_at += self.buf.len() as u64;
            self.buf.clear();
        }
        if sync_physical {
            self.file.sync_data()?;
        }
        self.dirty = false;
        Ok(())
    }

    fn buffered_size(&self) -> usize {
        self.buf.len()
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    fn opened_file() -> Arc<File> {
        let file = tempfile().unwrap();
        file.set_len(4096).unwrap();
        Arc::new(file)
    }

    #[test]
    fn write_then_read_round_trips_across_a_refill() {
        let file = opened_file();
        let mut writer = BufferedCursor::new(Arc::clone(&file), 0, 8, 4096);
        let payload = b"hello, buffered world";
        writer.write(payload).unwrap();
        writer.flush(true).unwrap();

        let mut reader = BufferedInputCursor::new(file, 0, 8);
        let mut out = vec![0u8; payload.len()];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(&out, payload);
    }

    #[test]
    fn write_larger_than_buffer_bypasses_staging() {
        let file = opened_file();
        let mut writer = BufferedCursor::new(Arc::clone(&file), 0, 4, 4096);
        let payload = vec![7u8; 64];
        writer.write(&payload).unwrap();
        writer.flush(true).unwrap();

        let mut reader = BufferedInputCursor::new(file, 0, 16);
        let mut out = vec![0u8; payload.len()];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn write_past_limit_is_capacity_full() {
        let file = opened_file();
        let mut writer = BufferedCursor::new(file, 10, 8, 12);
        let err = writer.write(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, crate::error::StorageError::CapacityFull { .. }));
    }

    #[test]
    fn read_past_end_of_file_is_corrupted() {
        let file = opened_file();
        let mut reader = BufferedInputCursor::new(file, 4096, 8);
        let mut out = [0u8; 4];
        let err = reader.read_exact(&mut out).unwrap_err();
        assert!(matches!(err, crate::error::StorageError::Corrupted { .. }));
    }

    #[test]
    fn set_position_flushes_a_dirty_buffer_first() {
        let file = opened_file();
        let mut writer = BufferedCursor::new(Arc::clone(&file), 0, 64, 4096);
        writer.write(b"abcdefgh").unwrap();
        // Repositioning mid-buffer (as `remove`'s tombstone marker does) must not lose the
        // staged bytes.
        writer.set_position(0).unwrap();
        writer.write(b"XXXX").unwrap();
        writer.flush(true).unwrap();

        let mut reader = BufferedInputCursor::new(file, 0, 64);
        let mut out = [0u8; 8];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"XXXXefgh");
    }
}
