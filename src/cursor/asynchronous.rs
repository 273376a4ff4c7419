//! Cursor that submits reads/writes to a worker pool instead of blocking the caller's thread.
//!
//! Mirrors the `InputCursor`/`OutputCursor` contract synchronously (callers that don't need
//! async behavior can use it exactly like [`super::BufferedCursor`]), but additionally exposes
//! [`AsyncCursor::read_async`], which queues the read on the pool and invokes a callback from a
//! worker thread once it completes (or fails).

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use super::{InputCursor, OutputCursor};
use crate::error::{Result, StorageError};

/// Receives the outcome of a queued [`AsyncCursor::read_async`].
///
/// Exactly one of `completed`/`failed` is invoked, always with the cursor handed back so the
/// caller can return it to the input-cursor pool. Per spec.md §5, pending callbacks return their
/// cursor to the pool even on failure.
pub trait AsyncCallback: Send + 'static {
    fn completed(self: Box<Self>, cursor: AsyncCursor, data: Vec<u8>);
    fn failed(self: Box<Self>, cursor: AsyncCursor, err: StorageError);
}

impl<F> AsyncCallback for F
where
    F: FnOnce(Result<(AsyncCursor, Vec<u8>), (AsyncCursor, StorageError)>) + Send + 'static,
{
    fn completed(self: Box<Self>, cursor: AsyncCursor, data: Vec<u8>) {
        (self)(Ok((cursor, data)))
    }

    fn failed(self: Box<Self>, cursor: AsyncCursor, err: StorageError) {
        (self)(Err((cursor, err)))
    }
}

/// A cursor whose blocking I/O is delegated to a shared worker pool.
pub struct AsyncCursor {
    file: Arc<File>,
    pool: Arc<tokio::runtime::Runtime>,
    position: u64,
}

impl AsyncCursor {
    pub fn new(file: Arc<File>, pool: Arc<tokio::runtime::Runtime>, position: u64) -> Self {
        Self {
            file,
            pool,
            position,
        }
    }

    /// Queues a read of `len` bytes starting at the cursor's current position, returning
    /// immediately. `callback` runs on a worker-pool thread once the read completes or fails.
    pub fn read_async<C>(mut self, len: usize, callback: C)
    where
        C: AsyncCallback,
    {
        let callback: Box<dyn AsyncCallback> = Box::new(callback);
        let file = Arc::clone(&self.file);
        let position = self.position;
        self.position += len as u64;
        let cursor = self;

        cursor.pool.spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            match file.read_exact_at(&mut buf, position) {
                Ok(()) => callback.completed(cursor, buf),
                Err(e) => callback.failed(cursor, StorageError::from(e)),
            }
        });
    }
}

impl InputCursor for AsyncCursor {
    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.position = position;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, self.position)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl OutputCursor for AsyncCursor {
    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.position = position;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.file.write_at(buf, self.position)?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self, sync_physical: bool) -> Result<()> {
        if sync_physical {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn buffered_size(&self) -> usize {
        0
    }

    fn is_dirty(&self) -> bool {
        false
    }

    /// `AsyncCursor` is only ever used for single-address reads in this crate, never as a
    /// storage's mutation cursor, so it enforces no capacity limit of its own.
    fn remaining(&self) -> u64 {
        u64::MAX
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builds the worker-pool runtime backing every [`AsyncCursor`] opened against one storage.
///
/// `threads == 0` means "use the spec default" (128), per spec.md §6's `asyncThreads` key.
pub(crate) fn build_worker_pool(threads: u32) -> std::io::Result<tokio::runtime::Runtime> {
    let threads = if threads == 0 { 128 } else { threads as usize };
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name("bucket-storage-io")
        .enable_all()
        .build()
}
