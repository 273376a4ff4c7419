//! The append-only, self-describing block storage (spec.md §4.3): the centerpiece this crate is
//! built around.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;

use memmap2::{Mmap, MmapMut, MmapOptions};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

use crate::address::{Address, StorageEpoch};
use crate::config::{ResolvedLocation, StorageConfig, StorageConfigBuilder};
use crate::cursor::{
    build_worker_pool, read_record_size, write_record_size, write_tombstone_marker, AsyncCursor,
    BufferedCursor, BufferedInputCursor, InputCursor, MappedInputCursor, MappedOutputCursor,
    OutputCursor, RecordSize,
};
use crate::error::{Result, StorageError};
use crate::header::{self, Header, HEADER_LEN};
use crate::pool::{CursorPool, DEFAULT_POOL_SIZE};
use crate::search::Search;
use crate::serializator::{Serializator, SingleRead, StoredObject};

/// Which of the three cursor kinds (spec.md §4.2) a generation's reads and writes go through.
///
/// Per spec.md §9 design notes, a mapped cursor cannot safely extend the file it maps, so it is
/// restricted to segments that are already fully sized: in practice, any segment sharing a file
/// with another segment at a non-zero `startPosition`, since such a file must already be sized to
/// cover every segment in it. A segment with `startPosition == 0` is assumed to own the whole
/// file and uses the buffered cursor instead, which can grow the file underneath it.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Backend {
    Mapped,
    Buffered,
}

/// The file, cursor-construction state, and input-cursor pool current as of the storage's last
/// (re)open or compaction.
///
/// Held behind an `RwLock<Arc<_>>` so that compaction can swap in a new generation while cursors
/// and searches created against the previous one keep their own `Arc` clone and go on observing
/// the pre-compaction file, exactly as spec.md §4.3's compaction algorithm requires.
struct Generation {
    file: Arc<File>,
    backend: Backend,
    /// Populated iff `backend == Backend::Mapped`: the read-only mapping shared by every input
    /// cursor taken from `input_pool`.
    shared_map: Option<Arc<Mmap>>,
    input_pool: Arc<CursorPool<Box<dyn InputCursor>>>,
    base: u64,
    limit: u64,
    buffer_size: usize,
}

impl Generation {
    fn new_input_cursor(&self) -> Box<dyn InputCursor> {
        match self.backend {
            Backend::Mapped => Box::new(MappedInputCursor::new(
                Arc::clone(self.shared_map.as_ref().expect("mapped generation carries a shared map")),
                self.base,
                self.limit,
            )),
            Backend::Buffered => Box::new(BufferedInputCursor::new(Arc::clone(&self.file), self.base, self.buffer_size)),
        }
    }
}

struct MutationState {
    output: Box<dyn OutputCursor>,
    header: Header,
}

struct Inner {
    config: StorageConfig,
    path: PathBuf,
    start: u64,
    generation: RwLock<Arc<Generation>>,
    mutation: Mutex<MutationState>,
    epoch: Mutex<StorageEpoch>,
    worker_pool: Arc<tokio::runtime::Runtime>,
}

/// A live handle to one append-only object log.
///
/// Cheaply `Clone`: every clone shares the same underlying file, cursor pool, and mutex, mirroring
/// how the teacher's buffer handles are passed around as cheap, shared references rather than
/// copied wholesale.
#[derive(Clone)]
pub struct BlockStorage {
    inner: Arc<Inner>,
}

impl BlockStorage {
    /// Opens (creating if necessary) a storage segment as described by `builder`.
    ///
    /// If `builder` carries a [`crate::config::SharedHandle`] (spec.md §6's
    /// `oneStorage`/`storage` key) and a handle already exists there, that handle is returned
    /// with its reference count incremented instead of opening a new segment.
    #[instrument(skip(builder))]
    pub fn open(builder: StorageConfigBuilder) -> Result<BlockStorage> {
        let one_storage = builder.peek_one_storage();
        if let Some(handle) = one_storage {
            let shared = handle.get_or_insert_with(|| Ok(Arc::new(Self::open_fresh(builder)?)))?;
            return Ok(BlockStorage { inner: Arc::clone(&shared.inner) });
        }
        Self::open_fresh(builder)
    }

    fn open_fresh(builder: StorageConfigBuilder) -> Result<BlockStorage> {
        let config = builder.build().map_err(|e| StorageError::corrupted(e.to_string()))?;
        let path = match &config.location {
            ResolvedLocation::Path(p) => p.clone(),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let start = config.start_position;
        let end = start + config.maximal_length;
        let backend = if start == 0 { Backend::Buffered } else { Backend::Mapped };

        let mut open_opts = OpenOptions::new();
        open_opts.read(true);
        if config.read_only {
            open_opts.write(false);
        } else {
            open_opts.write(true).create(true);
        }
        let file = open_opts.open(&path)?;

        let current_len = file.metadata()?.len();
        if current_len < end {
            if config.read_only {
                return Err(StorageError::corrupted(
                    "segment extends past end of file and storage is read-only",
                ));
            }
            file.set_len(end)?;
        }

        let fingerprint = config.serializator.fingerprint();
        let existing = header::read_header(&file, start)?;
        let fresh_file = existing.as_ref().map_or(true, |h| h.magic_version == 0 && h.segment_length == 0);

        let mut header = if fresh_file {
            let h = Header::fresh(config.maximal_length, fingerprint);
            if !config.read_only {
                header::write_header_two_phase(&file, start, &h)?;
            }
            h
        } else {
            let h = existing.unwrap();
            header::validate_header(&h, config.maximal_length, fingerprint)?;
            h
        };

        if !header.is_closed() {
            warn!(path = %path.display(), "segment was not closed cleanly, replaying log to recover counters");
            header = recover(&file, start, config.maximal_length, backend, config.buffer_size as usize, &*config.serializator)?;
            if !config.read_only {
                header::write_header_two_phase(&file, start, &header)?;
            }
        }

        let base = start + HEADER_LEN as u64;
        let file = Arc::new(file);
        let generation = Arc::new(build_generation(Arc::clone(&file), base, end, backend, config.buffer_size as usize)?);

        let output: Box<dyn OutputCursor> = if config.read_only {
            // Read-only storages never mutate; a dummy cursor satisfies the mutation slot
            // without ever being written to.
            match backend {
                Backend::Mapped => {
                    let dummy = MmapMut::map_anon(1)?;
                    Box::new(MappedOutputCursor::new(dummy, 0, 0, 0))
                }
                Backend::Buffered => Box::new(BufferedCursor::new(Arc::clone(&file), base, 1, base)),
            }
        } else {
            match backend {
                Backend::Mapped => {
                    let map_mut = unsafe { MmapOptions::new().offset(base).len((end - base) as usize).map_mut(&*file)? };
                    Box::new(MappedOutputCursor::new(map_mut, base, end, base + header.occupation))
                }
                Backend::Buffered => Box::new(BufferedCursor::new(
                    Arc::clone(&file),
                    base + header.occupation,
                    config.buffer_size as usize,
                    end,
                )),
            }
        };

        let worker_pool = Arc::new(build_worker_pool(config.async_threads)?);

        let inner = Arc::new(Inner {
            epoch: Mutex::new(StorageEpoch::for_segment(&path, start)),
            start,
            generation: RwLock::new(generation),
            mutation: Mutex::new(MutationState { output, header }),
            worker_pool,
            path,
            config,
        });
        let storage = BlockStorage { inner };

        if storage.inner.start == 0 && !storage.inner.config.read_only {
            let ratio = storage.fragmentation();
            if ratio > storage.inner.config.compaction_ratio {
                debug!(ratio, "fragmentation above threshold, compacting on open");
                storage.compact()?;
            }
        }

        Ok(storage)
    }

    fn epoch(&self) -> StorageEpoch {
        *self.inner.epoch.lock()
    }

    /// Flushes the output cursor's staged-but-unwritten bytes to the backing file, if any, so a
    /// subsequent `read` or `read_many`/`read_async` dispatch never observes stale data.
    ///
    /// Spec.md §5: "a `store` that has completed happens-before any subsequent `read`... the
    /// storage flushes the output cursor before handing out an input cursor whose position could
    /// observe stale buffered bytes." The buffered-cursor backend stages writes in a private
    /// in-memory buffer (see [`crate::cursor::BufferedCursor`]) that a separate input cursor's
    /// positional file read cannot see until it's spilled; the mapped backend has no such gap,
    /// since writes land directly in shared-mapped pages every reader's mapping also covers, but
    /// flushing an already-clean mapped cursor here is a no-op, so this is safe to call
    /// unconditionally for either backend.
    fn flush_output_for_reads(&self) -> Result<()> {
        let mut mutation = self.inner.mutation.lock();
        if mutation.output.is_dirty() {
            mutation.output.flush(false)?;
        }
        Ok(())
    }

    /// Appends `obj`, returning the address it can later be read back from.
    pub fn store(&self, obj: &dyn StoredObject) -> Result<Address> {
        if self.inner.config.read_only {
            return Err(StorageError::ReadOnly);
        }
        let mut mutation = self.inner.mutation.lock();
        if mutation.header.is_closed() {
            header::clear_closed_marker(&self.inner.generation.read().file, self.inner.start, mutation.header.flags)?;
            mutation.header.flags &= !0b11;
        }

        let record_offset = mutation.output.position();
        let written = self.inner.config.serializator.write(&mut *mutation.output, obj)?;
        mutation.header.occupation += written;
        mutation.header.live_count += 1;
        Ok(Address::new(record_offset, self.epoch()))
    }

    /// Reads the object at `addr`.
    pub fn read(&self, addr: Address) -> Result<Box<dyn StoredObject>> {
        if !addr.belongs_to(self.epoch()) {
            return Err(StorageError::InvalidAddress { address: addr.offset() });
        }
        self.flush_output_for_reads()?;
        let generation = self.inner.generation.read().clone();
        let mut cursor = generation.input_pool.checkout();
        cursor.set_position(addr.offset())?;
        match self.inner.config.serializator.read_one(&mut **cursor)? {
            SingleRead::Live(obj) => Ok(obj),
            SingleRead::Tombstone | SingleRead::EndOfLog => {
                Err(StorageError::InvalidAddress { address: addr.offset() })
            }
        }
    }

    /// Reads several addresses concurrently on the storage's worker pool.
    ///
    /// Returns a lazy, **unordered** iterator (spec.md §4.3): each address is dispatched to a
    /// worker as soon as this call is made, results are pushed onto a bounded queue as they
    /// complete, and the iterator blocks in `next()` until either an item is available, every
    /// address has been accounted for, or an error has been captured. Once an error is yielded,
    /// the iterator stops rather than risk surfacing results for addresses it never dispatched
    /// feedback for.
    pub fn read_many(&self, addrs: &[Address]) -> ReadManyIter {
        let total = addrs.len();
        let bound = total.clamp(1, DEFAULT_POOL_SIZE);
        let (tx, rx) = sync_channel(bound);

        if let Err(e) = self.flush_output_for_reads() {
            let _ = tx.send(Err(e));
            drop(tx);
            return ReadManyIter { rx, remaining: 1, stopped: false };
        }

        for &addr in addrs {
            if !addr.belongs_to(self.epoch()) {
                let _ = tx.send(Err(StorageError::InvalidAddress { address: addr.offset() }));
                continue;
            }
            let generation = self.inner.generation.read().clone();
            let serializator = Arc::clone(&self.inner.config.serializator);
            let file = Arc::clone(&generation.file);
            let pool_handle = Arc::clone(&self.inner.worker_pool);
            let tx = tx.clone();
            self.inner.worker_pool.spawn_blocking(move || {
                let mut cursor = AsyncCursor::new(file, pool_handle, addr.offset());
                let result = match serializator.read_one(&mut cursor) {
                    Ok(SingleRead::Live(obj)) => Ok(obj),
                    Ok(SingleRead::Tombstone) | Ok(SingleRead::EndOfLog) => {
                        Err(StorageError::InvalidAddress { address: addr.offset() })
                    }
                    Err(e) => Err(e),
                };
                let _ = tx.send(result);
            });
        }
        drop(tx);

        ReadManyIter { rx, remaining: total, stopped: false }
    }

    /// Queues an asynchronous read of `addr` on the storage's worker pool.
    pub fn read_async<C: AsyncReadCallback>(&self, addr: Address, callback: C) -> Result<()> {
        if !addr.belongs_to(self.epoch()) {
            return Err(StorageError::InvalidAddress { address: addr.offset() });
        }
        self.flush_output_for_reads()?;
        let generation = self.inner.generation.read().clone();
        let serializator = Arc::clone(&self.inner.config.serializator);
        let offset = addr.offset();
        let file = Arc::clone(&generation.file);
        let pool_handle = Arc::clone(&self.inner.worker_pool);
        let callback: Box<dyn AsyncReadCallback> = Box::new(callback);
        self.inner.worker_pool.spawn_blocking(move || {
            let mut cursor = AsyncCursor::new(file, pool_handle, offset);
            let outcome = serializator.read_one(&mut cursor);
            match outcome {
                Ok(SingleRead::Live(obj)) => callback.completed(obj),
                Ok(SingleRead::Tombstone) | Ok(SingleRead::EndOfLog) => {
                    callback.failed(StorageError::InvalidAddress { address: offset })
                }
                Err(e) => callback.failed(e),
            }
        });
        Ok(())
    }

    /// Tombstones the record at `addr`. Removing an address that is already tombstoned is an
    /// idempotent no-op, not an error. Avoids requiring callers to pre-check existence for the
    /// common "remove if present" pattern.
    pub fn remove(&self, addr: Address) -> Result<()> {
        if self.inner.config.read_only {
            return Err(StorageError::ReadOnly);
        }
        if !addr.belongs_to(self.epoch()) {
            return Err(StorageError::InvalidAddress { address: addr.offset() });
        }
        let mut mutation = self.inner.mutation.lock();
        if mutation.header.is_closed() {
            header::clear_closed_marker(&self.inner.generation.read().file, self.inner.start, mutation.header.flags)?;
            mutation.header.flags &= !0b11;
        }

        // `mutation` is already held, so this can't go through `flush_output_for_reads` (it
        // re-locks the same non-reentrant mutex); flush the staged bytes inline instead, so a
        // record that was just `store`d but not yet spilled to the file is visible to the peek
        // read below.
        if mutation.output.is_dirty() {
            mutation.output.flush(false)?;
        }

        let generation = self.inner.generation.read().clone();
        let mut peek = generation.input_pool.checkout();
        peek.set_position(addr.offset())?;
        let size = match read_record_size(&mut **peek)? {
            RecordSize::EndOfLog => return Err(StorageError::InvalidAddress { address: addr.offset() }),
            RecordSize::Tombstone(_) => return Ok(()),
            RecordSize::Live(len) => len,
        };
        drop(peek);

        let tail = mutation.output.position();
        write_tombstone_marker(&mut *mutation.output, addr.offset(), size)?;
        mutation.output.set_position(tail)?;

        mutation.header.live_count -= 1;
        mutation.header.tombstone_count += 1;
        Ok(())
    }

    /// Opens a forward [`Search`] cursor over this storage's records.
    pub fn search(&self) -> Result<Search> {
        self.flush_output_for_reads()?;
        let generation = self.inner.generation.read().clone();
        Ok(Search::new(
            generation.new_input_cursor(),
            Arc::clone(&self.inner.config.serializator),
            self.clone(),
            self.epoch(),
        ))
    }

    /// Flushes the output cursor and, if `sync_physical`, persists the header counters.
    pub fn flush(&self, sync_physical: bool) -> Result<()> {
        let mut mutation = self.inner.mutation.lock();
        mutation.output.flush(sync_physical)?;
        if sync_physical {
            let generation = self.inner.generation.read();
            let mut on_disk = mutation.header;
            on_disk.flags &= !0b11; // still open; only `close` marks clean
            header::write_header_two_phase(&generation.file, self.inner.start, &on_disk)?;
        }
        Ok(())
    }

    /// The number of live (non-tombstoned) records.
    pub fn size(&self) -> u32 {
        self.inner.mutation.lock().header.live_count
    }

    /// `tombstones / (live + tombstones)`, or `0.0` if there are no live records.
    ///
    /// An all-tombstoned log (`live_count == 0`) reports `0.0` rather than `1.0`: spec.md §8's
    /// invariant 4 requires `fragmentation() ∈ [0, 1)`, and `MemoryStorage` (the reference oracle
    /// for this contract) already collapses trailing tombstones once nothing live is left behind
    /// them, reporting `0.0` in the same situation. Nothing to compact away from "no live records"
    /// should still read as maximally fragmented.
    pub fn fragmentation(&self) -> f64 {
        let header = self.inner.mutation.lock().header;
        if header.live_count == 0 {
            return 0.0;
        }
        let total = header.live_count + header.tombstone_count;
        header.tombstone_count as f64 / total as f64
    }

    /// Flushes, fsyncs, and marks the on-disk header clean.
    pub fn close(&self) -> Result<()> {
        let mut mutation = self.inner.mutation.lock();
        mutation.output.flush(true)?;
        mutation.header.flags |= 0b11;
        let generation = self.inner.generation.read();
        header::write_header_two_phase(&generation.file, self.inner.start, &mutation.header)?;
        Ok(())
    }

    /// Closes the storage and removes its backing file. Refused for a segment that shares a
    /// file with other storages at a non-zero start position, since removing the file would
    /// destroy their data too.
    pub fn destroy(self) -> Result<()> {
        if self.inner.start != 0 {
            return Err(StorageError::corrupted(
                "cannot destroy a storage that shares its file with another segment",
            ));
        }
        self.close()?;
        std::fs::remove_file(&self.inner.path)?;
        StorageEpoch::forget(&self.inner.path, self.inner.start);
        Ok(())
    }

    /// Rewrites the file to eliminate tombstones (spec.md §4.3's compaction algorithm).
    ///
    /// Refused outright (not silently skipped) when this storage occupies a non-zero offset
    /// within a file shared with other segments, since compaction would shift byte offsets those
    /// other segments' headers assume are stable. Because a non-zero-offset segment is always
    /// backed by the mapped cursor (see [`Backend`]), every storage this function actually runs
    /// against uses the buffered backend, so the scan below only has to stream through one kind
    /// of input/output cursor.
    #[instrument(skip(self))]
    pub fn compact(&self) -> Result<()> {
        if self.inner.start != 0 {
            return Err(StorageError::corrupted(
                "compaction is disabled for a storage sharing a non-zero offset within a file",
            ));
        }
        if self.inner.config.read_only {
            return Err(StorageError::ReadOnly);
        }

        let mut mutation = self.inner.mutation.lock();
        mutation.output.flush(true)?;

        let sibling_path = compact_sibling_path(&self.inner.path);
        let sibling_file = Arc::new(
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&sibling_path)?,
        );
        let maximal_length = self.inner.config.maximal_length;
        sibling_file.set_len(maximal_length)?;

        let base = HEADER_LEN as u64;
        let end = maximal_length;
        let buffer_size = self.inner.config.buffer_size as usize;

        let generation = self.inner.generation.read().clone();
        let serializator = &self.inner.config.serializator;
        let mut scan_cursor = generation.new_input_cursor();
        scan_cursor.set_position(generation.base)?;
        let mut sibling_out = BufferedCursor::new(Arc::clone(&sibling_file), base, buffer_size, end);

        let mut live_count = 0u32;
        let mut transfer = vec![0u8; buffer_size.max(4096)];
        loop {
            match read_record_size(&mut *scan_cursor)? {
                RecordSize::EndOfLog => break,
                RecordSize::Tombstone(len) => {
                    crate::serializator::advance_payload(&mut *scan_cursor, len)?;
                }
                RecordSize::Live(len) => {
                    write_record_size(&mut sibling_out, len as i32)?;
                    stream_payload(&mut *scan_cursor, &mut sibling_out, len, &mut transfer)?;
                    live_count += 1;
                }
            }
        }
        sibling_out.flush(true)?;
        let write_pos = sibling_out.position() - base;

        let new_header = Header {
            magic_version: header::MAGIC_VERSION,
            segment_length: maximal_length,
            fingerprint: serializator.fingerprint(),
            flags: header::CLOSED_MARKER,
            occupation: write_pos,
            live_count,
            tombstone_count: 0,
        };
        header::write_header_two_phase(&sibling_file, 0, &new_header)?;
        drop(sibling_file);

        std::fs::rename(&sibling_path, &self.inner.path)?;

        let file = Arc::new(OpenOptions::new().read(true).write(true).open(&self.inner.path)?);
        let new_generation = Arc::new(build_generation(Arc::clone(&file), base, end, Backend::Buffered, buffer_size)?);
        mutation.output = Box::new(BufferedCursor::new(Arc::clone(&file), base + write_pos, buffer_size, end));
        mutation.header = new_header;

        *self.inner.generation.write() = new_generation;
        *self.inner.epoch.lock() = StorageEpoch::bump(&self.inner.path, self.inner.start);

        Ok(())
    }
}

fn stream_payload(
    src: &mut dyn InputCursor,
    dst: &mut dyn OutputCursor,
    len: u32,
    transfer: &mut [u8],
) -> Result<()> {
    let mut remaining = len as usize;
    while remaining > 0 {
        let take = remaining.min(transfer.len());
        src.read_exact(&mut transfer[..take])?;
        dst.write(&transfer[..take])?;
        remaining -= take;
    }
    Ok(())
}

/// Receives the outcome of a single slot in [`BlockStorage::read_many`]'s result queue.
pub struct ReadManyIter {
    rx: Receiver<Result<Box<dyn StoredObject>>>,
    remaining: usize,
    stopped: bool,
}

impl Iterator for ReadManyIter {
    type Item = Result<Box<dyn StoredObject>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped || self.remaining == 0 {
            return None;
        }
        match self.rx.recv() {
            Ok(item) => {
                self.remaining -= 1;
                if item.is_err() {
                    self.stopped = true;
                }
                Some(item)
            }
            Err(_) => None,
        }
    }
}

/// Receives the outcome of [`BlockStorage::read_async`].
pub trait AsyncReadCallback: Send + 'static {
    fn completed(self: Box<Self>, obj: Box<dyn StoredObject>);
    fn failed(self: Box<Self>, err: StorageError);
}

impl<F> AsyncReadCallback for F
where
    F: FnOnce(Result<Box<dyn StoredObject>>) + Send + 'static,
{
    fn completed(self: Box<Self>, obj: Box<dyn StoredObject>) {
        (self)(Ok(obj))
    }

    fn failed(self: Box<Self>, err: StorageError) {
        (self)(Err(err))
    }
}

fn compact_sibling_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".compact");
    PathBuf::from(name)
}

fn build_generation(file: Arc<File>, base: u64, limit: u64, backend: Backend, buffer_size: usize) -> Result<Generation> {
    let shared_map = match backend {
        Backend::Mapped => {
            let map = unsafe { MmapOptions::new().offset(base).len((limit - base) as usize).map(&*file)? };
            Some(Arc::new(map))
        }
        Backend::Buffered => None,
    };
    let pool_file = Arc::clone(&file);
    let pool_map = shared_map.clone();
    let input_pool = Arc::new(CursorPool::new(DEFAULT_POOL_SIZE, move || -> Box<dyn InputCursor> {
        match backend {
            Backend::Mapped => Box::new(MappedInputCursor::new(
                Arc::clone(pool_map.as_ref().expect("mapped generation carries a shared map")),
                base,
                limit,
            )),
            Backend::Buffered => Box::new(BufferedInputCursor::new(Arc::clone(&pool_file), base, buffer_size)),
        }
    }));
    Ok(Generation { file, backend, shared_map, input_pool, base, limit, buffer_size })
}

/// Replays the record log from `start`'s header onward, recomputing occupation/live/tombstone
/// counts (spec.md §4.3's recovery algorithm, run whenever a segment is found not cleanly
/// closed).
fn recover(
    file: &File,
    start: u64,
    segment_length: u64,
    backend: Backend,
    buffer_size: usize,
    serializator: &dyn Serializator,
) -> Result<Header> {
    let base = start + HEADER_LEN as u64;
    let limit = start + segment_length;

    let mut cursor: Box<dyn InputCursor> = match backend {
        Backend::Mapped => {
            let map = unsafe { MmapOptions::new().offset(base).len((limit - base) as usize).map(file)? };
            Box::new(MappedInputCursor::new(Arc::new(map), base, limit))
        }
        Backend::Buffered => {
            // `recover` doesn't have an `Arc<File>` handy (it runs before the storage's
            // generation exists), so it opens its own handle onto the same underlying file.
            let cloned = file.try_clone()?;
            Box::new(BufferedInputCursor::new(Arc::new(cloned), base, buffer_size))
        }
    };

    let mut live_count = 0u32;
    let mut tombstone_count = 0u32;
    let mut occupation = 0u64;

    loop {
        match read_record_size(&mut *cursor) {
            Ok(RecordSize::EndOfLog) => break,
            Ok(RecordSize::Live(len)) => {
                if crate::serializator::advance_payload(&mut *cursor, len).is_err() {
                    break; // truncated payload: treat everything from here as not-yet-committed
                }
                live_count += 1;
                occupation = cursor.position() - base;
            }
            Ok(RecordSize::Tombstone(len)) => {
                if crate::serializator::advance_payload(&mut *cursor, len).is_err() {
                    break;
                }
                tombstone_count += 1;
                occupation = cursor.position() - base;
            }
            Err(_) => break,
        }
    }

    Ok(Header {
        magic_version: header::MAGIC_VERSION,
        segment_length,
        fingerprint: serializator.fingerprint(),
        flags: header::CLOSED_MARKER,
        occupation,
        live_count,
        tombstone_count,
    })
}
