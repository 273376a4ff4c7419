//! Configuration for opening a [`crate::block_storage::BlockStorage`] (spec.md §6).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{BuildError, Result};
use crate::serializator::{CachingSerializator, ClassRegistry, Serializator};

pub const DEFAULT_BUFFER_SIZE: u32 = 16 * 1024;
pub const DEFAULT_ASYNC_THREADS: u32 = 128;
pub const DEFAULT_COMPACTION_RATIO: f64 = 0.5;

static TEMP_NAME_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Where the storage's segment lives on disk: an exact path, or a directory in which a unique
/// temporary file name is minted.
#[derive(Debug, Clone)]
enum FileLocation {
    Path(PathBuf),
    TempIn(PathBuf),
}

/// A previously constructed storage handle, returned in place of opening a new one when
/// `one_storage` is set (spec.md §6's `oneStorage`/`storage` key).
///
/// Modeled as an `Arc`-backed slot rather than a boolean-plus-mutable-field, since idiomatic Rust
/// expresses "hand back the existing handle, refcounted" as cloning an `Arc` rather than mutating
/// a shared configuration object in place.
#[derive(Clone, Default)]
pub struct SharedHandle<T>(Arc<parking_lot::Mutex<Option<Arc<T>>>>);

impl<T> SharedHandle<T> {
    pub fn new() -> Self {
        Self(Arc::new(parking_lot::Mutex::new(None)))
    }

    pub fn get_or_insert_with(&self, make: impl FnOnce() -> Result<Arc<T>>) -> Result<Arc<T>> {
        let mut slot = self.0.lock();
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let created = make()?;
        *slot = Some(Arc::clone(&created));
        Ok(created)
    }
}

/// Fully resolved, validated configuration for opening a storage segment.
///
/// `Clone` is cheap: every field is either `Copy` or an `Arc` handle, so cloning a `StorageConfig`
/// never duplicates the serializator or a shared storage handle. `Debug` is implemented by hand
/// rather than derived, since `serializator` and `one_storage` hold trait objects that don't
/// themselves implement `Debug`.
#[derive(Clone)]
pub struct StorageConfig {
    pub(crate) location: ResolvedLocation,
    pub(crate) buffer_size: u32,
    pub(crate) direct_buffer: bool,
    pub(crate) async_threads: u32,
    pub(crate) read_only: bool,
    pub(crate) start_position: u64,
    pub(crate) maximal_length: u64,
    pub(crate) compaction_ratio: f64,
    pub(crate) serializator: Arc<dyn Serializator>,
    pub(crate) one_storage: Option<SharedHandle<crate::block_storage::BlockStorage>>,
}

#[derive(Debug, Clone)]
pub(crate) enum ResolvedLocation {
    Path(PathBuf),
}

impl ResolvedLocation {
    pub(crate) fn path(&self) -> &Path {
        match self {
            ResolvedLocation::Path(p) => p,
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("location", &self.location)
            .field("buffer_size", &self.buffer_size)
            .field("direct_buffer", &self.direct_buffer)
            .field("async_threads", &self.async_threads)
            .field("read_only", &self.read_only)
            .field("start_position", &self.start_position)
            .field("maximal_length", &self.maximal_length)
            .field("compaction_ratio", &self.compaction_ratio)
            .field("serializator_fingerprint", &self.serializator.fingerprint())
            .field("one_storage_set", &self.one_storage.is_some())
            .finish()
    }
}

/// Builds a [`StorageConfig`], mirroring the configuration table in spec.md §6 one method per
/// key.
pub struct StorageConfigBuilder {
    location: Option<FileLocation>,
    buffer_size: u32,
    direct_buffer: bool,
    async_threads: u32,
    read_only: bool,
    start_position: u64,
    maximal_length: Option<u64>,
    compaction_ratio: f64,
    class_registry: Option<ClassRegistry>,
    serializator: Option<Arc<dyn Serializator>>,
    one_storage: Option<SharedHandle<crate::block_storage::BlockStorage>>,
}

impl Default for StorageConfigBuilder {
    fn default() -> Self {
        Self {
            location: None,
            buffer_size: 0,
            direct_buffer: false,
            async_threads: 0,
            read_only: false,
            start_position: 0,
            maximal_length: None,
            compaction_ratio: DEFAULT_COMPACTION_RATIO,
            class_registry: None,
            serializator: None,
            one_storage: None,
        }
    }
}

impl StorageConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens (or creates) an exact file path.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = Some(FileLocation::Path(path.into()));
        self
    }

    /// Creates a uniquely-named segment (`disk_storage_<n>.ds`) under `dir`.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.location = Some(FileLocation::TempIn(dir.into()));
        self
    }

    /// Size of the I/O staging buffer used by the buffered cursor. `0` selects the default
    /// (16 KiB).
    pub fn buffer_size(mut self, size: u32) -> Self {
        self.buffer_size = size;
        self
    }

    /// Whether the buffered cursor should prefer an off-heap (direct) buffer. Rust has no
    /// equivalent of a JVM direct `ByteBuffer`; this is retained as a no-op configuration flag so
    /// callers porting configuration from the original system don't need to drop the key.
    pub fn direct_buffer(mut self, direct: bool) -> Self {
        self.direct_buffer = direct;
        self
    }

    /// Worker-pool size for the asynchronous cursor. `0` selects the default (128).
    pub fn async_threads(mut self, threads: u32) -> Self {
        self.async_threads = threads;
        self
    }

    /// Rejects `store`/`remove` if set; recovery still runs but only updates in-memory counters.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// The first byte of this storage's segment within its file.
    pub fn start_position(mut self, start: u64) -> Self {
        self.start_position = start;
        self
    }

    /// The segment's capacity bound, including the header.
    pub fn maximal_length(mut self, len: u64) -> Self {
        self.maximal_length = Some(len);
        self
    }

    /// Tombstone-to-live ratio above which compaction runs automatically on open. Defaults to
    /// `0.5`.
    pub fn compaction_ratio(mut self, ratio: f64) -> Self {
        self.compaction_ratio = ratio;
        self
    }

    /// Enables the caching serializator over a fixed, pre-registered class set.
    pub fn cache_classes(mut self, registry: ClassRegistry) -> Self {
        self.class_registry = Some(registry);
        self
    }

    /// An explicit serializator handle, overriding `cache_classes`.
    pub fn serializator(mut self, serializator: Arc<dyn Serializator>) -> Self {
        self.serializator = Some(serializator);
        self
    }

    /// When set, `build` on a matching configuration returns the existing handle (refcounted)
    /// instead of describing a fresh open.
    pub fn one_storage(mut self, handle: SharedHandle<crate::block_storage::BlockStorage>) -> Self {
        self.one_storage = Some(handle);
        self
    }

    pub(crate) fn peek_one_storage(&self) -> Option<SharedHandle<crate::block_storage::BlockStorage>> {
        self.one_storage.clone()
    }

    pub fn build(self) -> std::result::Result<StorageConfig, BuildError> {
        let location = match self.location {
            Some(FileLocation::Path(path)) => ResolvedLocation::Path(path),
            Some(FileLocation::TempIn(dir)) => {
                let n = TEMP_NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
                ResolvedLocation::Path(dir.join(format!("disk_storage_{n:04}.ds")))
            }
            None => {
                return Err(BuildError::InvalidParameter {
                    param_name: "file",
                    reason: "either `file` or `dir` must be set".to_string(),
                })
            }
        };

        let maximal_length = self.maximal_length.ok_or_else(|| BuildError::InvalidParameter {
            param_name: "maximal_length",
            reason: "a segment capacity must be configured".to_string(),
        })?;
        if maximal_length <= crate::header::HEADER_LEN as u64 {
            return Err(BuildError::InvalidParameter {
                param_name: "maximal_length",
                reason: format!(
                    "must exceed the header size ({} bytes)",
                    crate::header::HEADER_LEN
                ),
            });
        }
        if !(0.0..1.0).contains(&self.compaction_ratio) {
            return Err(BuildError::InvalidParameter {
                param_name: "compaction_ratio",
                reason: "must be within [0.0, 1.0)".to_string(),
            });
        }

        let serializator: Arc<dyn Serializator> = if let Some(serializator) = self.serializator {
            serializator
        } else {
            let registry = self.class_registry.unwrap_or_default();
            Arc::new(CachingSerializator::new(registry))
        };

        let buffer_size = if self.buffer_size == 0 { DEFAULT_BUFFER_SIZE } else { self.buffer_size };
        let async_threads = if self.async_threads == 0 { DEFAULT_ASYNC_THREADS } else { self.async_threads };

        Ok(StorageConfig {
            location,
            buffer_size,
            direct_buffer: self.direct_buffer,
            async_threads,
            read_only: self.read_only,
            start_position: self.start_position,
            maximal_length,
            compaction_ratio: self.compaction_ratio,
            serializator,
            one_storage: self.one_storage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_without_a_location_is_rejected() {
        let err = StorageConfigBuilder::new().maximal_length(4096).build().unwrap_err();
        assert!(matches!(err, BuildError::InvalidParameter { param_name: "file", .. }));
    }

    #[test]
    fn build_without_a_maximal_length_is_rejected() {
        let err = StorageConfigBuilder::new().file("/tmp/does-not-matter.ds").build().unwrap_err();
        assert!(matches!(err, BuildError::InvalidParameter { param_name: "maximal_length", .. }));
    }

    #[test]
    fn maximal_length_must_exceed_the_header() {
        let err = StorageConfigBuilder::new()
            .file("/tmp/does-not-matter.ds")
            .maximal_length(4)
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidParameter { param_name: "maximal_length", .. }));
    }

    #[test]
    fn compaction_ratio_out_of_range_is_rejected() {
        let err = StorageConfigBuilder::new()
            .file("/tmp/does-not-matter.ds")
            .maximal_length(4096)
            .compaction_ratio(1.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidParameter { param_name: "compaction_ratio", .. }));
    }

    #[test]
    fn defaults_apply_when_buffer_size_and_async_threads_are_unset() {
        let config = StorageConfigBuilder::new()
            .file("/tmp/does-not-matter.ds")
            .maximal_length(4096)
            .build()
            .unwrap();
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.async_threads, DEFAULT_ASYNC_THREADS);
    }

    #[test]
    fn dir_mints_unique_temp_names() {
        let a = StorageConfigBuilder::new().dir("/tmp").maximal_length(4096).build().unwrap();
        let b = StorageConfigBuilder::new().dir("/tmp").maximal_length(4096).build().unwrap();
        assert_ne!(a.location.path(), b.location.path());
    }

    #[test]
    fn debug_does_not_panic_and_clone_is_independent() {
        let config = StorageConfigBuilder::new()
            .file("/tmp/does-not-matter.ds")
            .maximal_length(4096)
            .build()
            .unwrap();
        let cloned = config.clone();
        assert_eq!(format!("{config:?}"), format!("{cloned:?}"));
    }
}
