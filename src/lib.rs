//! `bucket_storage`: append-only, self-describing block storage for metric-space search
//! buckets, and its in-file index/search layer.
//!
//! Provides a recoverable on-disk record log (see [`block_storage`]), the cursor abstractions
//! that back it (see [`cursor`]), the binary codec that frames objects within it (see
//! [`serializator`]), a forward search cursor over it (see [`search`]), and an in-memory sibling
//! used as a reference oracle or a no-durability swap-in (see [`memory_storage`]).
//!
//! The algorithm/operation dispatch framework, the distributed messaging layer, object models
//! (vectors, metric distances, keys), and CLI/configuration loading for a deployed system are
//! out of scope: this crate is a library with no `main` and no network surface.

pub mod address;
pub mod block_storage;
pub mod config;
pub mod cursor;
pub mod error;
pub mod header;
pub mod memory_storage;
pub mod pool;
pub mod search;
pub mod serializator;

pub use address::Address;
pub use block_storage::BlockStorage;
pub use config::{StorageConfig, StorageConfigBuilder};
pub use error::{BuildError, StorageError};
pub use memory_storage::MemoryStorage;
pub use search::{Comparator, KeyFilter, Search};
pub use serializator::{
    CachingSerializator, ClassCodec, ClassRegistry, MultiClassSerializator, Serializator,
    StoredObject,
};
