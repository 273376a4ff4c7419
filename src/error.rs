//! Error types shared across the storage, cursor, and serializator layers.

use std::io;

use snafu::Snafu;

/// Errors surfaced by [`crate::block_storage::BlockStorage`] and its collaborators.
///
/// This is the single error surface described in spec.md §7: every fallible operation in this
/// crate returns (or converts into) one of these variants. Nothing here is retried internally;
/// callers decide how to react (delete a corrupted file, back off on `CapacityFull`, etc).
#[derive(Debug, Snafu)]
pub enum StorageError {
    /// A `store` would exceed the segment's `maximalLength`.
    ///
    /// The storage's on-disk and in-memory state is left unchanged: `occupation` is not advanced
    /// and no bytes are written for the rejected record.
    #[snafu(display("store of {requested} bytes would exceed capacity ({max} bytes)"))]
    CapacityFull { requested: u64, max: u64 },

    /// A mutating operation (`store`/`remove`) was attempted on a read-only storage.
    #[snafu(display("storage was opened read-only"))]
    ReadOnly,

    /// An address was negative, past the end of the log, or did not point at a size prefix.
    #[snafu(display("address {address} is not a valid record position"))]
    InvalidAddress { address: u64 },

    /// A header field didn't match what was expected, or a payload was truncated mid-read.
    #[snafu(display("storage is corrupted: {reason}"))]
    Corrupted { reason: String },

    /// The on-disk magic/version or serializator fingerprint didn't match the opener.
    #[snafu(display(
        "version mismatch: on-disk fingerprint {on_disk:#010x}, expected {expected:#010x}"
    ))]
    VersionMismatch { on_disk: u32, expected: u32 },

    /// An underlying read/write/fsync/mmap call failed.
    #[snafu(display("I/O error: {source}"))]
    IoError { source: io::Error },
}

impl From<io::Error> for StorageError {
    fn from(source: io::Error) -> Self {
        StorageError::IoError { source }
    }
}

impl StorageError {
    pub fn corrupted(reason: impl Into<String>) -> Self {
        StorageError::Corrupted {
            reason: reason.into(),
        }
    }
}

/// Errors raised while building a [`crate::config::StorageConfig`].
#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("parameter '{param_name}' was invalid: {reason}"))]
    InvalidParameter {
        param_name: &'static str,
        reason: String,
    },
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;
