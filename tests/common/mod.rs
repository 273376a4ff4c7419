//! Shared scaffolding for the scenario tests in `tests/`: a minimal `Blob` payload type plus the
//! `ClassCodec`/`ClassRegistry` plumbing every test needs to open a `BlockStorage`.

use std::any::TypeId;
use std::sync::{Arc, Once};

use bucket_storage::error::Result;
use bucket_storage::{ClassCodec, ClassRegistry, StoredObject};

static TRACING_INIT: Once = Once::new();

/// Installs an `RUST_LOG`-gated tracing subscriber once per test binary, so `bucket_storage`'s
/// `trace!`/`debug!` output (recovery scans, compaction) can be inspected with
/// `RUST_LOG=bucket_storage=trace cargo test -- --nocapture` without every test paying for it.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// An opaque byte blob, standing in for whatever a bucket's object model actually stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob(pub Vec<u8>);

impl Blob {
    pub fn of_len(n: usize, fill: u8) -> Self {
        Blob(vec![fill; n])
    }
}

pub struct BlobCodec;

impl ClassCodec for BlobCodec {
    fn type_id(&self) -> TypeId {
        TypeId::of::<Blob>()
    }

    fn class_name(&self) -> &'static str {
        "Blob"
    }

    fn encode(&self, obj: &dyn StoredObject, buf: &mut Vec<u8>) -> Result<()> {
        let blob = obj.as_any().downcast_ref::<Blob>().expect("BlobCodec only handles Blob");
        buf.extend_from_slice(&blob.0);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn StoredObject>> {
        Ok(Box::new(Blob(bytes.to_vec())))
    }
}

/// A registry with `Blob` registered as the only class. Every wire record this crate's serializator
/// writes carries a one-byte class tag ahead of the encoded payload, so a `Blob::of_len(n, _)`
/// always occupies `n + 1` payload bytes on disk (`4 + n + 1` bytes including the length prefix).
pub fn blob_registry() -> ClassRegistry {
    let mut registry = ClassRegistry::new();
    registry.register(Arc::new(BlobCodec)).expect("single-class registry never collides");
    registry
}

/// The number of on-disk payload bytes (tag + data) a `Blob::of_len(n, _)` occupies once written.
pub const fn tagged_len(data_len: usize) -> usize {
    data_len + 1
}

pub fn downcast_blob(obj: &dyn StoredObject) -> &Blob {
    obj.as_any().downcast_ref::<Blob>().expect("expected a Blob")
}
