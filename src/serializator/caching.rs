use super::registry::ClassRegistry;
use super::{read_impl, read_one_impl, skip_impl, write_framed, ReadOutcome, Serializator, SingleRead, StoredObject};
use crate::cursor::{InputCursor, OutputCursor};
use crate::error::Result;

/// Assigns small integer tags to a fixed set of pre-registered classes (spec.md §6's
/// `cacheClasses` configuration key).
///
/// The registry is frozen at construction time, and [`Serializator::fingerprint`] folds in the
/// ordered class-name list, so reopening the same file with a different class order (or a
/// different class set) is rejected as [`crate::error::StorageError::VersionMismatch`] rather
/// than silently misinterpreting tags.
pub struct CachingSerializator {
    registry: ClassRegistry,
}

impl CachingSerializator {
    pub fn new(registry: ClassRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }
}

impl Serializator for CachingSerializator {
    fn write(&self, cursor: &mut dyn OutputCursor, obj: &dyn StoredObject) -> Result<u64> {
        let (tag, codec) = self.registry.codec_for(obj)?;
        let mut payload = Vec::with_capacity(64);
        payload.push(tag);
        codec.encode(obj, &mut payload)?;
        write_framed(cursor, &payload)
    }

    fn read(&self, cursor: &mut dyn InputCursor) -> Result<ReadOutcome> {
        read_impl(cursor, |cursor, len| {
            let mut buf = vec![0u8; len as usize];
            cursor.read_exact(&mut buf)?;
            let (&tag, payload) = buf
                .split_first()
                .ok_or_else(|| crate::error::StorageError::corrupted("empty record payload"))?;
            self.registry.codec_at(tag)?.decode(payload)
        })
    }

    fn read_one(&self, cursor: &mut dyn InputCursor) -> Result<SingleRead> {
        read_one_impl(cursor, |cursor, len| {
            let mut buf = vec![0u8; len as usize];
            cursor.read_exact(&mut buf)?;
            let (&tag, payload) = buf
                .split_first()
                .ok_or_else(|| crate::error::StorageError::corrupted("empty record payload"))?;
            self.registry.codec_at(tag)?.decode(payload)
        })
    }

    fn skip(&self, cursor: &mut dyn InputCursor, include_deleted: bool) -> Result<i32> {
        skip_impl(cursor, include_deleted)
    }

    fn fingerprint(&self) -> u32 {
        self.registry.fingerprint()
    }
}
