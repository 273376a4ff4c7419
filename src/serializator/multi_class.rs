use crc32fast::Hasher;

use super::registry::ClassRegistry;
use super::{read_impl, read_one_impl, skip_impl, write_framed, ReadOutcome, Serializator, SingleRead, StoredObject};
use crate::cursor::{InputCursor, OutputCursor};
use crate::error::Result;

/// Writes a class tag ahead of every payload, resolved against a [`ClassRegistry`] the caller
/// populates before opening the storage.
///
/// Unlike [`super::CachingSerializator`], new classes may be registered over the crate's
/// lifetime without invalidating previously-written data, since the fingerprint intentionally
/// does not fold in the ordered class list, only the format marker and class count, so a
/// storage opened with fewer registered classes than it was written with is still rejected.
pub struct MultiClassSerializator {
    registry: ClassRegistry,
}

const FORMAT_MARKER: &[u8] = b"bucket-storage/multi-class/v1";

impl MultiClassSerializator {
    pub fn new(registry: ClassRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }
}

impl Serializator for MultiClassSerializator {
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
        let mut hasher = Hasher::new();
        hasher.update(FORMAT_MARKER);
        hasher.update(&(self.registry.len() as u32).to_be_bytes());
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use std::any::TypeId;
    use std::sync::Arc;

    use tempfile::tempfile;

    use super::*;
    use crate::cursor::{write_record_size, BufferedCursor, BufferedInputCursor};
    use crate::serializator::{ClassCodec, Serializator};

    #[derive(Debug, PartialEq, Eq)]
    struct Word(String);

    struct WordCodec;

    impl ClassCodec for WordCodec {
        fn type_id(&self) -> TypeId {
            TypeId::of::<Word>()
        }

        fn class_name(&self) -> &'static str {
            "Word"
        }

        fn encode(&self, obj: &dyn StoredObject, buf: &mut Vec<u8>) -> Result<()> {
            let word = obj.as_any().downcast_ref::<Word>().unwrap();
            buf.extend_from_slice(word.0.as_bytes());
            Ok(())
        }

        fn decode(&self, bytes: &[u8]) -> Result<Box<dyn StoredObject>> {
            Ok(Box::new(Word(String::from_utf8_lossy(bytes).into_owned())))
        }
    }

    fn registry_with_word() -> ClassRegistry {
        let mut registry = ClassRegistry::new();
        registry.register(Arc::new(WordCodec)).unwrap();
        registry
    }

    #[test]
    fn write_then_read_round_trips() {
        let serializator = MultiClassSerializator::new(registry_with_word());
        let file = Arc::new(tempfile().unwrap());
        file.set_len(256).unwrap();

        let mut out = BufferedCursor::new(Arc::clone(&file), 0, 64, 256);
        serializator.write(&mut out, &Word("hello".to_string())).unwrap();
        write_record_size(&mut out, 0).unwrap();
        out.flush(true).unwrap();

        let mut input = BufferedInputCursor::new(file, 0, 64);
        match serializator.read(&mut input).unwrap() {
            ReadOutcome::Object(obj) => {
                assert_eq!(obj.as_any().downcast_ref::<Word>().unwrap(), &Word("hello".to_string()));
            }
            ReadOutcome::EndOfLog => panic!("expected an object"),
        }
        assert!(matches!(serializator.read(&mut input).unwrap(), ReadOutcome::EndOfLog));
    }

    #[test]
    fn fingerprint_is_stable_across_equivalent_registries() {
        let a = MultiClassSerializator::new(registry_with_word());
        let b = MultiClassSerializator::new(registry_with_word());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_registered_class_count() {
        let one = MultiClassSerializator::new(registry_with_word());
        let empty = MultiClassSerializator::new(ClassRegistry::new());
        assert_ne!(one.fingerprint(), empty.fingerprint());
    }
}
