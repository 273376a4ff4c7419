//! An explicit, caller-provided codec registry, indexed by small integer tags.
//!
//! Per spec.md §9 design notes, this replaces the original's reflective class-table lookup:
//! instead of discovering a class's encoder/decoder by runtime reflection, the caller registers
//! one [`ClassCodec`] per class up front, in a fixed order, and that order becomes the tag space.

use std::any::TypeId;
use std::sync::Arc;

use crc32fast::Hasher;

use crate::error::{Result, StorageError};
use crate::serializator::StoredObject;

/// Encodes and decodes one registered class.
pub trait ClassCodec: Send + Sync {
    /// The [`TypeId`] of the concrete Rust type this codec handles.
    fn type_id(&self) -> TypeId;

    /// A stable name for this class, folded into the registry's fingerprint.
    fn class_name(&self) -> &'static str;

    /// Appends `obj`'s encoded form to `buf`. Fails if `obj` is not this codec's registered type.
    fn encode(&self, obj: &dyn StoredObject, buf: &mut Vec<u8>) -> Result<()>;

    /// Decodes a payload previously produced by [`ClassCodec::encode`].
    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn StoredObject>>;
}

/// An ordered table of [`ClassCodec`]s, indexed by `u8` tag.
///
/// The order classes are registered in *is* the tag assignment; registering the same classes in
/// a different order produces a different [`ClassRegistry::fingerprint`], which is by design:
/// two storages with differently-ordered class tables are not wire-compatible.
#[derive(Clone, Default)]
pub struct ClassRegistry {
    classes: Vec<Arc<dyn ClassCodec>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class, returning its assigned tag.
    ///
    /// # Errors
    ///
    /// Fails if more than 256 classes are registered, since tags are a single byte, or if the
    /// same concrete type is registered twice.
    pub fn register(&mut self, codec: Arc<dyn ClassCodec>) -> Result<u8> {
        if self.classes.len() >= u8::MAX as usize + 1 {
            return Err(StorageError::corrupted(
                "class registry is full: at most 256 classes may be registered",
            ));
        }
        if self.tag_for(codec.type_id()).is_some() {
            return Err(StorageError::corrupted(format!(
                "class '{}' is already registered",
                codec.class_name()
            )));
        }
        let tag = self.classes.len() as u8;
        self.classes.push(codec);
        Ok(tag)
    }

    pub fn tag_for(&self, type_id: TypeId) -> Option<u8> {
        self.classes
            .iter()
            .position(|c| c.type_id() == type_id)
            .map(|i| i as u8)
    }

    pub fn codec_for(&self, obj: &dyn StoredObject) -> Result<(u8, Arc<dyn ClassCodec>)> {
        let type_id = obj.as_any().type_id();
        let tag = self
            .tag_for(type_id)
            .ok_or_else(|| StorageError::corrupted("object's class is not registered"))?;
        Ok((tag, Arc::clone(&self.classes[tag as usize])))
    }

    pub fn codec_at(&self, tag: u8) -> Result<Arc<dyn ClassCodec>> {
        self.classes
            .get(tag as usize)
            .cloned()
            .ok_or_else(|| StorageError::corrupted(format!("unknown class tag {tag}")))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// A stable hash over the ordered class-name list, used as (part of) the serializator
    /// fingerprint stored in the storage header.
    pub fn fingerprint(&self) -> u32 {
        let mut hasher = Hasher::new();
        for codec in &self.classes {
            hasher.update(codec.class_name().as_bytes());
            hasher.update(&[0]); // separator, so "ab","c" and "a","bc" don't collide
        }
        hasher.finalize()
    }
}
