//! Summary: Flat ordered key-value engine abstraction and backends.
//! Copyright (c) YOAB. All rights reserved.
//!
//! The bucketized layer does not manage pages, compaction, or disk
//! formats itself. It sits on any store that can get/put/delete flat
//! byte-string keys and answer ordered range queries over them. The
//! [`KvEngine`] trait is that seam. Two backends ship with the crate:
//! a sled-backed engine for on-disk databases and a `BTreeMap` engine
//! for in-memory databases and tests.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// A batch of writes applied atomically at transaction commit.
///
/// Operations are applied in the order they were queued. Engines must
/// apply the whole batch or none of it.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

/// A single queued write.
#[derive(Debug)]
pub enum BatchOp {
    /// Insert or overwrite a key.
    Put(Vec<u8>, Vec<u8>),
    /// Remove a key. Removing an absent key is a no-op.
    Delete(Vec<u8>),
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an insert or overwrite.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key, value));
    }

    /// Queues a removal.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete(key));
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl IntoIterator for WriteBatch {
    type Item = BatchOp;
    type IntoIter = std::vec::IntoIter<BatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// An external flat store with byte-lexicographically ordered keys.
///
/// Implementations must order keys as `[u8]` compares. The layer above
/// derives all of its iteration from the two range primitives, so they
/// must agree exactly with that ordering.
pub trait KvEngine: Send + Sync {
    /// Retrieves the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Inserts or overwrites a single key outside of any batch.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes a single key outside of any batch.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Reports whether `key` is present.
    fn exists(&self, key: &[u8]) -> Result<bool>;

    /// Returns the smallest entry within the bounds, if any.
    fn first_in_range(
        &self,
        lo: Bound<&[u8]>,
        hi: Bound<&[u8]>,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Returns the largest entry within the bounds, if any.
    fn last_in_range(&self, lo: Bound<&[u8]>, hi: Bound<&[u8]>)
    -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Applies a batch of writes atomically.
    fn apply(&self, batch: WriteBatch) -> Result<()>;
}

fn engine_error(
    context: String,
    source: impl std::error::Error + Send + Sync + 'static,
) -> Error {
    Error::Io {
        context,
        source: Box::new(source),
    }
}

// ==================== In-Memory Engine ====================

/// A volatile engine backed by an ordered map.
///
/// Contents are lost when the engine is dropped. Useful for tests and
/// for throwaway databases.
#[derive(Debug, Default)]
pub struct MemEngine {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemEngine {
    /// Creates an empty in-memory engine.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvEngine for MemEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.map.read().contains_key(key))
    }

    fn first_in_range(
        &self,
        lo: Bound<&[u8]>,
        hi: Bound<&[u8]>,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .map
            .read()
            .range::<[u8], _>((lo, hi))
            .next()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn last_in_range(
        &self,
        lo: Bound<&[u8]>,
        hi: Bound<&[u8]>,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .map
            .read()
            .range::<[u8], _>((lo, hi))
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut map = self.map.write();
        for op in batch {
            match op {
                BatchOp::Put(key, value) => {
                    map.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

// ==================== Sled Engine ====================

/// An on-disk engine backed by the sled embedded store.
///
/// sled provides the ordering, durability, and atomic batch apply this
/// layer needs; everything above it is plain byte keys.
#[cfg(feature = "sled")]
pub struct SledEngine {
    db: sled::Db,
}

#[cfg(feature = "sled")]
impl SledEngine {
    /// Opens or creates a sled database at `path`.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .map_err(|e| engine_error(format!("open database at {}", path.display()), e))?;
        Ok(Self { db })
    }

    /// Opens a temporary sled database that is removed on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| engine_error("open temporary database".to_string(), e))?;
        Ok(Self { db })
    }
}

#[cfg(feature = "sled")]
impl KvEngine for SledEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map(|value| value.map(|v| v.to_vec()))
            .map_err(|e| engine_error(format!("get key \"{}\"", key.escape_ascii()), e))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db
            .insert(key, value.to_vec())
            .map(|_| ())
            .map_err(|e| engine_error(format!("put key \"{}\"", key.escape_ascii()), e))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.db
            .remove(key)
            .map(|_| ())
            .map_err(|e| engine_error(format!("delete key \"{}\"", key.escape_ascii()), e))
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        self.db
            .contains_key(key)
            .map_err(|e| engine_error(format!("check key \"{}\"", key.escape_ascii()), e))
    }

    fn first_in_range(
        &self,
        lo: Bound<&[u8]>,
        hi: Bound<&[u8]>,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match self.db.range::<&[u8], _>((lo, hi)).next() {
            None => Ok(None),
            Some(Ok((k, v))) => Ok(Some((k.to_vec(), v.to_vec()))),
            Some(Err(e)) => Err(engine_error("forward range scan".to_string(), e)),
        }
    }

    fn last_in_range(
        &self,
        lo: Bound<&[u8]>,
        hi: Bound<&[u8]>,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match self.db.range::<&[u8], _>((lo, hi)).next_back() {
            None => Ok(None),
            Some(Ok((k, v))) => Ok(Some((k.to_vec(), v.to_vec()))),
            Some(Err(e)) => Err(engine_error("backward range scan".to_string(), e)),
        }
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut sled_batch = sled::Batch::default();
        for op in batch {
            match op {
                BatchOp::Put(key, value) => sled_batch.insert(key, value),
                BatchOp::Delete(key) => sled_batch.remove(key),
            }
        }
        self.db
            .apply_batch(sled_batch)
            .map_err(|e| engine_error("apply write batch".to_string(), e))?;
        self.db
            .flush()
            .map_err(|e| engine_error("flush write batch".to_string(), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_engine_put_get_delete() {
        let engine = MemEngine::new();
        engine.put(b"k1", b"v1").expect("put should succeed");
        assert_eq!(engine.get(b"k1").expect("get"), Some(b"v1".to_vec()));
        assert!(engine.exists(b"k1").expect("exists"));

        engine.delete(b"k1").expect("delete should succeed");
        assert_eq!(engine.get(b"k1").expect("get"), None);
        assert!(!engine.exists(b"k1").expect("exists"));
    }

    #[test]
    fn test_mem_engine_range_endpoints() {
        let engine = MemEngine::new();
        for key in [b"a", b"c", b"e"] {
            engine.put(key, b"v").expect("put should succeed");
        }

        let first = engine
            .first_in_range(Bound::Included(b"b"), Bound::Unbounded)
            .expect("range");
        assert_eq!(first.map(|(k, _)| k), Some(b"c".to_vec()));

        let last = engine
            .last_in_range(Bound::Unbounded, Bound::Excluded(b"e"))
            .expect("range");
        assert_eq!(last.map(|(k, _)| k), Some(b"c".to_vec()));

        let none = engine
            .first_in_range(Bound::Excluded(b"e"), Bound::Unbounded)
            .expect("range");
        assert_eq!(none, None);
    }

    #[test]
    fn test_mem_engine_apply_batch() {
        let engine = MemEngine::new();
        engine.put(b"stale", b"old").expect("put should succeed");

        let mut batch = WriteBatch::new();
        batch.put(b"k1".to_vec(), b"v1".to_vec());
        batch.put(b"k2".to_vec(), b"v2".to_vec());
        batch.delete(b"stale".to_vec());
        assert_eq!(batch.len(), 3);

        engine.apply(batch).expect("apply should succeed");
        assert_eq!(engine.get(b"k1").expect("get"), Some(b"v1".to_vec()));
        assert_eq!(engine.get(b"k2").expect("get"), Some(b"v2".to_vec()));
        assert_eq!(engine.get(b"stale").expect("get"), None);
    }

    #[test]
    fn test_batch_applies_in_queue_order() {
        let engine = MemEngine::new();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"first".to_vec());
        batch.delete(b"k".to_vec());
        batch.put(b"k".to_vec(), b"last".to_vec());
        engine.apply(batch).expect("apply should succeed");
        assert_eq!(engine.get(b"k").expect("get"), Some(b"last".to_vec()));
    }
}
