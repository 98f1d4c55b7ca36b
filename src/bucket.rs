//! Summary: Bucket implementation for namespaced key-value storage.
//! Copyright (c) YOAB. All rights reserved.
//!
//! Buckets provide logical namespacing for keys and nest to arbitrary
//! depth. A bucket is identified by a fixed 4-byte id; its existence
//! lives entirely in the flat store, as an entry in its parent's
//! bucket index plus the data keys carrying its id. The bucket value
//! itself is just (transaction, id) and can be copied freely.

use crate::api::{Bucket, Cursor};
use crate::cursor::{ScanMode, TxCursor};
use crate::error::{Error, Result};
use crate::keys;
use crate::tx::Transaction;

/// A named, nestable namespace within a transaction.
///
/// Obtained from [`Transaction::metadata`] or by looking up or
/// creating a child through the [`Bucket`] trait. All I/O is delegated
/// to the owning transaction; the handle is invalid once the
/// transaction closes.
#[derive(Clone, Copy)]
pub struct TxBucket<'tx> {
    tx: &'tx Transaction,
    id: [u8; 4],
}

impl<'tx> std::fmt::Debug for TxBucket<'tx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxBucket").field("id", &self.id).finish()
    }
}

impl<'tx> TxBucket<'tx> {
    pub(crate) fn new(tx: &'tx Transaction, id: [u8; 4]) -> Self {
        Self { tx, id }
    }

    #[cfg(test)]
    pub(crate) fn id(&self) -> [u8; 4] {
        self.id
    }
}

impl<'tx> Bucket for TxBucket<'tx> {
    type Cursor = TxCursor<'tx>;

    fn bucket(&self, name: &[u8]) -> Result<Option<Self>> {
        self.tx.check_closed()?;
        let child_id = match self.tx.fetch_key(&keys::bucket_index_key(self.id, name))? {
            Some(raw) => keys::decode_bucket_id(&raw)?,
            None => return Ok(None),
        };
        Ok(Some(TxBucket::new(self.tx, child_id)))
    }

    fn create_bucket(&self, name: &[u8]) -> Result<Self> {
        self.tx.check_closed()?;
        if !self.tx.writable() {
            return Err(Error::TxNotWritable);
        }
        if name.is_empty() {
            return Err(Error::NameRequired);
        }

        let index_key = keys::bucket_index_key(self.id, name);
        if self.tx.has_key(&index_key)? {
            return Err(Error::BucketExists {
                name: name.to_vec(),
            });
        }
        // A data key with this name under the same parent would make
        // the merged view ambiguous.
        if self.tx.has_key(&keys::bucketized_key(self.id, name))? {
            return Err(Error::IncompatibleValue { key: name.to_vec() });
        }

        // The block index bucket keeps its reserved id so it stays
        // addressable without consulting the allocator.
        let child_id = if self.id == keys::METADATA_BUCKET_ID && name == keys::BLOCK_INDEX_BUCKET_NAME
        {
            keys::BLOCK_INDEX_BUCKET_ID
        } else {
            self.tx.next_bucket_id()?
        };

        self.tx.put_key(index_key, child_id.to_vec())?;
        Ok(TxBucket::new(self.tx, child_id))
    }

    fn create_bucket_if_not_exists(&self, name: &[u8]) -> Result<Self> {
        self.tx.check_closed()?;
        if !self.tx.writable() {
            return Err(Error::TxNotWritable);
        }
        if name.is_empty() {
            return Err(Error::NameRequired);
        }

        if let Some(existing) = self.bucket(name)? {
            return Ok(existing);
        }
        self.create_bucket(name)
    }

    fn delete_bucket(&self, name: &[u8]) -> Result<()> {
        self.tx.check_closed()?;
        if !self.tx.writable() {
            return Err(Error::TxNotWritable);
        }

        let index_key = keys::bucket_index_key(self.id, name);
        let raw_id = self
            .tx
            .fetch_key(&index_key)?
            .ok_or_else(|| Error::BucketNotFound {
                name: name.to_vec(),
            })?;

        // Walk the subtree with an explicit stack so deletion cost
        // does not depend on nesting depth. Each popped bucket has its
        // keys removed and its children pushed for the next rounds.
        let mut stack = vec![keys::decode_bucket_id(&raw_id)?];
        let mut removed_buckets = 1usize;
        let mut removed_keys = 0usize;
        while let Some(id) = stack.pop() {
            let mut key_cursor = TxCursor::new(self.tx, id, ScanMode::Keys);
            let mut more = key_cursor.first()?;
            while more {
                if let Some(raw) = key_cursor.raw_key() {
                    self.tx.delete_key(raw, false)?;
                    removed_keys += 1;
                }
                more = key_cursor.next()?;
            }

            let mut bucket_cursor = TxCursor::new(self.tx, id, ScanMode::Buckets);
            more = bucket_cursor.first()?;
            while more {
                if let (Some(raw), Some(child)) =
                    (bucket_cursor.raw_key(), bucket_cursor.raw_value())
                {
                    stack.push(keys::decode_bucket_id(child)?);
                    self.tx.delete_key(raw, false)?;
                    removed_buckets += 1;
                }
                more = bucket_cursor.next()?;
            }
        }

        // The subtree is gone; drop the bucket's own index entry last.
        self.tx.delete_key(&index_key, true)?;
        log::trace!(
            "deleted bucket \"{}\": {removed_buckets} buckets, {removed_keys} keys removed",
            name.escape_ascii()
        );
        Ok(())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tx.check_closed()?;
        if !self.tx.writable() {
            return Err(Error::TxNotWritable);
        }
        if key.is_empty() {
            return Err(Error::KeyRequired);
        }
        if self.tx.has_key(&keys::bucket_index_key(self.id, key))? {
            return Err(Error::IncompatibleValue { key: key.to_vec() });
        }
        self.tx
            .put_key(keys::bucketized_key(self.id, key), value.to_vec())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tx.check_closed()?;
        if key.is_empty() {
            return Ok(None);
        }
        self.tx.fetch_key(&keys::bucketized_key(self.id, key))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.tx.check_closed()?;
        if !self.tx.writable() {
            return Err(Error::TxNotWritable);
        }
        if key.is_empty() {
            return Ok(());
        }
        self.tx.delete_key(&keys::bucketized_key(self.id, key), false)
    }

    fn cursor(&self) -> Result<TxCursor<'tx>> {
        self.tx.check_closed()?;
        Ok(TxCursor::new(self.tx, self.id, ScanMode::Full))
    }

    fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        self.tx.check_closed()?;
        let mut cursor = TxCursor::new(self.tx, self.id, ScanMode::Keys);
        let mut more = cursor.first()?;
        while more {
            if let (Some(key), Some(value)) = (cursor.key(), cursor.value()) {
                f(key, value)?;
            }
            more = cursor.next()?;
        }
        Ok(())
    }

    fn for_each_bucket<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        self.tx.check_closed()?;
        let mut cursor = TxCursor::new(self.tx, self.id, ScanMode::Buckets);
        let mut more = cursor.first()?;
        while more {
            if let Some(name) = cursor.key() {
                f(name)?;
            }
            more = cursor.next()?;
        }
        Ok(())
    }

    fn writable(&self) -> bool {
        self.tx.writable()
    }
}
