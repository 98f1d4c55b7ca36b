//! Summary: Transaction type with a pending overlay over the flat engine.
//! Copyright (c) YOAB. All rights reserved.
//!
//! A transaction buffers every write in an in-memory overlay keyed by
//! flat key. Reads consult the overlay first, so a put is observable
//! within its own transaction before commit and an overlay tombstone
//! masks a persisted value. Commit turns the overlay into one atomic
//! engine batch; rollback discards it.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RawMutex;
use parking_lot::lock_api::ArcMutexGuard;

use crate::bucket::TxBucket;
use crate::engine::{KvEngine, WriteBatch};
use crate::error::{Error, Result};
use crate::keys;

/// Guard holding the database's single-writer lock for the lifetime of
/// a writable transaction.
pub(crate) type WriteGuard = ArcMutexGuard<RawMutex, ()>;

/// A buffered, not yet committed write.
#[derive(Debug, Clone)]
enum PendingWrite {
    /// Insert or overwrite with the given value.
    Put(Vec<u8>),
    /// Tombstone masking any persisted value.
    Delete,
}

/// A scoped unit of work against the store.
///
/// All bucket and cursor operations go through a transaction, which is
/// intended for single-thread-at-a-time use. Buckets and cursors hold
/// a shared reference to their transaction and become unusable once it
/// closes: commit, rollback, and drop all close the transaction, and
/// every entry point revalidates that state first.
///
/// Dropping a transaction that was never committed discards its
/// pending writes.
pub struct Transaction {
    engine: Arc<dyn KvEngine>,
    writable: bool,
    closed: Cell<bool>,
    pending: RefCell<BTreeMap<Vec<u8>, PendingWrite>>,
    write_guard: RefCell<Option<WriteGuard>>,
}

impl Transaction {
    /// Creates a new transaction. Writable transactions carry the
    /// database's writer-lock guard, released when the transaction
    /// closes.
    pub(crate) fn new(
        engine: Arc<dyn KvEngine>,
        writable: bool,
        write_guard: Option<WriteGuard>,
    ) -> Self {
        Self {
            engine,
            writable,
            closed: Cell::new(false),
            pending: RefCell::new(BTreeMap::new()),
            write_guard: RefCell::new(write_guard),
        }
    }

    /// Returns the root metadata bucket. Every bucket in the store is
    /// reachable from here.
    pub fn metadata(&self) -> TxBucket<'_> {
        TxBucket::new(self, keys::METADATA_BUCKET_ID)
    }

    /// Reports whether this transaction accepts mutations.
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Reports whether this transaction has ended.
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Fails with `TxClosed` once the transaction has ended.
    pub(crate) fn check_closed(&self) -> Result<()> {
        if self.closed.get() {
            return Err(Error::TxClosed);
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.set(true);
        self.pending.borrow_mut().clear();
        self.write_guard.borrow_mut().take();
    }

    /// Commits every buffered write as one atomic engine batch and
    /// closes the transaction.
    ///
    /// The transaction is closed when this returns, whether or not the
    /// commit succeeded.
    ///
    /// # Errors
    ///
    /// `TxClosed` if already ended, `TxNotWritable` on a read-only
    /// transaction, or the engine error that failed the batch.
    pub fn commit(&self) -> Result<()> {
        self.check_closed()?;
        let result = self.write_pending();
        self.close();
        result
    }

    /// Discards every buffered write and closes the transaction.
    ///
    /// # Errors
    ///
    /// `TxClosed` if the transaction already ended.
    pub fn rollback(&self) -> Result<()> {
        self.check_closed()?;
        self.close();
        Ok(())
    }

    fn write_pending(&self) -> Result<()> {
        if !self.writable {
            return Err(Error::TxNotWritable);
        }
        let pending = self.pending.borrow();
        if pending.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        let mut puts = 0usize;
        let mut deletes = 0usize;
        for (key, write) in pending.iter() {
            match write {
                PendingWrite::Put(value) => {
                    puts += 1;
                    batch.put(key.clone(), value.clone());
                }
                PendingWrite::Delete => {
                    deletes += 1;
                    batch.delete(key.clone());
                }
            }
        }
        drop(pending);

        self.engine.apply(batch)?;
        log::debug!("committed transaction: {puts} puts, {deletes} deletes");
        Ok(())
    }

    // ==================== Flat Key Operations ====================

    /// Returns the effective value of a flat key: overlay first, then
    /// the persisted store.
    pub(crate) fn fetch_key(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_closed()?;
        match self.pending.borrow().get(key) {
            Some(PendingWrite::Put(value)) => Ok(Some(value.clone())),
            Some(PendingWrite::Delete) => Ok(None),
            None => self.engine.get(key),
        }
    }

    /// Existence check with the same overlay precedence as
    /// [`fetch_key`](Self::fetch_key).
    pub(crate) fn has_key(&self, key: &[u8]) -> Result<bool> {
        self.check_closed()?;
        match self.pending.borrow().get(key) {
            Some(PendingWrite::Put(_)) => Ok(true),
            Some(PendingWrite::Delete) => Ok(false),
            None => self.engine.exists(key),
        }
    }

    /// Buffers an insert or overwrite of a flat key.
    pub(crate) fn put_key(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.check_closed()?;
        if !self.writable {
            return Err(Error::TxNotWritable);
        }
        self.pending.borrow_mut().insert(key, PendingWrite::Put(value));
        Ok(())
    }

    /// Buffers removal of a flat key. With `must_exist` the key has to
    /// be present in the effective view; a miss then means the caller
    /// broke an invariant and surfaces as corruption.
    pub(crate) fn delete_key(&self, key: &[u8], must_exist: bool) -> Result<()> {
        self.check_closed()?;
        if !self.writable {
            return Err(Error::TxNotWritable);
        }
        if must_exist && !self.has_key(key)? {
            return Err(Error::Corrupted(format!(
                "key \"{}\" vanished during delete",
                key.escape_ascii()
            )));
        }
        self.pending
            .borrow_mut()
            .insert(key.to_vec(), PendingWrite::Delete);
        Ok(())
    }

    /// Allocates the next unused 4-byte bucket id. The counter is
    /// written through the overlay, so the allocation commits or rolls
    /// back with the rest of the transaction and committed ids are
    /// never repeated.
    pub(crate) fn next_bucket_id(&self) -> Result<[u8; 4]> {
        let current = match self.fetch_key(keys::CUR_BUCKET_ID_KEY)? {
            Some(raw) => u32::from_be_bytes(keys::decode_bucket_id(&raw)?),
            None => u32::from_be_bytes(keys::BLOCK_INDEX_BUCKET_ID),
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| Error::Corrupted("bucket id space exhausted".to_string()))?;
        let id = next.to_be_bytes();
        self.put_key(keys::CUR_BUCKET_ID_KEY.to_vec(), id.to_vec())?;
        Ok(id)
    }

    // ==================== Merged Range Stepping ====================

    /// Returns the smallest entry within the bounds of the combined
    /// overlay and persisted key space. Overlay entries win over
    /// persisted entries with the same key; tombstones hide them.
    pub(crate) fn next_in_range(
        &self,
        lo: Bound<&[u8]>,
        hi: Bound<&[u8]>,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.check_closed()?;
        let pending = self.pending.borrow();
        let mut lo = to_owned_bound(lo);
        loop {
            let lo_ref = keys::bound_as_slice(&lo);
            let persisted = self.engine.first_in_range(lo_ref, hi)?;
            let buffered = pending.range::<[u8], _>((lo_ref, hi)).next();
            match (persisted, buffered) {
                (None, None) => return Ok(None),
                (Some(entry), None) => return Ok(Some(entry)),
                (None, Some((key, write))) => match write {
                    PendingWrite::Put(value) => return Ok(Some((key.clone(), value.clone()))),
                    PendingWrite::Delete => lo = Bound::Excluded(key.clone()),
                },
                (Some((pkey, pvalue)), Some((okey, write))) => {
                    if okey.as_slice() <= pkey.as_slice() {
                        match write {
                            PendingWrite::Put(value) => {
                                return Ok(Some((okey.clone(), value.clone())));
                            }
                            // A tombstone at or below the persisted key
                            // hides it; rescan past the tombstone.
                            PendingWrite::Delete => lo = Bound::Excluded(okey.clone()),
                        }
                    } else {
                        return Ok(Some((pkey, pvalue)));
                    }
                }
            }
        }
    }

    /// Mirror of [`next_in_range`](Self::next_in_range) from the high
    /// end of the bounds.
    pub(crate) fn prev_in_range(
        &self,
        lo: Bound<&[u8]>,
        hi: Bound<&[u8]>,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.check_closed()?;
        let pending = self.pending.borrow();
        let mut hi = to_owned_bound(hi);
        loop {
            let hi_ref = keys::bound_as_slice(&hi);
            let persisted = self.engine.last_in_range(lo, hi_ref)?;
            let buffered = pending.range::<[u8], _>((lo, hi_ref)).next_back();
            match (persisted, buffered) {
                (None, None) => return Ok(None),
                (Some(entry), None) => return Ok(Some(entry)),
                (None, Some((key, write))) => match write {
                    PendingWrite::Put(value) => return Ok(Some((key.clone(), value.clone()))),
                    PendingWrite::Delete => hi = Bound::Excluded(key.clone()),
                },
                (Some((pkey, pvalue)), Some((okey, write))) => {
                    if okey.as_slice() >= pkey.as_slice() {
                        match write {
                            PendingWrite::Put(value) => {
                                return Ok(Some((okey.clone(), value.clone())));
                            }
                            PendingWrite::Delete => hi = Bound::Excluded(okey.clone()),
                        }
                    } else {
                        return Ok(Some((pkey, pvalue)));
                    }
                }
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // An unclosed transaction rolls back implicitly.
        if !self.closed.get() {
            self.close();
        }
    }
}

fn to_owned_bound(bound: Bound<&[u8]>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(key) => Bound::Included(key.to_vec()),
        Bound::Excluded(key) => Bound::Excluded(key.to_vec()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::engine::MemEngine;

    fn open_db() -> Database {
        Database::in_memory().expect("in-memory database should open")
    }

    // ==================== Overlay Precedence Tests ====================

    #[test]
    fn test_put_visible_before_commit() {
        let db = open_db();
        let tx = db.begin(true);
        tx.put_key(b"k".to_vec(), b"v".to_vec())
            .expect("put should succeed");
        assert_eq!(tx.fetch_key(b"k").expect("fetch"), Some(b"v".to_vec()));
        assert!(tx.has_key(b"k").expect("has"));
    }

    #[test]
    fn test_overlay_overwrite_wins() {
        let db = open_db();
        {
            let tx = db.begin(true);
            tx.put_key(b"k".to_vec(), b"old".to_vec())
                .expect("put should succeed");
            tx.commit().expect("commit should succeed");
        }

        let tx = db.begin(true);
        tx.put_key(b"k".to_vec(), b"new".to_vec())
            .expect("put should succeed");
        assert_eq!(tx.fetch_key(b"k").expect("fetch"), Some(b"new".to_vec()));
    }

    #[test]
    fn test_tombstone_masks_persisted_value() {
        let db = open_db();
        {
            let tx = db.begin(true);
            tx.put_key(b"k".to_vec(), b"v".to_vec())
                .expect("put should succeed");
            tx.commit().expect("commit should succeed");
        }

        let tx = db.begin(true);
        tx.delete_key(b"k", true).expect("delete should succeed");
        assert_eq!(tx.fetch_key(b"k").expect("fetch"), None);
        assert!(!tx.has_key(b"k").expect("has"));
    }

    #[test]
    fn test_must_exist_delete_of_absent_key_is_corruption() {
        let db = open_db();
        let tx = db.begin(true);
        let err = tx.delete_key(b"ghost", true).expect_err("should fail");
        assert!(matches!(err, Error::Corrupted(_)));
    }

    // ==================== Commit / Rollback Tests ====================

    #[test]
    fn test_commit_persists_and_rollback_discards() {
        let db = open_db();
        {
            let tx = db.begin(true);
            tx.put_key(b"kept".to_vec(), b"v".to_vec())
                .expect("put should succeed");
            tx.commit().expect("commit should succeed");
        }
        {
            let tx = db.begin(true);
            tx.put_key(b"dropped".to_vec(), b"v".to_vec())
                .expect("put should succeed");
            tx.rollback().expect("rollback should succeed");
        }

        let tx = db.begin(false);
        assert_eq!(tx.fetch_key(b"kept").expect("fetch"), Some(b"v".to_vec()));
        assert_eq!(tx.fetch_key(b"dropped").expect("fetch"), None);
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let db = open_db();
        {
            let tx = db.begin(true);
            tx.put_key(b"k".to_vec(), b"v".to_vec())
                .expect("put should succeed");
        }

        let tx = db.begin(false);
        assert_eq!(tx.fetch_key(b"k").expect("fetch"), None);
    }

    #[test]
    fn test_commit_on_read_only_tx_fails_and_closes() {
        let db = open_db();
        let tx = db.begin(false);
        let err = tx.commit().expect_err("commit should fail");
        assert!(matches!(err, Error::TxNotWritable));
        assert!(tx.is_closed());
    }

    #[test]
    fn test_put_on_read_only_tx_fails() {
        let db = open_db();
        let tx = db.begin(false);
        let err = tx
            .put_key(b"k".to_vec(), b"v".to_vec())
            .expect_err("put should fail");
        assert!(matches!(err, Error::TxNotWritable));
    }

    // ==================== Closed Transaction Tests ====================

    #[test]
    fn test_operations_after_close_fail_with_tx_closed() {
        let db = open_db();
        let tx = db.begin(true);
        tx.rollback().expect("rollback should succeed");

        assert!(matches!(tx.fetch_key(b"k"), Err(Error::TxClosed)));
        assert!(matches!(tx.has_key(b"k"), Err(Error::TxClosed)));
        assert!(matches!(
            tx.put_key(b"k".to_vec(), b"v".to_vec()),
            Err(Error::TxClosed)
        ));
        assert!(matches!(tx.delete_key(b"k", false), Err(Error::TxClosed)));
        assert!(matches!(tx.commit(), Err(Error::TxClosed)));
        assert!(matches!(tx.rollback(), Err(Error::TxClosed)));
    }

    // ==================== Bucket ID Allocation Tests ====================

    #[test]
    fn test_bucket_ids_are_monotonic_within_a_tx() {
        let db = open_db();
        let tx = db.begin(true);
        let first = tx.next_bucket_id().expect("allocation should succeed");
        let second = tx.next_bucket_id().expect("allocation should succeed");
        assert_eq!(first, [0x00, 0x00, 0x00, 0x02]);
        assert_eq!(second, [0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn test_bucket_id_counter_survives_commit() {
        let db = open_db();
        {
            let tx = db.begin(true);
            tx.next_bucket_id().expect("allocation should succeed");
            tx.commit().expect("commit should succeed");
        }

        let tx = db.begin(true);
        let id = tx.next_bucket_id().expect("allocation should succeed");
        assert_eq!(id, [0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn test_rolled_back_ids_are_reissued() {
        let db = open_db();
        {
            let tx = db.begin(true);
            tx.next_bucket_id().expect("allocation should succeed");
            tx.rollback().expect("rollback should succeed");
        }

        let tx = db.begin(true);
        let id = tx.next_bucket_id().expect("allocation should succeed");
        assert_eq!(id, [0x00, 0x00, 0x00, 0x02]);
    }

    // ==================== Merged Stepping Tests ====================

    #[test]
    fn test_next_in_range_merges_overlay_and_store() {
        let engine = std::sync::Arc::new(MemEngine::new());
        let db = Database::with_engine(engine.clone()).expect("database should open");
        engine.put(b"a", b"persisted").expect("seed should succeed");
        engine.put(b"c", b"persisted").expect("seed should succeed");

        let tx = db.begin(true);
        tx.put_key(b"b".to_vec(), b"buffered".to_vec())
            .expect("put should succeed");
        tx.delete_key(b"c", true).expect("delete should succeed");

        let mut seen = Vec::new();
        let mut lo: Bound<Vec<u8>> = Bound::Unbounded;
        while let Some((key, value)) = tx
            .next_in_range(keys::bound_as_slice(&lo), Bound::Unbounded)
            .expect("step should succeed")
        {
            // Skip the allocator bookkeeping key seeded at open.
            if key != keys::CUR_BUCKET_ID_KEY {
                seen.push((key.clone(), value));
            }
            lo = Bound::Excluded(key);
        }
        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), b"persisted".to_vec()),
                (b"b".to_vec(), b"buffered".to_vec()),
            ]
        );
    }

    #[test]
    fn test_prev_in_range_sees_overlay_overwrite() {
        let engine = std::sync::Arc::new(MemEngine::new());
        let db = Database::with_engine(engine.clone()).expect("database should open");
        engine.put(b"k1", b"old").expect("seed should succeed");

        let tx = db.begin(true);
        tx.put_key(b"k1".to_vec(), b"new".to_vec())
            .expect("put should succeed");

        let entry = tx
            .prev_in_range(Bound::Included(b"k"), Bound::Excluded(b"l"))
            .expect("step should succeed");
        assert_eq!(entry, Some((b"k1".to_vec(), b"new".to_vec())));
    }
}
