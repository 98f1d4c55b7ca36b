//! Summary: Database open and transaction management logic.
//! Copyright (c) YOAB. All rights reserved.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::KvEngine;
#[cfg(feature = "sled")]
use crate::engine::SledEngine;
use crate::engine::MemEngine;
use crate::error::Result;
use crate::keys;
use crate::tx::Transaction;

/// The main database handle.
///
/// A `Database` owns the flat engine and vends the transactions that
/// all bucket and cursor operations run through.
///
/// # Concurrency
///
/// Multiple read-only transactions may run concurrently. Only one
/// writable transaction exists at a time; [`begin`](Database::begin)
/// blocks until the current writer finishes.
pub struct Database {
    engine: Arc<dyn KvEngine>,
    write_lock: Arc<Mutex<()>>,
}

impl Database {
    /// Opens a database on any flat engine, initializing the bucket id
    /// allocator on first use.
    pub fn with_engine(engine: Arc<dyn KvEngine>) -> Result<Self> {
        if !engine.exists(keys::CUR_BUCKET_ID_KEY)? {
            engine.put(keys::CUR_BUCKET_ID_KEY, &keys::BLOCK_INDEX_BUCKET_ID)?;
            log::debug!("initialized bucket id allocator");
        }
        Ok(Self {
            engine,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Opens or creates an on-disk database at the given path.
    #[cfg(feature = "sled")]
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let db = Self::with_engine(Arc::new(SledEngine::open(path)?))?;
        log::debug!("database open");
        Ok(db)
    }

    /// Opens an on-disk database that is removed when dropped.
    #[cfg(feature = "sled")]
    pub fn open_temporary() -> Result<Self> {
        Self::with_engine(Arc::new(SledEngine::temporary()?))
    }

    /// Opens a volatile database that lives entirely in memory.
    pub fn in_memory() -> Result<Self> {
        Self::with_engine(Arc::new(MemEngine::new()))
    }

    /// Begins a transaction. A writable transaction holds the writer
    /// lock until it commits, rolls back, or is dropped.
    pub fn begin(&self, writable: bool) -> Transaction {
        let guard = if writable {
            Some(self.write_lock.lock_arc())
        } else {
            None
        };
        Transaction::new(Arc::clone(&self.engine), writable, guard)
    }

    /// Runs `f` inside a read-only transaction that is rolled back
    /// when `f` returns.
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let tx = self.begin(false);
        let result = f(&tx);
        if !tx.is_closed() {
            tx.rollback()?;
        }
        result
    }

    /// Runs `f` inside a writable transaction, committing when `f`
    /// succeeds and rolling back when it fails.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let tx = self.begin(true);
        match f(&tx) {
            Ok(value) => {
                if !tx.is_closed() {
                    tx.commit()?;
                }
                Ok(value)
            }
            Err(err) => {
                if !tx.is_closed() {
                    let _ = tx.rollback();
                }
                Err(err)
            }
        }
    }
}
