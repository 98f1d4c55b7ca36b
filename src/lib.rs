//! Summary: Embedded, transactional, bucketized key-value storage layer.
//! Copyright (c) YOAB. All rights reserved.
//!
//! bucketdb layers hierarchical namespaces ("buckets"), nested-bucket
//! trees, and ordered cursors on top of a flat ordered key-value
//! engine. The engine only understands byte-string keys; this crate
//! adds namespacing by prefixing every stored key with a fixed-width
//! bucket id and keeping the bucket hierarchy itself in an index of
//! (parent id, name) entries. This design is similar to bbolt/boltdb
//! used in etcd, with the page management delegated to the engine.
//!
//! # Architecture
//!
//! A [`Database`] owns the engine and vends [`Transaction`]s. Each
//! transaction buffers its writes in a pending overlay that is
//! consulted before the persisted store, so a transaction always
//! observes its own writes and commits them as one atomic batch.
//! [`Bucket`] and [`Cursor`] are the operation contract; the concrete
//! [`TxBucket`] and [`TxCursor`] types implement it against a
//! transaction.
//!
//! # Example
//!
//! ```
//! use bucketdb::{Bucket, Database};
//!
//! # fn main() -> bucketdb::Result<()> {
//! let db = Database::in_memory()?;
//!
//! db.update(|tx| {
//!     let widgets = tx.metadata().create_bucket(b"widgets")?;
//!     widgets.put(b"a", b"1")
//! })?;
//!
//! db.view(|tx| {
//!     let widgets = tx.metadata().bucket(b"widgets")?.expect("created above");
//!     assert_eq!(widgets.get(b"a")?.as_deref(), Some(&b"1"[..]));
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod bucket;
pub mod cursor;
pub mod db;
pub mod engine;
pub mod error;
mod keys;
pub mod tx;

pub use api::{Bucket, Cursor};
pub use bucket::TxBucket;
pub use cursor::TxCursor;
pub use db::Database;
#[cfg(feature = "sled")]
pub use engine::SledEngine;
pub use engine::{BatchOp, KvEngine, MemEngine, WriteBatch};
pub use error::{Error, Result};
pub use keys::BLOCK_INDEX_BUCKET_NAME;
pub use tx::Transaction;
