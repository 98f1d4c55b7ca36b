//! Summary: Bucket and cursor traits implemented by the storage layer.
//! Copyright (c) YOAB. All rights reserved.
//!
//! These traits are the contract the rest of a node programs against.
//! Only one bucketized implementation ships in this crate, but nothing
//! above this layer depends on its concrete types.

use crate::error::Result;

/// A named, nestable key-value namespace inside a transaction.
///
/// All operations validate the owning transaction first: anything
/// called through a closed transaction fails with
/// [`Error::TxClosed`](crate::Error::TxClosed), and mutations on a
/// read-only transaction fail with
/// [`Error::TxNotWritable`](crate::Error::TxNotWritable) before any
/// state is touched.
pub trait Bucket: Sized {
    /// The cursor type produced by [`Bucket::cursor`].
    type Cursor: Cursor;

    /// Retrieves the nested bucket with the given name, or `None` if
    /// no such bucket exists.
    fn bucket(&self, name: &[u8]) -> Result<Option<Self>>;

    /// Creates a new nested bucket with the given name.
    ///
    /// # Errors
    ///
    /// `BucketExists` if the name is already a child bucket,
    /// `IncompatibleValue` if the name is already a key in this bucket,
    /// `NameRequired` if the name is empty, `TxNotWritable` or
    /// `TxClosed` per the transaction state.
    fn create_bucket(&self, name: &[u8]) -> Result<Self>;

    /// Returns the nested bucket with the given name, creating it
    /// first if it does not exist.
    fn create_bucket_if_not_exists(&self, name: &[u8]) -> Result<Self>;

    /// Removes the named nested bucket together with every descendant
    /// bucket and every key stored under any of them.
    ///
    /// # Errors
    ///
    /// `BucketNotFound` if no such child bucket exists, `TxNotWritable`
    /// or `TxClosed` per the transaction state.
    fn delete_bucket(&self, name: &[u8]) -> Result<()>;

    /// Saves a key/value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// `KeyRequired` if the key is empty, `IncompatibleValue` if the
    /// key names an existing child bucket, `TxNotWritable` or
    /// `TxClosed` per the transaction state.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Returns the value for the given key, or `None` if it does not
    /// exist. An empty key always yields `None`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Removes the given key. Deleting an absent or empty key is not
    /// an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Returns a cursor over this bucket's keys and nested buckets in
    /// merged name order.
    fn cursor(&self) -> Result<Self::Cursor>;

    /// Invokes `f` for every key/value pair directly in this bucket,
    /// in key order. Nested buckets are not descended into. Iteration
    /// stops at the first error `f` returns, which is propagated
    /// untouched.
    fn for_each<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>;

    /// Invokes `f` with the name of every direct child bucket, in name
    /// order. Does not recurse. Propagates `f`'s first error.
    fn for_each_bucket<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>;

    /// Reports whether the owning transaction is writable.
    fn writable(&self) -> bool;
}

/// A repositionable iterator over one bucket's slice of the key space.
///
/// A fresh cursor is unpositioned: call [`first`](Cursor::first),
/// [`last`](Cursor::last), or [`seek`](Cursor::seek) before
/// [`next`](Cursor::next) or [`prev`](Cursor::prev). Without a seek,
/// the stepping calls return `false` and leave the cursor where it is,
/// exactly as if it were exhausted.
///
/// Once the owning transaction closes, every call behaves as on an
/// exhausted cursor and no storage is read.
pub trait Cursor {
    /// Positions at the first entry in range. Returns `false` and
    /// exhausts the cursor if the range is empty.
    fn first(&mut self) -> Result<bool>;

    /// Positions at the last entry in range. Returns `false` and
    /// exhausts the cursor if the range is empty.
    fn last(&mut self) -> Result<bool>;

    /// Advances to the next entry. Returns `false` once exhausted.
    fn next(&mut self) -> Result<bool>;

    /// Steps back to the previous entry. Returns `false` once
    /// exhausted.
    fn prev(&mut self) -> Result<bool>;

    /// Positions at the first entry with key greater than or equal to
    /// `key`. Returns `false` and exhausts the cursor if none exists.
    fn seek(&mut self, key: &[u8]) -> Result<bool>;

    /// The current entry's key, or `None` when not positioned.
    fn key(&self) -> Option<&[u8]>;

    /// The current entry's value. `None` when not positioned or when
    /// the current entry is a nested bucket.
    fn value(&self) -> Option<&[u8]>;
}
