//! Summary: Repositionable cursors over a bucket's slice of the key space.
//! Copyright (c) YOAB. All rights reserved.
//!
//! A cursor never holds an engine iterator. It remembers only its
//! current entry and derives each move from bounded range queries
//! against the transaction's merged view, so nothing outlives the
//! transaction and deleting the current entry does not disturb
//! iteration.

use std::ops::Bound;

use crate::api::Cursor;
use crate::error::Result;
use crate::keys;
use crate::tx::Transaction;

/// Which physical entries a cursor surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanMode {
    /// Only bucketized data keys under the scanned bucket.
    Keys,
    /// Only bucket-index entries whose parent is the scanned bucket.
    Buckets,
    /// Both, merged in name order.
    Full,
}

/// What kind of entry a cursor is positioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Bucket,
    Data,
}

#[derive(Debug)]
struct Entry {
    kind: EntryKind,
    /// Full flat key, preamble included.
    raw_key: Vec<u8>,
    /// Caller-visible key with the preamble stripped.
    key: Vec<u8>,
    /// Raw engine value. For bucket entries this is the child id.
    value: Vec<u8>,
}

impl Entry {
    fn new(kind: EntryKind, preamble_len: usize, raw_key: Vec<u8>, value: Vec<u8>) -> Self {
        let key = raw_key[preamble_len..].to_vec();
        Self {
            kind,
            raw_key,
            key,
            value,
        }
    }
}

#[derive(Debug)]
enum Position {
    Unpositioned,
    At(Entry),
    Exhausted,
}

/// Concrete cursor over one bucket within a transaction.
///
/// Created through [`Bucket::cursor`](crate::Bucket::cursor) in merged
/// mode; the layer also uses keys-only and buckets-only cursors
/// internally for iteration and cascading deletes.
pub struct TxCursor<'tx> {
    tx: &'tx Transaction,
    id: [u8; 4],
    mode: ScanMode,
    position: Position,
}

impl<'tx> TxCursor<'tx> {
    pub(crate) fn new(tx: &'tx Transaction, id: [u8; 4], mode: ScanMode) -> Self {
        Self {
            tx,
            id,
            mode,
            position: Position::Unpositioned,
        }
    }

    /// Full flat key of the current entry.
    pub(crate) fn raw_key(&self) -> Option<&[u8]> {
        match &self.position {
            Position::At(entry) => Some(&entry.raw_key),
            _ => None,
        }
    }

    /// Raw engine value of the current entry, child bucket ids
    /// included.
    pub(crate) fn raw_value(&self) -> Option<&[u8]> {
        match &self.position {
            Position::At(entry) => Some(&entry.value),
            _ => None,
        }
    }

    fn preamble_for(&self, kind: EntryKind) -> Vec<u8> {
        match kind {
            EntryKind::Bucket => keys::bucket_index_prefix(self.id),
            EntryKind::Data => self.id.to_vec(),
        }
    }

    fn first_of(&self, kind: EntryKind) -> Result<Option<Entry>> {
        let preamble = self.preamble_for(kind);
        let (lo, hi) = keys::prefix_range(&preamble);
        let found = self
            .tx
            .next_in_range(keys::bound_as_slice(&lo), keys::bound_as_slice(&hi))?;
        Ok(found.map(|(raw_key, value)| Entry::new(kind, preamble.len(), raw_key, value)))
    }

    fn last_of(&self, kind: EntryKind) -> Result<Option<Entry>> {
        let preamble = self.preamble_for(kind);
        let (lo, hi) = keys::prefix_range(&preamble);
        let found = self
            .tx
            .prev_in_range(keys::bound_as_slice(&lo), keys::bound_as_slice(&hi))?;
        Ok(found.map(|(raw_key, value)| Entry::new(kind, preamble.len(), raw_key, value)))
    }

    fn after_of(&self, kind: EntryKind, key: &[u8]) -> Result<Option<Entry>> {
        let preamble = self.preamble_for(kind);
        let (_, hi) = keys::prefix_range(&preamble);
        let mut from = preamble.clone();
        from.extend_from_slice(key);
        let found = self
            .tx
            .next_in_range(Bound::Excluded(from.as_slice()), keys::bound_as_slice(&hi))?;
        Ok(found.map(|(raw_key, value)| Entry::new(kind, preamble.len(), raw_key, value)))
    }

    fn before_of(&self, kind: EntryKind, key: &[u8]) -> Result<Option<Entry>> {
        let preamble = self.preamble_for(kind);
        let mut until = preamble.clone();
        until.extend_from_slice(key);
        let found = self.tx.prev_in_range(
            Bound::Included(preamble.as_slice()),
            Bound::Excluded(until.as_slice()),
        )?;
        Ok(found.map(|(raw_key, value)| Entry::new(kind, preamble.len(), raw_key, value)))
    }

    fn seek_of(&self, kind: EntryKind, key: &[u8]) -> Result<Option<Entry>> {
        let preamble = self.preamble_for(kind);
        let (_, hi) = keys::prefix_range(&preamble);
        let mut from = preamble.clone();
        from.extend_from_slice(key);
        let found = self
            .tx
            .next_in_range(Bound::Included(from.as_slice()), keys::bound_as_slice(&hi))?;
        Ok(found.map(|(raw_key, value)| Entry::new(kind, preamble.len(), raw_key, value)))
    }

    fn settle(&mut self, entry: Option<Entry>) -> bool {
        match entry {
            Some(entry) => {
                self.position = Position::At(entry);
                true
            }
            None => {
                self.position = Position::Exhausted;
                false
            }
        }
    }

    fn exhaust(&mut self) -> bool {
        self.position = Position::Exhausted;
        false
    }
}

/// Of two candidates from the bucket and data ranges, the one that
/// comes first in forward order.
fn earlier(a: Option<Entry>, b: Option<Entry>) -> Option<Entry> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if x.key <= y.key { x } else { y }),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Of two candidates, the one that comes first in backward order.
fn later(a: Option<Entry>, b: Option<Entry>) -> Option<Entry> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if x.key >= y.key { x } else { y }),
        (x, None) => x,
        (None, y) => y,
    }
}

impl Cursor for TxCursor<'_> {
    fn first(&mut self) -> Result<bool> {
        if self.tx.is_closed() {
            return Ok(self.exhaust());
        }
        let entry = match self.mode {
            ScanMode::Keys => self.first_of(EntryKind::Data)?,
            ScanMode::Buckets => self.first_of(EntryKind::Bucket)?,
            ScanMode::Full => earlier(
                self.first_of(EntryKind::Bucket)?,
                self.first_of(EntryKind::Data)?,
            ),
        };
        Ok(self.settle(entry))
    }

    fn last(&mut self) -> Result<bool> {
        if self.tx.is_closed() {
            return Ok(self.exhaust());
        }
        let entry = match self.mode {
            ScanMode::Keys => self.last_of(EntryKind::Data)?,
            ScanMode::Buckets => self.last_of(EntryKind::Bucket)?,
            ScanMode::Full => later(
                self.last_of(EntryKind::Bucket)?,
                self.last_of(EntryKind::Data)?,
            ),
        };
        Ok(self.settle(entry))
    }

    fn next(&mut self) -> Result<bool> {
        if self.tx.is_closed() {
            return Ok(self.exhaust());
        }
        // Stepping is only meaningful once positioned; otherwise act
        // like an exhausted cursor and stay put.
        let current = match &self.position {
            Position::At(entry) => entry.key.clone(),
            _ => return Ok(false),
        };
        let entry = match self.mode {
            ScanMode::Keys => self.after_of(EntryKind::Data, &current)?,
            ScanMode::Buckets => self.after_of(EntryKind::Bucket, &current)?,
            ScanMode::Full => earlier(
                self.after_of(EntryKind::Bucket, &current)?,
                self.after_of(EntryKind::Data, &current)?,
            ),
        };
        Ok(self.settle(entry))
    }

    fn prev(&mut self) -> Result<bool> {
        if self.tx.is_closed() {
            return Ok(self.exhaust());
        }
        let current = match &self.position {
            Position::At(entry) => entry.key.clone(),
            _ => return Ok(false),
        };
        let entry = match self.mode {
            ScanMode::Keys => self.before_of(EntryKind::Data, &current)?,
            ScanMode::Buckets => self.before_of(EntryKind::Bucket, &current)?,
            ScanMode::Full => later(
                self.before_of(EntryKind::Bucket, &current)?,
                self.before_of(EntryKind::Data, &current)?,
            ),
        };
        Ok(self.settle(entry))
    }

    fn seek(&mut self, key: &[u8]) -> Result<bool> {
        if self.tx.is_closed() {
            return Ok(self.exhaust());
        }
        let entry = match self.mode {
            ScanMode::Keys => self.seek_of(EntryKind::Data, key)?,
            ScanMode::Buckets => self.seek_of(EntryKind::Bucket, key)?,
            ScanMode::Full => earlier(
                self.seek_of(EntryKind::Bucket, key)?,
                self.seek_of(EntryKind::Data, key)?,
            ),
        };
        Ok(self.settle(entry))
    }

    fn key(&self) -> Option<&[u8]> {
        if self.tx.is_closed() {
            return None;
        }
        match &self.position {
            Position::At(entry) => Some(&entry.key),
            _ => None,
        }
    }

    fn value(&self) -> Option<&[u8]> {
        if self.tx.is_closed() {
            return None;
        }
        match &self.position {
            Position::At(entry) if entry.kind == EntryKind::Data => Some(&entry.value),
            _ => None,
        }
    }
}
