//! Summary: Physical key derivation for bucketized and bucket-index entries.
//! Copyright (c) YOAB. All rights reserved.
//!
//! Two key shapes exist on disk. A data key is the 4-byte bucket id
//! followed by the caller key. A bucket-index key is the index prefix,
//! the 4-byte parent id, and the raw child name. Both preambles are
//! fixed width, so range scans over one bucket never bleed into another.

use std::ops::Bound;

use crate::error::{Error, Result};

/// Prefix for every bucket-index entry in the flat key space.
pub(crate) const BUCKET_INDEX_PREFIX: &[u8] = b"bidx";

/// Flat key holding the most recently allocated bucket id, big-endian.
pub(crate) const CUR_BUCKET_ID_KEY: &[u8] = b"bidx-cbid";

/// Fixed id of the root metadata bucket.
pub(crate) const METADATA_BUCKET_ID: [u8; 4] = [0; 4];

/// Fixed id reserved for the block index bucket.
pub(crate) const BLOCK_INDEX_BUCKET_ID: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Name of the bucket that receives the reserved block index id when
/// created directly under the metadata root.
pub const BLOCK_INDEX_BUCKET_NAME: &[u8] = b"blockidx";

/// Returns the flat key for storing a child bucket's id in the bucket
/// index.
///
/// Format: `<index prefix><parent id><child name>`
#[inline]
pub(crate) fn bucket_index_key(parent_id: [u8; 4], name: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(BUCKET_INDEX_PREFIX.len() + 4 + name.len());
    key.extend_from_slice(BUCKET_INDEX_PREFIX);
    key.extend_from_slice(&parent_id);
    key.extend_from_slice(name);
    key
}

/// Returns the shared prefix of all bucket-index entries under a parent.
#[inline]
pub(crate) fn bucket_index_prefix(parent_id: [u8; 4]) -> Vec<u8> {
    bucket_index_key(parent_id, &[])
}

/// Returns the flat key for storing a caller key within a bucket.
///
/// Format: `<bucket id><caller key>`
#[inline]
pub(crate) fn bucketized_key(bucket_id: [u8; 4], key: &[u8]) -> Vec<u8> {
    let mut bkey = Vec::with_capacity(4 + key.len());
    bkey.extend_from_slice(&bucket_id);
    bkey.extend_from_slice(key);
    bkey
}

/// Parses a stored bucket id, which must be exactly 4 bytes.
#[inline]
pub(crate) fn decode_bucket_id(raw: &[u8]) -> Result<[u8; 4]> {
    <[u8; 4]>::try_from(raw).map_err(|_| {
        Error::Corrupted(format!(
            "bucket id \"{}\" is {} bytes, expected 4",
            raw.escape_ascii(),
            raw.len()
        ))
    })
}

/// Returns bounds covering every flat key that starts with `prefix`.
///
/// The upper bound is the shortest key greater than all prefixed keys;
/// a prefix of all 0xff bytes has no such key and yields an unbounded
/// upper end.
pub(crate) fn prefix_range(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let lower = Bound::Included(prefix.to_vec());
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.last().copied() {
        if last < 0xff {
            if let Some(byte) = upper.last_mut() {
                *byte = last + 1;
            }
            return (lower, Bound::Excluded(upper));
        }
        upper.pop();
    }
    (lower, Bound::Unbounded)
}

/// Borrows an owned bound as a byte-slice bound.
#[inline]
pub(crate) fn bound_as_slice(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(key) => Bound::Included(key.as_slice()),
        Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}
