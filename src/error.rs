//! Summary: Error types for the bucketized storage layer.
//! Copyright (c) YOAB. All rights reserved.

use std::fmt;

/// Result type alias for bucketdb operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for bucketdb operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Operation attempted after the owning transaction ended.
    TxClosed,
    /// Mutating operation attempted on a read-only transaction.
    TxNotWritable,
    /// An empty bucket name was supplied where one is mandatory.
    NameRequired,
    /// An empty key was supplied where one is mandatory.
    KeyRequired,
    /// Bucket creation requested for a name that already exists under
    /// the same parent.
    BucketExists {
        /// The conflicting bucket name.
        name: Vec<u8>,
    },
    /// Bucket deletion or lookup requested for a name with no entry
    /// under the parent.
    BucketNotFound {
        /// The missing bucket name.
        name: Vec<u8>,
    },
    /// A key collides with a name already used by a nested bucket under
    /// the same parent, or vice versa.
    IncompatibleValue {
        /// The conflicting key or bucket name.
        key: Vec<u8>,
    },
    /// Stored state is malformed or an internal invariant was violated.
    Corrupted(String),
    /// Underlying flat-store failure, wrapped with the offending
    /// operation and key.
    Io {
        /// What the layer was doing when the engine failed.
        context: String,
        /// The engine error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TxClosed => write!(f, "transaction is closed"),
            Error::TxNotWritable => {
                write!(f, "operation requires a writable database transaction")
            }
            Error::NameRequired => write!(f, "bucket name must not be empty"),
            Error::KeyRequired => write!(f, "key must not be empty"),
            Error::BucketExists { name } => {
                write!(f, "bucket \"{}\" already exists", name.escape_ascii())
            }
            Error::BucketNotFound { name } => {
                write!(f, "bucket \"{}\" does not exist", name.escape_ascii())
            }
            Error::IncompatibleValue { key } => {
                write!(
                    f,
                    "key \"{}\" is incompatible with an existing entry",
                    key.escape_ascii()
                )
            }
            Error::Corrupted(msg) => write!(f, "store corrupted: {msg}"),
            Error::Io { context, source } => write!(f, "storage failure during {context}: {source}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_offending_bucket() {
        let err = Error::BucketExists {
            name: b"widgets".to_vec(),
        };
        assert_eq!(err.to_string(), "bucket \"widgets\" already exists");
    }

    #[test]
    fn test_display_escapes_binary_names() {
        let err = Error::BucketNotFound {
            name: vec![0x00, 0xFF],
        };
        assert_eq!(err.to_string(), "bucket \"\\x00\\xff\" does not exist");
    }

    #[test]
    fn test_io_error_exposes_source() {
        let inner = std::io::Error::other("disk gone");
        let err = Error::Io {
            context: "get key \"a\"".to_string(),
            source: Box::new(inner),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("disk gone"));
    }
}
