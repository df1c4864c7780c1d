//! Storage abstraction for root metadata
//!
//! Root documents are stored as content-addressed blobs: a [`RootRef`] is the
//! lowercase hex SHA-256 of the stored bytes. Each blob records the reference
//! it superseded, so the full chain of roots can be walked back to version 1.
//!
//! The "latest root" pointer is the only mutable state. Every backend updates
//! it with compare-and-swap semantics: `save` succeeds only if the pointer
//! still names the root the caller loaded, so two rotations started from the
//! same base cannot both land.

pub mod fs;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use fs::FsStore;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Debug};

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Root not found: {0}")]
    NotFound(String),

    #[error("Latest root moved: expected {expected}, found {actual}")]
    Conflict { expected: String, actual: String },

    #[error(
        "Unable to create '{0}': file exists. If no other writer is running, remove the file and retry"
    )]
    Locked(String),

    #[error("Invalid root reference: {0}")]
    InvalidReference(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl StorageError {
    /// Build a conflict error from the expected and observed latest pointers
    pub fn conflict(expected: Option<&RootRef>, actual: Option<&RootRef>) -> Self {
        StorageError::Conflict {
            expected: describe(expected),
            actual: describe(actual),
        }
    }
}

fn describe(reference: Option<&RootRef>) -> String {
    reference.map_or_else(|| "none".to_string(), |r| r.to_string())
}

/// Content address of a stored root document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootRef(String);

impl RootRef {
    /// Reference for the given serialized root
    pub fn for_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Parse a reference read back from storage
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let raw = raw.trim();
        if raw.len() == 64 && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            Ok(Self(raw.to_string()))
        } else {
            Err(StorageError::InvalidReference(raw.to_string()))
        }
    }

    /// Get the hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RootRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A root document as held by a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRoot {
    /// Content address of `bytes`
    pub reference: RootRef,
    /// Serialized signed root
    pub bytes: Vec<u8>,
    /// Root this one superseded (None for the first root)
    pub previous: Option<RootRef>,
}

/// Storage backend trait for root metadata
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait TrustStore: Send + Sync + Debug {
    /// Load a root by reference, or the latest root when `reference` is None
    async fn load(&self, reference: Option<&RootRef>) -> Result<StoredRoot, StorageError>;

    /// Store `bytes` and point "latest" at them
    ///
    /// Fails with [`StorageError::Conflict`] unless "latest" currently equals
    /// `expected_prev` (`None` meaning the store holds no root yet).
    async fn save(
        &self,
        expected_prev: Option<&RootRef>,
        bytes: Vec<u8>,
    ) -> Result<RootRef, StorageError>;

    /// Reference of the latest root, if any
    async fn latest(&self) -> Result<Option<RootRef>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_ref_is_content_address() {
        let a = RootRef::for_bytes(b"root v1");
        let b = RootRef::for_bytes(b"root v1");
        let c = RootRef::for_bytes(b"root v2");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_root_ref_parse() {
        let r = RootRef::for_bytes(b"x");
        assert_eq!(RootRef::parse(&format!("{}\n", r)).unwrap(), r);
        assert!(RootRef::parse("HEAD").is_err());
        assert!(RootRef::parse(&r.as_str().to_uppercase()).is_err());
    }

    #[test]
    fn test_conflict_message() {
        let r = RootRef::for_bytes(b"x");
        let err = StorageError::conflict(None, Some(&r));
        assert_eq!(
            err.to_string(),
            format!("Latest root moved: expected none, found {}", r)
        );
    }
}
