//! In-memory storage backend
//!
//! Default storage implementation using an in-memory hashmap.
//! Suitable for tests and embedding. Data is lost on restart.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use super::{RootRef, StorageError, StoredRoot, TrustStore};

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<RootRef, StoredRoot>,
    latest: Option<RootRef>,
}

/// In-memory trust store implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of root documents held, including superseded ones
    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.objects.len()).unwrap_or(0)
    }

    /// Whether no root has been saved yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StorageError> {
        self.inner
            .read()
            .map_err(|_| StorageError::Io("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StorageError> {
        self.inner
            .write()
            .map_err(|_| StorageError::Io("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl TrustStore for MemoryStore {
    async fn load(&self, reference: Option<&RootRef>) -> Result<StoredRoot, StorageError> {
        let inner = self.read()?;
        let reference = match reference.or(inner.latest.as_ref()) {
            Some(reference) => reference,
            None => return Err(StorageError::NotFound("latest".into())),
        };
        inner
            .objects
            .get(reference)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(reference.to_string()))
    }

    async fn save(
        &self,
        expected_prev: Option<&RootRef>,
        bytes: Vec<u8>,
    ) -> Result<RootRef, StorageError> {
        let mut inner = self.write()?;
        if inner.latest.as_ref() != expected_prev {
            return Err(StorageError::conflict(expected_prev, inner.latest.as_ref()));
        }

        let reference = RootRef::for_bytes(&bytes);
        inner.objects.insert(
            reference.clone(),
            StoredRoot {
                reference: reference.clone(),
                bytes,
                previous: expected_prev.cloned(),
            },
        );
        inner.latest = Some(reference.clone());

        info!(reference = %reference, "Stored root in memory");
        Ok(reference)
    }

    async fn latest(&self) -> Result<Option<RootRef>, StorageError> {
        Ok(self.read()?.latest.clone())
    }
}
