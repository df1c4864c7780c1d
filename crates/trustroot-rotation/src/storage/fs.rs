//! Filesystem storage backend
//!
//! Layout under the store directory:
//!
//! ```text
//! objects/<ref>.json   serialized root, named by its SHA-256
//! objects/<ref>.prev   reference of the root it superseded (absent for v1)
//! latest               reference of the current root
//! latest.lock          present only while a save is in flight
//! ```
//!
//! The latest pointer is swapped the way git updates refs: the new value is
//! written to `latest.lock`, created exclusively, and then renamed over
//! `latest`. A second writer waits briefly for the lock and then sees the
//! moved pointer as a conflict. A lock that outlives the wait was left by a
//! crashed writer and must be removed by hand.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{RootRef, StorageError, StoredRoot, TrustStore};

const OBJECTS_DIR: &str = "objects";
const LATEST_FILE: &str = "latest";
const LOCK_FILE: &str = "latest.lock";
const LOCK_ATTEMPTS: u32 = 40;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(25);

/// Filesystem trust store implementation
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open a store rooted at `root`
    ///
    /// Directories are created lazily on the first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory this store lives in
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, reference: &RootRef) -> PathBuf {
        self.root
            .join(OBJECTS_DIR)
            .join(format!("{}.json", reference))
    }

    fn previous_path(&self, reference: &RootRef) -> PathBuf {
        self.root
            .join(OBJECTS_DIR)
            .join(format!("{}.prev", reference))
    }

    /// Create `latest.lock`, waiting out a concurrent writer
    async fn acquire_lock(&self, lock_path: &Path) -> Result<File, StorageError> {
        for attempt in 1..=LOCK_ATTEMPTS {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(lock_path)
                .await
            {
                Ok(file) => return Ok(file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %lock_path.display(), attempt, "Latest pointer is locked");
                    tokio::time::sleep(LOCK_RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(path = %lock_path.display(), "Latest pointer lock was never released");
        Err(StorageError::Locked(lock_path.display().to_string()))
    }

    async fn read_latest(&self) -> Result<Option<RootRef>, StorageError> {
        match fs::read_to_string(self.root.join(LATEST_FILE)).await {
            Ok(raw) => RootRef::parse(&raw).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_locked(
        &self,
        lock: &mut File,
        expected_prev: Option<&RootRef>,
        bytes: Vec<u8>,
    ) -> Result<RootRef, StorageError> {
        let actual = self.read_latest().await?;
        if actual.as_ref() != expected_prev {
            return Err(StorageError::conflict(expected_prev, actual.as_ref()));
        }

        let reference = RootRef::for_bytes(&bytes);
        fs::write(self.object_path(&reference), &bytes).await?;
        if let Some(previous) = expected_prev {
            fs::write(self.previous_path(&reference), previous.as_str()).await?;
        }

        lock.write_all(reference.as_str().as_bytes()).await?;
        lock.sync_all().await?;
        fs::rename(self.root.join(LOCK_FILE), self.root.join(LATEST_FILE)).await?;

        Ok(reference)
    }
}

#[async_trait]
impl TrustStore for FsStore {
    async fn load(&self, reference: Option<&RootRef>) -> Result<StoredRoot, StorageError> {
        let reference = match reference {
            Some(reference) => reference.clone(),
            None => self
                .read_latest()
                .await?
                .ok_or_else(|| StorageError::NotFound("latest".into()))?,
        };

        let bytes = match fs::read(self.object_path(&reference)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(reference.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let previous = match fs::read_to_string(self.previous_path(&reference)).await {
            Ok(raw) => Some(RootRef::parse(&raw)?),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        debug!(reference = %reference, path = %self.root.display(), "Loaded root from disk");
        Ok(StoredRoot {
            reference,
            bytes,
            previous,
        })
    }

    async fn save(
        &self,
        expected_prev: Option<&RootRef>,
        bytes: Vec<u8>,
    ) -> Result<RootRef, StorageError> {
        fs::create_dir_all(self.root.join(OBJECTS_DIR)).await?;

        let lock_path = self.root.join(LOCK_FILE);
        let mut lock = self.acquire_lock(&lock_path).await?;

        let result = self.save_locked(&mut lock, expected_prev, bytes).await;
        drop(lock);

        match &result {
            Ok(reference) => {
                info!(reference = %reference, path = %self.root.display(), "Stored root on disk")
            }
            Err(_) => {
                if let Err(e) = fs::remove_file(&lock_path).await {
                    if e.kind() != ErrorKind::NotFound {
                        warn!(path = %lock_path.display(), error = %e, "Failed to release lock");
                    }
                }
            }
        }
        result
    }

    async fn latest(&self) -> Result<Option<RootRef>, StorageError> {
        self.read_latest().await
    }
}
