//! Root-of-trust rotation
//!
//! Drives changes to a repository's root of trust: every change loads the
//! latest root, checks it is authorized, applies one mutation, collects
//! signatures and stores the successor with a compare-and-swap on the latest
//! pointer.
//!
//! ## Rotation Invariants
//!
//! 1. **Chain of trust**: each root is signed by a threshold of its
//!    predecessor's root keys as well as its own
//! 2. **Atomicity**: a rotation either stores exactly one new version or
//!    leaves the store untouched
//! 3. **Exclusion**: of two rotations started from the same root, at most one
//!    is stored
//!
//! ## Storage Backends
//!
//! - [`MemoryStore`]: in-process, for tests and embedding
//! - [`FsStore`]: content-addressed files with a lock-file protected pointer
//! - `PostgresStore`: shared database (`postgres` feature)

pub mod config;
pub mod core;
pub mod keys;
pub mod storage;

pub use config::RotationConfig;
pub use core::{
    LoadedRoot, MutatedRoot, RootStateMachine, RotationError, RotationStage, SignedRoot,
    ValidatedRoot,
};
pub use keys::{as_signers, KeyFileError, SigningKeyring};
#[cfg(feature = "postgres")]
pub use storage::PostgresStore;
pub use storage::{FsStore, MemoryStore, RootRef, StorageError, StoredRoot, TrustStore};
