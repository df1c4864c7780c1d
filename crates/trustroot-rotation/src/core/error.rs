//! Error taxonomy for root rotation

use crate::storage::StorageError;
use thiserror::Error;
use trustroot_core::TrustRootError;

/// Errors returned by the rotation state machine
///
/// A rotation that fails at any stage leaves the stored latest root untouched.
#[derive(Error, Debug)]
pub enum RotationError {
    #[error("No root of trust has been initialized")]
    RootNotFound,

    #[error("Root of trust already initialized at {0}")]
    RootAlreadyInitialized(String),

    #[error("Corrupt root metadata at {reference}: {reason}")]
    CorruptMetadata { reference: String, reason: String },

    #[error(
        "Root v{version} is not authorized by v{authority_version}: \
         {valid} of {required} '{role}' signatures valid"
    )]
    UnauthorizedRoot {
        version: u64,
        authority_version: u64,
        role: String,
        valid: usize,
        required: u32,
    },

    #[error("Root chain broken: v{version} follows v{previous_version}")]
    BrokenChain { version: u64, previous_version: u64 },

    #[error(
        "Insufficient signatures for root v{version} under v{authority_version}: \
         {valid} of {required} '{role}' signatures"
    )]
    InsufficientSignatures {
        version: u64,
        authority_version: u64,
        role: String,
        valid: usize,
        required: u32,
    },

    #[error("Concurrent modification: latest root was {actual}, expected {expected}")]
    ConcurrentModification { expected: String, actual: String },

    #[error(transparent)]
    Metadata(#[from] TrustRootError),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for RotationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { expected, actual } => {
                RotationError::ConcurrentModification { expected, actual }
            }
            other => RotationError::Storage(other),
        }
    }
}

impl RotationError {
    /// Whether the stored roots failed an authorization check
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            RotationError::UnauthorizedRoot { .. } | RotationError::BrokenChain { .. }
        )
    }

    /// Whether retrying from a fresh load may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, RotationError::ConcurrentModification { .. })
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> u8 {
        match self {
            RotationError::Storage(_) => 1,
            RotationError::CorruptMetadata { .. } => 2,
            RotationError::UnauthorizedRoot { .. } | RotationError::BrokenChain { .. } => 3,
            RotationError::Metadata(e) => match e {
                TrustRootError::ThresholdViolation { .. } => 5,
                TrustRootError::SigningFailed { .. } => 8,
                TrustRootError::CorruptMetadata(_) => 2,
                _ => 4,
            },
            RotationError::InsufficientSignatures { .. } => 6,
            RotationError::ConcurrentModification { .. } => 7,
            RotationError::RootNotFound | RotationError::RootAlreadyInitialized(_) => 9,
        }
    }
}
