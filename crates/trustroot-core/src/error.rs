//! Error types for root-of-trust metadata

use thiserror::Error;

/// Result type alias using TrustRootError
pub type Result<T> = std::result::Result<T, TrustRootError>;

/// Errors raised while building, mutating, signing or verifying root metadata
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrustRootError {
    /// Input is not a well-formed hex fingerprint
    #[error("Invalid key ID '{0}': expected 40 or 64 hex characters")]
    InvalidKeyId(String),

    /// Key is not present in the role (or in the registry)
    #[error("Key '{key_id}' not found in role '{role}'")]
    KeyNotFound { role: String, key_id: String },

    /// Key ID is not present in the key registry
    #[error("Unknown key '{0}'")]
    UnknownKey(String),

    /// Key is already trusted for the role
    #[error("Key '{key_id}' is already trusted for role '{role}'")]
    DuplicateKey { role: String, key_id: String },

    /// Role does not exist in the root document
    #[error("Unknown role '{0}'")]
    UnknownRole(String),

    /// Mutation would leave `threshold > |key_ids|` (or a zero threshold)
    #[error(
        "Threshold violation for role '{role}': threshold {threshold} with {key_count} trusted key(s)"
    )]
    ThresholdViolation {
        role: String,
        threshold: u32,
        key_count: usize,
    },

    /// Stored root could not be parsed or breaks a document invariant
    #[error("Corrupt root metadata: {0}")]
    CorruptMetadata(String),

    /// Signing collaborator failed to produce a signature
    #[error("Signing with key '{key_id}' failed: {reason}")]
    SigningFailed { key_id: String, reason: String },

    /// Version counter cannot be advanced any further
    #[error("Root version {0} cannot be incremented")]
    VersionExhausted(u64),

    /// Key type has no verifier in this build
    #[error("Unsupported key type '{0}'")]
    UnsupportedKeyType(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cryptographic error
    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

impl From<ed25519_dalek::SignatureError> for TrustRootError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        TrustRootError::Crypto(err.to_string())
    }
}

impl From<serde_json::Error> for TrustRootError {
    fn from(err: serde_json::Error) -> Self {
        TrustRootError::Serialization(err.to_string())
    }
}
