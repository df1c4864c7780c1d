//! Signing primitives for root metadata
//!
//! Signatures are detached Ed25519 signatures over the canonical body of a
//! root document (see [`crate::RootMetadata::canonicalize`]).
//!
//! Key types:
//! - `Signature`: a key ID plus raw signature bytes
//! - `Signer`: the signing capability injected into a rotation
//! - `KeyPair`: in-process Ed25519 signer

use crate::error::{Result, TrustRootError};
use crate::keys::Key;
use crate::types::serde_bytes_base64;
use ed25519_dalek::{Signer as _, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// A signature over a canonical root body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Fingerprint of the key that produced the signature
    pub key_id: String,

    /// Raw signature bytes
    #[serde(with = "serde_bytes_base64")]
    pub value: Vec<u8>,
}

impl Signature {
    /// Create a new signature
    pub fn new(key_id: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key_id: key_id.into(),
            value: value.into(),
        }
    }
}

/// Signing capability
///
/// Implementations may block (hardware tokens, interactive prompts). A
/// failure to sign must be reported as [`TrustRootError::SigningFailed`].
pub trait Signer: Send + Sync {
    /// Fingerprint of the public half of this signer
    fn key_id(&self) -> &str;

    /// Sign `payload`
    fn sign(&self, payload: &[u8]) -> Result<Signature>;
}

/// Ed25519 key pair for signing root metadata
#[derive(Clone)]
pub struct KeyPair {
    /// Fingerprint of the public key
    key_id: String,
    /// Ed25519 signing key (private)
    signing_key: SigningKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_id", &self.key_id)
            .field("signing_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Create a key pair from an existing signing key
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let public = Key::ed25519(&signing_key.verifying_key().to_bytes());
        Self {
            key_id: public.id().to_string(),
            signing_key,
        }
    }

    /// Create a key pair from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    /// Create a key pair from raw key material, which must be a 32-byte seed
    pub fn from_material(material: &[u8]) -> Result<Self> {
        let seed: [u8; 32] = material.try_into().map_err(|_| {
            TrustRootError::Crypto(format!(
                "Ed25519 seed must be 32 bytes, got {}",
                material.len()
            ))
        })?;
        Ok(Self::from_seed(&seed))
    }

    /// Get the public key as a trusted-key entry
    pub fn public_key(&self) -> Key {
        Key::ed25519(&self.signing_key.verifying_key().to_bytes())
    }

    /// Get the raw seed bytes
    pub fn seed_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl Signer for KeyPair {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn sign(&self, payload: &[u8]) -> Result<Signature> {
        let signature = self.signing_key.sign(payload);
        Ok(Signature::new(
            self.key_id.clone(),
            signature.to_bytes().to_vec(),
        ))
    }
}

/// Sign `payload` with raw Ed25519 seed material
///
/// Malformed material is reported as [`TrustRootError::SigningFailed`].
pub fn sign_with_material(payload: &[u8], key_material: &[u8]) -> Result<Signature> {
    let key_pair = KeyPair::from_material(key_material).map_err(|e| {
        TrustRootError::SigningFailed {
            key_id: "<unknown>".into(),
            reason: e.to_string(),
        }
    })?;
    key_pair.sign(payload)
}
