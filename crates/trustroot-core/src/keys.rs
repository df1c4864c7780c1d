//! Trusted keys and the key registry
//!
//! A [`Key`] is an immutable public key identified by its lowercase hex
//! fingerprint. Keys compare equal when their IDs match, whatever their role
//! tags. The [`KeyRegistry`] is a plain lookup table used by signature
//! verification to turn a signature's `key_id` into public material.

use crate::error::{Result, TrustRootError};
use crate::types::{serde_bytes_base64, RoleName};
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Fingerprint lengths accepted by [`KeyRegistry::normalize`]: SHA-1 / GPG
/// fingerprints and SHA-256 digests, hex encoded.
const KEY_ID_HEX_LENGTHS: [usize; 2] = [40, 64];

/// Signature algorithm family of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Ed25519 (RFC 8032)
    Ed25519,
    /// RSA (PKCS#1 / PSS)
    Rsa,
    /// ECDSA over a NIST curve
    Ecdsa,
    /// OpenPGP key
    Gpg,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Ed25519 => write!(f, "ed25519"),
            KeyType::Rsa => write!(f, "rsa"),
            KeyType::Ecdsa => write!(f, "ecdsa"),
            KeyType::Gpg => write!(f, "gpg"),
        }
    }
}

/// A public key trusted by the root document
#[derive(Clone, Serialize, Deserialize)]
pub struct Key {
    /// Lowercase hex fingerprint
    id: String,

    /// Algorithm family
    key_type: KeyType,

    /// Raw public key bytes
    #[serde(with = "serde_bytes_base64")]
    public_material: Vec<u8>,

    /// Roles this key is trusted for
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    role_tags: BTreeSet<RoleName>,
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("key_type", &self.key_type)
            .field("role_tags", &self.role_tags)
            .finish()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Key {
    /// Build a key whose ID is the SHA-256 fingerprint of its public material
    pub fn new(key_type: KeyType, public_material: impl Into<Vec<u8>>) -> Self {
        let public_material = public_material.into();
        Self {
            id: fingerprint(&public_material),
            key_type,
            public_material,
            role_tags: BTreeSet::new(),
        }
    }

    /// Build a key with an externally assigned fingerprint (e.g. a GPG key)
    pub fn with_id(
        id: &str,
        key_type: KeyType,
        public_material: impl Into<Vec<u8>>,
    ) -> Result<Self> {
        Ok(Self {
            id: KeyRegistry::normalize(id)?,
            key_type,
            public_material: public_material.into(),
            role_tags: BTreeSet::new(),
        })
    }

    /// Build an Ed25519 key from its 32 public bytes
    pub fn ed25519(public_key: &[u8; 32]) -> Self {
        Self::new(KeyType::Ed25519, public_key.to_vec())
    }

    /// Return a copy tagged with an additional role
    pub fn tagged(mut self, role: impl Into<RoleName>) -> Self {
        self.role_tags.insert(role.into());
        self
    }

    /// Return a copy without the given role tag
    pub(crate) fn untagged(mut self, role: &str) -> Self {
        self.role_tags.remove(role);
        self
    }

    /// Return a copy with no role tags
    pub(crate) fn without_tags(mut self) -> Self {
        self.role_tags.clear();
        self
    }

    /// Get the key fingerprint
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the key algorithm family
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Get the raw public key bytes
    pub fn public_material(&self) -> &[u8] {
        &self.public_material
    }

    /// Get the roles this key is tagged with
    pub fn role_tags(&self) -> &BTreeSet<RoleName> {
        &self.role_tags
    }

    /// Check a signature over `payload`
    ///
    /// Returns `Ok(false)` for a well-formed key whose signature does not
    /// verify, and an error when the key itself cannot be used.
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<bool> {
        match self.key_type {
            KeyType::Ed25519 => {
                let key_bytes: [u8; 32] =
                    self.public_material.as_slice().try_into().map_err(|_| {
                        TrustRootError::Crypto(format!(
                            "Ed25519 key '{}' has {} bytes, expected 32",
                            self.id,
                            self.public_material.len()
                        ))
                    })?;
                let verifying_key = VerifyingKey::from_bytes(&key_bytes)?;

                let Ok(signature_bytes) = <[u8; 64]>::try_from(signature) else {
                    return Ok(false);
                };
                let signature = Ed25519Signature::from_bytes(&signature_bytes);
                Ok(verifying_key.verify(payload, &signature).is_ok())
            }
            KeyType::Rsa | KeyType::Ecdsa | KeyType::Gpg => {
                Err(TrustRootError::UnsupportedKeyType(self.key_type.to_string()))
            }
        }
    }
}

/// Lowercase hex SHA-256 of `material`
pub fn fingerprint(material: &[u8]) -> String {
    hex::encode(Sha256::digest(material))
}

/// Lookup table from key ID to [`Key`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRegistry {
    keys: BTreeMap<String, Key>,
}

impl KeyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize a user-supplied key ID
    ///
    /// Surrounding whitespace is trimmed and hex digits are lower-cased. The
    /// result must be 40 or 64 hex characters.
    pub fn normalize(raw: &str) -> Result<String> {
        let id = raw.trim().to_ascii_lowercase();
        let well_formed = KEY_ID_HEX_LENGTHS.contains(&id.len())
            && id.bytes().all(|b| b.is_ascii_hexdigit());
        if well_formed {
            Ok(id)
        } else {
            Err(TrustRootError::InvalidKeyId(raw.to_string()))
        }
    }

    /// Add a key, replacing any key with the same ID
    pub fn insert(&mut self, key: Key) {
        self.keys.insert(key.id.clone(), key);
    }

    /// Look up a key by ID
    pub fn resolve(&self, id: &str) -> Result<&Key> {
        self.keys
            .get(id)
            .ok_or_else(|| TrustRootError::UnknownKey(id.to_string()))
    }

    /// Check if a key is registered
    pub fn contains(&self, id: &str) -> bool {
        self.keys.contains_key(id)
    }

    /// Get the number of registered keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate over registered keys in ID order
    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.keys.values()
    }
}

impl FromIterator<Key> for KeyRegistry {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        let mut registry = Self::new();
        for key in iter {
            registry.insert(key);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::Signer;

    #[test]
    fn test_normalize_lowercases_and_trims() {
        let raw = format!("  {}  ", "AB".repeat(20));
        assert_eq!(KeyRegistry::normalize(&raw).unwrap(), "ab".repeat(20));
    }

    #[test]
    fn test_normalize_rejects_malformed_ids() {
        let malformed = [
            String::new(),
            "xyz".to_string(),
            "a".repeat(39),
            "g".repeat(64),
            "a".repeat(65),
        ];
        for raw in &malformed {
            assert!(
                matches!(KeyRegistry::normalize(raw), Err(TrustRootError::InvalidKeyId(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn test_key_id_is_sha256_fingerprint() {
        let key = Key::new(KeyType::Ed25519, vec![7u8; 32]);
        assert_eq!(key.id().len(), 64);
        assert_eq!(KeyRegistry::normalize(key.id()).unwrap(), key.id());
    }

    #[test]
    fn test_equality_ignores_role_tags() {
        let key = Key::new(KeyType::Ed25519, vec![1u8; 32]);
        let tagged = key.clone().tagged("targets");
        assert_eq!(key, tagged);
        assert!(tagged.role_tags().contains("targets"));
    }

    #[test]
    fn test_registry_resolve() {
        let key = Key::new(KeyType::Ed25519, vec![2u8; 32]);
        let registry: KeyRegistry = [key.clone()].into_iter().collect();

        assert_eq!(registry.resolve(key.id()).unwrap(), &key);
        assert!(matches!(
            registry.resolve(&"0".repeat(64)),
            Err(TrustRootError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_ed25519_verify() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"payload").unwrap();

        let key = kp.public_key();
        assert!(key.verify(b"payload", &sig.value).unwrap());
        assert!(!key.verify(b"other payload", &sig.value).unwrap());
        assert!(!key.verify(b"payload", &sig.value[..10]).unwrap());
    }

    #[test]
    fn test_unsupported_key_type() {
        let key = Key::new(KeyType::Rsa, vec![0u8; 256]);
        assert!(matches!(
            key.verify(b"payload", &[0u8; 256]),
            Err(TrustRootError::UnsupportedKeyType(_))
        ));
    }
}
