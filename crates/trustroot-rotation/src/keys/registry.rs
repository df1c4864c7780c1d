//! Signing keyring
//!
//! Holds the private keys available to sign root documents on this host.
//! Keys are loaded from seed files: base64 of the 32-byte Ed25519 seed,
//! surrounding whitespace ignored.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};
use trustroot_core::{Key, KeyPair, RoleSpec, Signer, TrustRootError};

/// Errors raised while reading key files
#[derive(Debug, thiserror::Error)]
pub enum KeyFileError {
    #[error("Failed to read key file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Key file {path} is not valid base64: {reason}")]
    Encoding { path: String, reason: String },

    #[error("Key file {path}: {source}")]
    Key {
        path: String,
        #[source]
        source: TrustRootError,
    },

    #[error("Keyring lock poisoned")]
    Poisoned,
}

fn read_base64(path: &Path) -> Result<Vec<u8>, KeyFileError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| KeyFileError::Io {
        path: display.clone(),
        source,
    })?;
    BASE64
        .decode(raw.trim())
        .map_err(|e| KeyFileError::Encoding {
            path: display,
            reason: e.to_string(),
        })
}

/// Read a private key from a seed file
pub fn read_key_pair(path: &Path) -> Result<KeyPair, KeyFileError> {
    let seed = read_base64(path)?;
    KeyPair::from_material(&seed).map_err(|source| KeyFileError::Key {
        path: path.display().to_string(),
        source,
    })
}

/// Read a public key from a file holding its base64 Ed25519 bytes
pub fn read_public_key(path: &Path) -> Result<Key, KeyFileError> {
    let material = read_base64(path)?;
    let bytes: [u8; 32] = material.try_into().map_err(|m: Vec<u8>| KeyFileError::Key {
        path: path.display().to_string(),
        source: TrustRootError::Crypto(format!(
            "Ed25519 public key must be 32 bytes, got {}",
            m.len()
        )),
    })?;
    Ok(Key::ed25519(&bytes))
}

/// Thread-safe set of signing keys, indexed by key ID
#[derive(Debug, Default)]
pub struct SigningKeyring {
    keys: RwLock<HashMap<String, KeyPair>>,
}

impl SigningKeyring {
    /// Create an empty keyring
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a keyring from seed files
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, KeyFileError> {
        let keyring = Self::new();
        for path in paths {
            keyring.load_file(path.as_ref())?;
        }
        Ok(keyring)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, KeyPair>>, KeyFileError> {
        self.keys.read().map_err(|_| KeyFileError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, KeyPair>>, KeyFileError> {
        self.keys.write().map_err(|_| KeyFileError::Poisoned)
    }

    /// Add a key pair, returning its key ID
    pub fn insert(&self, key_pair: KeyPair) -> Result<String, KeyFileError> {
        let key_id = key_pair.key_id().to_string();
        let mut keys = self.write()?;
        if keys.insert(key_id.clone(), key_pair).is_some() {
            warn!(key_id = %key_id, "Replaced signing key already in keyring");
        } else {
            info!(key_id = %key_id, "Added signing key");
        }
        Ok(key_id)
    }

    /// Load a seed file into the keyring, returning its key ID
    pub fn load_file(&self, path: &Path) -> Result<String, KeyFileError> {
        self.insert(read_key_pair(path)?)
    }

    /// Get a key pair by key ID
    pub fn get(&self, key_id: &str) -> Option<KeyPair> {
        self.read().ok()?.get(key_id).cloned()
    }

    /// Check if a key is held
    pub fn contains(&self, key_id: &str) -> bool {
        self.read().map(|k| k.contains_key(key_id)).unwrap_or(false)
    }

    /// Drop a key, returning whether it was held
    pub fn remove(&self, key_id: &str) -> bool {
        let removed = self
            .write()
            .map(|mut k| k.remove(key_id).is_some())
            .unwrap_or(false);
        if removed {
            info!(key_id = %key_id, "Removed signing key");
        }
        removed
    }

    /// List held key IDs, sorted
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .read()
            .map(|k| k.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.read().map(|k| k.len()).unwrap_or(0)
    }

    /// Whether the keyring is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Public halves of every held key
    pub fn public_keys(&self) -> Vec<Key> {
        self.signers().iter().map(KeyPair::public_key).collect()
    }

    /// Every held key pair, sorted by key ID
    pub fn signers(&self) -> Vec<KeyPair> {
        let mut pairs: Vec<KeyPair> = self
            .read()
            .map(|k| k.values().cloned().collect())
            .unwrap_or_default();
        pairs.sort_by(|a, b| a.key_id().cmp(b.key_id()));
        pairs
    }

    /// Held key pairs that belong to `role`
    pub fn signers_for(&self, role: &RoleSpec) -> Vec<KeyPair> {
        self.signers()
            .into_iter()
            .filter(|kp| role.contains(kp.key_id()))
            .collect()
    }
}

/// Borrow key pairs as signer trait objects
pub fn as_signers(pairs: &[KeyPair]) -> Vec<&dyn Signer> {
    pairs.iter().map(|kp| kp as &dyn Signer).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_seed(dir: &TempDir, name: &str, kp: &KeyPair) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("{}\n", BASE64.encode(kp.seed_bytes()))).unwrap();
        path
    }

    #[test]
    fn test_insert_and_lookup() {
        let keyring = SigningKeyring::new();
        let kp = KeyPair::generate();

        let key_id = keyring.insert(kp.clone()).unwrap();

        assert_eq!(key_id, kp.key_id());
        assert!(keyring.contains(&key_id));
        assert_eq!(keyring.get(&key_id).unwrap().key_id(), kp.key_id());
        assert_eq!(keyring.len(), 1);

        assert!(keyring.remove(&key_id));
        assert!(!keyring.remove(&key_id));
        assert!(keyring.is_empty());
    }

    #[test]
    fn test_load_seed_file() {
        let dir = TempDir::new().unwrap();
        let kp = KeyPair::generate();
        let path = write_seed(&dir, "root.key", &kp);

        let keyring = SigningKeyring::from_files(&[path]).unwrap();
        assert_eq!(keyring.key_ids(), vec![kp.key_id().to_string()]);
    }

    #[test]
    fn test_bad_key_files() {
        let dir = TempDir::new().unwrap();
        let keyring = SigningKeyring::new();

        let missing = dir.path().join("missing.key");
        assert!(matches!(
            keyring.load_file(&missing),
            Err(KeyFileError::Io { .. })
        ));

        let garbage = dir.path().join("garbage.key");
        std::fs::write(&garbage, "not base64!").unwrap();
        assert!(matches!(
            keyring.load_file(&garbage),
            Err(KeyFileError::Encoding { .. })
        ));

        let short = dir.path().join("short.key");
        std::fs::write(&short, BASE64.encode([1u8; 16])).unwrap();
        assert!(matches!(
            keyring.load_file(&short),
            Err(KeyFileError::Key { .. })
        ));
    }

    #[test]
    fn test_read_public_key() {
        let dir = TempDir::new().unwrap();
        let kp = KeyPair::generate();
        let path = dir.path().join("policy.pub");
        std::fs::write(&path, BASE64.encode(kp.public_key().public_material())).unwrap();

        let key = read_public_key(&path).unwrap();
        assert_eq!(key.id(), kp.key_id());
    }

    #[test]
    fn test_signers_for_role() {
        let keyring = SigningKeyring::new();
        let member = KeyPair::generate();
        let outsider = KeyPair::generate();
        keyring.insert(member.clone()).unwrap();
        keyring.insert(outsider).unwrap();

        let role = RoleSpec::new([member.key_id()], 1);
        let signers = keyring.signers_for(&role);

        assert_eq!(signers.len(), 1);
        assert_eq!(signers[0].key_id(), member.key_id());
        assert_eq!(as_signers(&signers).len(), 1);
    }
}
