//! Root metadata: the versioned root-of-trust document
//!
//! The document lists every trusted key and, per role, the key IDs allowed
//! to sign for that role together with a signature threshold. The `root`
//! role signs the document itself.
//!
//! ## Invariants
//!
//! 1. **Satisfiable roles**: `1 <= threshold <= |key_ids|` for every role
//! 2. **Closed key set**: every key ID named by a role is present in `keys`
//! 3. **Monotonic versions**: every mutation yields `version + 1` with the
//!    signatures cleared; they must be collected again for the new body
//!
//! Mutations never adjust a threshold implicitly. Removing a key that would
//! break invariant 1 is rejected; lower the threshold in a separate
//! [`PendingMutation::SetThreshold`] first.

use crate::crypto::Signature;
use crate::error::{Result, TrustRootError};
use crate::keys::{fingerprint, Key, KeyRegistry, KeyType};
use crate::types::{serde_timestamp, RoleName, ROOT_ROLE};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Keys and threshold for a single role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleSpec {
    /// Fingerprints of the keys trusted for this role
    pub key_ids: BTreeSet<String>,

    /// Minimum number of distinct valid signatures
    pub threshold: u32,
}

impl RoleSpec {
    /// Create a role spec
    pub fn new<I, S>(key_ids: I, threshold: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_ids: key_ids.into_iter().map(Into::into).collect(),
            threshold,
        }
    }

    /// Check `1 <= threshold <= |key_ids|`
    pub fn is_satisfiable(&self) -> bool {
        self.threshold >= 1 && self.threshold as usize <= self.key_ids.len()
    }

    /// Check if a key is trusted for this role
    pub fn contains(&self, key_id: &str) -> bool {
        self.key_ids.contains(key_id)
    }
}

/// The signed portion of a root document
///
/// Field order here is the canonical field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RootBody {
    version: u64,

    #[serde(with = "serde_timestamp")]
    expires: DateTime<Utc>,

    keys: BTreeMap<String, Key>,

    roles: BTreeMap<RoleName, RoleSpec>,
}

/// A versioned, signed root-of-trust document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootMetadata {
    #[serde(rename = "signed")]
    body: RootBody,

    signatures: Vec<Signature>,
}

/// A single requested change to a root document
///
/// Consumed by exactly one rotation; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingMutation {
    /// Trust `key` for `role`, creating the role with threshold 1 if needed
    AddKey { role: RoleName, key: Key },

    /// Stop trusting `key_id` for `role`
    RemoveKey { role: RoleName, key_id: String },

    /// Change the threshold of an existing role
    SetThreshold { role: RoleName, threshold: u32 },

    /// Change the document expiry
    SetExpires { expires: DateTime<Utc> },
}

impl PendingMutation {
    /// Role touched by this mutation, if any
    pub fn role(&self) -> Option<&str> {
        match self {
            PendingMutation::AddKey { role, .. }
            | PendingMutation::RemoveKey { role, .. }
            | PendingMutation::SetThreshold { role, .. } => Some(role),
            PendingMutation::SetExpires { .. } => None,
        }
    }
}

impl fmt::Display for PendingMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingMutation::AddKey { role, key } => {
                write!(f, "add key {} to role {}", key.id(), role)
            }
            PendingMutation::RemoveKey { role, key_id } => {
                write!(f, "remove key {} from role {}", key_id, role)
            }
            PendingMutation::SetThreshold { role, threshold } => {
                write!(f, "set threshold of role {} to {}", role, threshold)
            }
            PendingMutation::SetExpires { expires } => {
                write!(f, "set expiry to {}", expires.to_rfc3339())
            }
        }
    }
}

impl RootMetadata {
    /// Create a version-1 root trusting `root_keys` for the `root` role
    pub fn initial(root_keys: Vec<Key>, threshold: u32, expires: DateTime<Utc>) -> Result<Self> {
        let key_count = root_keys.len();
        let spec = RoleSpec::new(root_keys.iter().map(|k| k.id().to_string()), threshold);
        if !spec.is_satisfiable() {
            return Err(TrustRootError::ThresholdViolation {
                role: ROOT_ROLE.into(),
                threshold,
                key_count,
            });
        }

        let keys = root_keys
            .into_iter()
            .map(|key| (key.id().to_string(), key.without_tags().tagged(ROOT_ROLE)))
            .collect();

        Ok(Self {
            body: RootBody {
                version: 1,
                expires: expires.trunc_subsecs(0),
                keys,
                roles: BTreeMap::from([(ROOT_ROLE.to_string(), spec)]),
            },
            signatures: Vec::new(),
        })
    }

    /// Get the document version
    pub fn version(&self) -> u64 {
        self.body.version
    }

    /// Get the expiry time
    pub fn expires(&self) -> DateTime<Utc> {
        self.body.expires
    }

    /// Check whether the document has expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.body.expires <= now
    }

    /// Get all trusted keys
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.body.keys.values()
    }

    /// Get all roles
    pub fn roles(&self) -> &BTreeMap<RoleName, RoleSpec> {
        &self.body.roles
    }

    /// Get a single role
    pub fn role(&self, role: &str) -> Option<&RoleSpec> {
        self.body.roles.get(role)
    }

    /// Get the attached signatures
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Build a registry of the keys trusted by this document
    pub fn key_registry(&self) -> KeyRegistry {
        self.body.keys.values().cloned().collect()
    }

    /// Next version of this document with signatures cleared
    fn successor(&self) -> Result<Self> {
        let mut body = self.body.clone();
        body.version = body
            .version
            .checked_add(1)
            .ok_or(TrustRootError::VersionExhausted(body.version))?;
        Ok(Self {
            body,
            signatures: Vec::new(),
        })
    }

    /// Trust `key` for `role`
    pub fn add_key(&self, role: &str, key: Key) -> Result<Self> {
        if self.role(role).is_some_and(|spec| spec.contains(key.id())) {
            return Err(TrustRootError::DuplicateKey {
                role: role.into(),
                key_id: key.id().into(),
            });
        }

        let mut next = self.successor()?;
        let key_id = key.id().to_string();
        let entry = match next.body.keys.remove(&key_id) {
            Some(existing) => existing,
            None => key.without_tags(),
        };
        next.body.keys.insert(key_id.clone(), entry.tagged(role));
        next.body
            .roles
            .entry(role.to_string())
            .or_insert_with(|| RoleSpec::new(Vec::<String>::new(), 1))
            .key_ids
            .insert(key_id);

        Ok(next)
    }

    /// Stop trusting `key_id` for `role`
    ///
    /// Rejected with [`TrustRootError::ThresholdViolation`] if the role would
    /// be left with fewer keys than its threshold.
    pub fn remove_key(&self, role: &str, key_id: &str) -> Result<Self> {
        let not_found = || TrustRootError::KeyNotFound {
            role: role.into(),
            key_id: key_id.into(),
        };
        let spec = self.role(role).ok_or_else(not_found)?;
        if !spec.contains(key_id) {
            return Err(not_found());
        }

        let remaining = spec.key_ids.len() - 1;
        if remaining < spec.threshold as usize {
            return Err(TrustRootError::ThresholdViolation {
                role: role.into(),
                threshold: spec.threshold,
                key_count: remaining,
            });
        }

        let mut next = self.successor()?;
        if let Some(spec) = next.body.roles.get_mut(role) {
            spec.key_ids.remove(key_id);
        }

        let still_referenced = next.body.roles.values().any(|spec| spec.contains(key_id));
        if still_referenced {
            if let Some(key) = next.body.keys.remove(key_id) {
                next.body.keys.insert(key_id.to_string(), key.untagged(role));
            }
        } else {
            next.body.keys.remove(key_id);
        }

        Ok(next)
    }

    /// Change the threshold of an existing role
    pub fn set_threshold(&self, role: &str, threshold: u32) -> Result<Self> {
        let spec = self
            .role(role)
            .ok_or_else(|| TrustRootError::UnknownRole(role.into()))?;
        let key_count = spec.key_ids.len();
        if threshold == 0 || threshold as usize > key_count {
            return Err(TrustRootError::ThresholdViolation {
                role: role.into(),
                threshold,
                key_count,
            });
        }

        let mut next = self.successor()?;
        if let Some(spec) = next.body.roles.get_mut(role) {
            spec.threshold = threshold;
        }
        Ok(next)
    }

    /// Change the document expiry
    pub fn set_expires(&self, expires: DateTime<Utc>) -> Result<Self> {
        let mut next = self.successor()?;
        next.body.expires = expires.trunc_subsecs(0);
        Ok(next)
    }

    /// Apply a single pending mutation
    pub fn apply(&self, mutation: &PendingMutation) -> Result<Self> {
        match mutation {
            PendingMutation::AddKey { role, key } => self.add_key(role, key.clone()),
            PendingMutation::RemoveKey { role, key_id } => self.remove_key(role, key_id),
            PendingMutation::SetThreshold { role, threshold } => {
                self.set_threshold(role, *threshold)
            }
            PendingMutation::SetExpires { expires } => self.set_expires(*expires),
        }
    }

    /// Attach a signature, replacing any earlier signature by the same key
    pub fn with_signature(mut self, signature: Signature) -> Self {
        match self
            .signatures
            .iter_mut()
            .find(|existing| existing.key_id == signature.key_id)
        {
            Some(existing) => *existing = signature,
            None => self.signatures.push(signature),
        }
        self
    }

    /// Canonical bytes of the signed body (signatures excluded)
    ///
    /// Compact JSON with fixed field order, sorted maps and sets, whole-second
    /// RFC 3339 UTC timestamps and base64 key material.
    pub fn canonicalize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.body).map_err(TrustRootError::from)
    }

    /// Serialize the signed envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(TrustRootError::from)
    }

    /// Parse a signed envelope and check the document invariants
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let metadata: Self = serde_json::from_slice(bytes)
            .map_err(|e| TrustRootError::CorruptMetadata(e.to_string()))?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Check the document invariants
    pub fn validate(&self) -> Result<()> {
        let corrupt = |msg: String| Err(TrustRootError::CorruptMetadata(msg));

        if self.body.version == 0 {
            return corrupt("version must start at 1".into());
        }
        if !self.body.roles.contains_key(ROOT_ROLE) {
            return corrupt(format!("missing '{}' role", ROOT_ROLE));
        }
        for (id, key) in &self.body.keys {
            if id != key.id() {
                return corrupt(format!("key entry '{}' holds key '{}'", id, key.id()));
            }
            if KeyRegistry::normalize(id).ok().as_deref() != Some(id.as_str()) {
                return corrupt(format!("key ID '{}' is not a lowercase hex fingerprint", id));
            }
            if key.key_type() == KeyType::Ed25519 && *id != fingerprint(key.public_material()) {
                return corrupt(format!("key ID '{}' does not match its key material", id));
            }
        }
        for (role, spec) in &self.body.roles {
            if !spec.is_satisfiable() {
                return corrupt(format!(
                    "role '{}' has threshold {} with {} key(s)",
                    role,
                    spec.threshold,
                    spec.key_ids.len()
                ));
            }
            if let Some(missing) = spec.key_ids.iter().find(|id| !self.body.keys.contains_key(*id)) {
                return corrupt(format!("role '{}' references unknown key '{}'", role, missing));
            }
        }
        Ok(())
    }
}
