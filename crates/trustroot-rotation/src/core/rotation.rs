//! Root rotation state machine
//!
//! A rotation walks through five stages, each a distinct type so a stage can
//! only be reached from the one before it:
//!
//! ```text
//! LoadedRoot --validate--> ValidatedRoot --mutate--> MutatedRoot
//!            --sign--> SignedRoot --persist--> RootRef
//! ```
//!
//! Nothing is written until [`SignedRoot::persist`], and that write is a
//! compare-and-swap against the root loaded in the first stage. Dropping the
//! rotation future at any earlier point abandons it with no side effects.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trustroot_core::{
    Key, KeyRegistry, PendingMutation, RootMetadata, Signer, TrustRootError, TARGETS_ROLE,
};

use super::error::RotationError;
use super::validation::{validate_chain, validate_self, validate_successor};
use crate::storage::{RootRef, StorageError, StoredRoot, TrustStore};

/// Stage a rotation reached, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStage {
    Loaded,
    Validated,
    Mutated,
    Signed,
    Persisted,
}

impl fmt::Display for RotationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RotationStage::Loaded => "loaded",
            RotationStage::Validated => "validated",
            RotationStage::Mutated => "mutated",
            RotationStage::Signed => "signed",
            RotationStage::Persisted => "persisted",
        };
        f.write_str(name)
    }
}

fn parse_stored(stored: &StoredRoot) -> Result<RootMetadata, RotationError> {
    let corrupt = |reason: String| RotationError::CorruptMetadata {
        reference: stored.reference.to_string(),
        reason,
    };

    if RootRef::for_bytes(&stored.bytes) != stored.reference {
        warn!(reference = %stored.reference, "SECURITY: Stored root does not match its hash");
        return Err(corrupt("content does not match reference".into()));
    }

    RootMetadata::from_bytes(&stored.bytes).map_err(|e| match e {
        TrustRootError::CorruptMetadata(reason) => corrupt(reason),
        other => corrupt(other.to_string()),
    })
}

fn load_error(err: StorageError) -> RotationError {
    match err {
        StorageError::NotFound(_) => RotationError::RootNotFound,
        other => other.into(),
    }
}

/// Verify every link from `stored` back to version 1
///
/// `root` is the parsed form of `stored` and must already satisfy its own
/// root role. Returned newest first.
async fn walk_chain(
    store: &dyn TrustStore,
    mut stored: StoredRoot,
    mut root: RootMetadata,
) -> Result<Vec<(RootRef, RootMetadata)>, RotationError> {
    let mut chain = Vec::new();
    loop {
        let previous_ref = match stored.previous.clone() {
            Some(previous_ref) => previous_ref,
            None => {
                if root.version() != 1 {
                    warn!(
                        version = root.version(),
                        "SECURITY: Root chain ends before version 1"
                    );
                    return Err(RotationError::BrokenChain {
                        version: root.version(),
                        previous_version: 0,
                    });
                }
                chain.push((stored.reference, root));
                return Ok(chain);
            }
        };

        let previous_stored = store.load(Some(&previous_ref)).await?;
        let previous = parse_stored(&previous_stored)?;
        validate_self(&previous)?;
        validate_chain(&previous, &root)?;

        chain.push((stored.reference, root));
        stored = previous_stored;
        root = previous;
    }
}

fn sign_document(
    root: RootMetadata,
    signers: &[&dyn Signer],
) -> Result<RootMetadata, RotationError> {
    let payload = root.canonicalize()?;
    let mut signed = root;
    for signer in signers {
        let signature = signer.sign(&payload)?;
        debug!(key_id = %signature.key_id, version = signed.version(), "Signed root");
        signed = signed.with_signature(signature);
    }
    Ok(signed)
}

/// Latest root as read from the store, not yet trusted
#[derive(Debug)]
pub struct LoadedRoot {
    stored: StoredRoot,
    root: RootMetadata,
}

impl LoadedRoot {
    /// Load and parse the latest root
    pub async fn load(store: &dyn TrustStore) -> Result<Self, RotationError> {
        let stored = store.load(None).await.map_err(load_error)?;
        let root = parse_stored(&stored)?;

        debug!(
            reference = %stored.reference,
            version = root.version(),
            stage = %RotationStage::Loaded,
            "Loaded latest root"
        );
        Ok(Self { stored, root })
    }

    /// Reference the root was loaded from
    pub fn reference(&self) -> &RootRef {
        &self.stored.reference
    }

    /// Parsed root document
    pub fn root(&self) -> &RootMetadata {
        &self.root
    }

    /// Check self-consistency and, with `require_chain`, every link back to
    /// version 1
    ///
    /// Only a version-1 root may lack a predecessor.
    pub async fn validate(
        self,
        store: &dyn TrustStore,
        require_chain: bool,
    ) -> Result<ValidatedRoot, RotationError> {
        validate_self(&self.root)?;

        if require_chain {
            let chain = walk_chain(store, self.stored.clone(), self.root.clone()).await?;
            debug!(length = chain.len(), "Root chain verified");
        }

        if self.root.is_expired(Utc::now()) {
            warn!(
                version = self.root.version(),
                expires = %self.root.expires(),
                "Root of trust has expired; rotate to extend it"
            );
        }

        debug!(
            reference = %self.stored.reference,
            version = self.root.version(),
            stage = %RotationStage::Validated,
            "Root validated"
        );
        Ok(ValidatedRoot {
            reference: self.stored.reference,
            root: self.root,
        })
    }
}

/// Root that passed authorization checks
#[derive(Debug, Clone)]
pub struct ValidatedRoot {
    reference: RootRef,
    root: RootMetadata,
}

impl ValidatedRoot {
    /// Reference of the validated root
    pub fn reference(&self) -> &RootRef {
        &self.reference
    }

    /// The validated root document
    pub fn root(&self) -> &RootMetadata {
        &self.root
    }

    /// Give up the reference and document
    pub fn into_parts(self) -> (RootRef, RootMetadata) {
        (self.reference, self.root)
    }

    /// Apply `mutation` to an in-memory copy
    pub fn mutate(self, mutation: &PendingMutation) -> Result<MutatedRoot, RotationError> {
        let next = self.root.apply(mutation)?;

        debug!(
            version = next.version(),
            mutation = %mutation,
            stage = %RotationStage::Mutated,
            "Mutation applied"
        );
        Ok(MutatedRoot {
            base: Some(self),
            next,
        })
    }
}

/// Unsigned successor document
#[derive(Debug)]
pub struct MutatedRoot {
    base: Option<ValidatedRoot>,
    next: RootMetadata,
}

impl MutatedRoot {
    /// The unsigned successor
    pub fn root(&self) -> &RootMetadata {
        &self.next
    }

    /// Sign the successor with every signer and check the result is
    /// authorized by both the successor's and the current root role
    pub fn sign(self, signers: &[&dyn Signer]) -> Result<SignedRoot, RotationError> {
        let next = sign_document(self.next, signers)?;
        validate_successor(self.base.as_ref().map(|b| b.root()), &next)?;

        debug!(
            version = next.version(),
            signatures = next.signatures().len(),
            stage = %RotationStage::Signed,
            "Successor signed"
        );
        Ok(SignedRoot {
            expected_prev: self.base.map(|b| b.reference),
            next,
        })
    }
}

/// Signed successor ready to be stored
#[derive(Debug)]
pub struct SignedRoot {
    expected_prev: Option<RootRef>,
    next: RootMetadata,
}

impl SignedRoot {
    /// The signed successor
    pub fn root(&self) -> &RootMetadata {
        &self.next
    }

    /// Store the successor if the latest root is still the one this rotation
    /// started from
    pub async fn persist(self, store: &dyn TrustStore) -> Result<RootRef, RotationError> {
        let bytes = self.next.to_bytes()?;
        let reference = store
            .save(self.expected_prev.as_ref(), bytes)
            .await
            .map_err(|e| {
                if matches!(e, StorageError::Conflict { .. }) {
                    warn!(
                        version = self.next.version(),
                        error = %e,
                        "Latest root changed during rotation"
                    );
                }
                RotationError::from(e)
            })?;

        info!(
            reference = %reference,
            version = self.next.version(),
            stage = %RotationStage::Persisted,
            "Root rotated"
        );
        Ok(reference)
    }
}

/// Drives rotations of the root of trust held by a [`TrustStore`]
#[derive(Debug, Clone)]
pub struct RootStateMachine {
    store: Arc<dyn TrustStore>,
}

impl RootStateMachine {
    /// Create a state machine over `store`
    pub fn new(store: Arc<dyn TrustStore>) -> Self {
        Self { store }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn TrustStore> {
        &self.store
    }

    /// Create and store version 1 of the root
    ///
    /// `root_keys` become the root role; `signers` must meet `threshold`.
    pub async fn initialize(
        &self,
        root_keys: Vec<Key>,
        threshold: u32,
        expires: DateTime<Utc>,
        signers: &[&dyn Signer],
    ) -> Result<RootRef, RotationError> {
        if let Some(existing) = self.store.latest().await? {
            return Err(RotationError::RootAlreadyInitialized(existing.to_string()));
        }

        let first = RootMetadata::initial(root_keys, threshold, expires)?;
        let signed = MutatedRoot {
            base: None,
            next: first,
        }
        .sign(signers)?;

        signed.persist(self.store.as_ref()).await.map_err(|e| match e {
            RotationError::ConcurrentModification { actual, .. } => {
                RotationError::RootAlreadyInitialized(actual)
            }
            other => other,
        })
    }

    /// Load and validate the latest root without changing it
    pub async fn current(&self, require_chain: bool) -> Result<ValidatedRoot, RotationError> {
        LoadedRoot::load(self.store.as_ref())
            .await?
            .validate(self.store.as_ref(), require_chain)
            .await
    }

    /// Apply `mutation` to the latest root, sign it and store it
    ///
    /// Either a new root is stored and its reference returned, or nothing is
    /// stored and the error names the stage that failed.
    pub async fn rotate(
        &self,
        mutation: PendingMutation,
        signers: &[&dyn Signer],
        require_chain: bool,
    ) -> Result<RootRef, RotationError> {
        let store = self.store.as_ref();
        let mut reached = None;

        let result = async {
            let loaded = LoadedRoot::load(store).await?;
            reached = Some(RotationStage::Loaded);
            let validated = loaded.validate(store, require_chain).await?;
            reached = Some(RotationStage::Validated);
            let mutated = validated.mutate(&mutation)?;
            reached = Some(RotationStage::Mutated);
            let signed = mutated.sign(signers)?;
            reached = Some(RotationStage::Signed);
            signed.persist(store).await
        }
        .await;

        if let Err(e) = &result {
            warn!(
                mutation = %mutation,
                reached = ?reached,
                error = %e,
                "Rotation aborted"
            );
        }
        result
    }

    /// Trust `key` for the targets role
    pub async fn add_policy_key(
        &self,
        key: Key,
        signers: &[&dyn Signer],
        require_chain: bool,
    ) -> Result<RootRef, RotationError> {
        let mutation = PendingMutation::AddKey {
            role: TARGETS_ROLE.into(),
            key,
        };
        self.rotate(mutation, signers, require_chain).await
    }

    /// Stop trusting the targets key with the given ID
    ///
    /// `raw_key_id` is trimmed and lower-cased before lookup.
    pub async fn remove_policy_key(
        &self,
        raw_key_id: &str,
        signers: &[&dyn Signer],
        require_chain: bool,
    ) -> Result<RootRef, RotationError> {
        let mutation = PendingMutation::RemoveKey {
            role: TARGETS_ROLE.into(),
            key_id: KeyRegistry::normalize(raw_key_id)?,
        };
        self.rotate(mutation, signers, require_chain).await
    }

    /// Change the number of targets signatures required
    pub async fn set_policy_threshold(
        &self,
        threshold: u32,
        signers: &[&dyn Signer],
        require_chain: bool,
    ) -> Result<RootRef, RotationError> {
        let mutation = PendingMutation::SetThreshold {
            role: TARGETS_ROLE.into(),
            threshold,
        };
        self.rotate(mutation, signers, require_chain).await
    }

    /// Walk the chain from the latest root back to version 1
    ///
    /// Every root must satisfy its own root role and its predecessor's.
    /// Returned newest first.
    pub async fn history(&self) -> Result<Vec<(RootRef, RootMetadata)>, RotationError> {
        let store = self.store.as_ref();
        let stored = store.load(None).await.map_err(load_error)?;
        let root = parse_stored(&stored)?;
        validate_self(&root)?;

        let chain = walk_chain(store, stored, root).await?;
        info!(length = chain.len(), "Root chain verified");
        Ok(chain)
    }
}
