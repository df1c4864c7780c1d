//! Rotation Scenario Tests
//!
//! End-to-end rotations through the state machine over an in-memory store.
//! Every rejected rotation must leave the stored latest root untouched.

use chrono::{Duration, Utc};
use std::sync::Arc;
use trustroot_core::{
    Key, KeyPair, PendingMutation, RootMetadata, Signature, Signer, TrustRootError, ROOT_ROLE,
    TARGETS_ROLE,
};
use trustroot_rotation::{MemoryStore, RootStateMachine, RotationError, TrustStore};

// =============================================================================
// Test Helpers
// =============================================================================

struct Fixture {
    store: Arc<MemoryStore>,
    machine: RootStateMachine,
    root_keys: Vec<KeyPair>,
}

impl Fixture {
    /// Root role of `root_count` keys with `root_threshold`, signed by all
    async fn new(root_count: usize, root_threshold: u32) -> Self {
        let store = Arc::new(MemoryStore::new());
        let machine = RootStateMachine::new(store.clone());
        let root_keys: Vec<KeyPair> = (0..root_count).map(|_| KeyPair::generate()).collect();

        machine
            .initialize(
                root_keys.iter().map(KeyPair::public_key).collect(),
                root_threshold,
                Utc::now() + Duration::days(365),
                &signers(&root_keys),
            )
            .await
            .expect("Failed to initialize root");

        Self {
            store,
            machine,
            root_keys,
        }
    }

    fn all_signers(&self) -> Vec<&dyn Signer> {
        signers(&self.root_keys)
    }

    async fn current(&self) -> RootMetadata {
        self.machine
            .current(true)
            .await
            .expect("Latest root must validate")
            .root()
            .clone()
    }

    async fn latest_ref(&self) -> String {
        self.store.latest().await.unwrap().unwrap().to_string()
    }

    /// Add `keys` to targets, then set its threshold
    async fn with_targets(self, keys: &[&KeyPair], threshold: u32) -> Self {
        for kp in keys {
            self.machine
                .add_policy_key(kp.public_key(), &self.all_signers(), true)
                .await
                .unwrap();
        }
        if threshold != 1 {
            self.machine
                .set_policy_threshold(threshold, &self.all_signers(), true)
                .await
                .unwrap();
        }
        self
    }
}

fn signers(pairs: &[KeyPair]) -> Vec<&dyn Signer> {
    pairs.iter().map(|kp| kp as &dyn Signer).collect()
}

/// Signer whose backing device is unavailable
struct BrokenSigner {
    key_id: String,
}

impl Signer for BrokenSigner {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn sign(&self, _payload: &[u8]) -> trustroot_core::Result<Signature> {
        Err(TrustRootError::SigningFailed {
            key_id: self.key_id.clone(),
            reason: "token not present".into(),
        })
    }
}

// =============================================================================
// Policy key removal
// =============================================================================

/// Targets {K1, K2} with threshold 1; removing K1 leaves {K2} at threshold 1
#[tokio::test]
async fn scenario_remove_policy_key_above_threshold() {
    let k1 = KeyPair::generate();
    let k2 = KeyPair::generate();
    let fx = Fixture::new(1, 1).await.with_targets(&[&k1, &k2], 1).await;
    let before = fx.current().await;

    fx.machine
        .remove_policy_key(k1.key_id(), &fx.all_signers(), true)
        .await
        .unwrap();

    let after = fx.current().await;
    let targets = after.role(TARGETS_ROLE).unwrap();
    assert_eq!(after.version(), before.version() + 1);
    assert_eq!(targets.threshold, 1);
    assert_eq!(
        targets.key_ids.iter().collect::<Vec<_>>(),
        vec![&k2.key_id().to_string()]
    );
    assert!(after.keys().all(|k| k.id() != k1.key_id()));
}

/// Targets {K1, K2} with threshold 2; removing K1 is rejected
#[tokio::test]
async fn scenario_remove_policy_key_at_threshold_rejected() {
    let k1 = KeyPair::generate();
    let k2 = KeyPair::generate();
    let fx = Fixture::new(1, 1).await.with_targets(&[&k1, &k2], 2).await;
    let latest = fx.latest_ref().await;
    let stored = fx.store.len();

    let result = fx
        .machine
        .remove_policy_key(k1.key_id(), &fx.all_signers(), true)
        .await;

    assert!(matches!(
        result,
        Err(RotationError::Metadata(TrustRootError::ThresholdViolation {
            threshold: 2,
            key_count: 1,
            ..
        }))
    ));
    assert_eq!(fx.latest_ref().await, latest);
    assert_eq!(fx.store.len(), stored);
}

/// Lowering the threshold first makes the removal legal
#[tokio::test]
async fn scenario_threshold_change_then_removal() {
    let k1 = KeyPair::generate();
    let k2 = KeyPair::generate();
    let fx = Fixture::new(1, 1).await.with_targets(&[&k1, &k2], 2).await;

    fx.machine
        .set_policy_threshold(1, &fx.all_signers(), true)
        .await
        .unwrap();
    fx.machine
        .remove_policy_key(k1.key_id(), &fx.all_signers(), true)
        .await
        .unwrap();

    let targets = fx.current().await.role(TARGETS_ROLE).unwrap().clone();
    assert_eq!(targets.threshold, 1);
    assert!(targets.contains(k2.key_id()));
    assert!(!targets.contains(k1.key_id()));
}

#[tokio::test]
async fn scenario_remove_unknown_policy_key() {
    let k1 = KeyPair::generate();
    let stranger = KeyPair::generate();
    let fx = Fixture::new(1, 1).await.with_targets(&[&k1], 1).await;

    let result = fx
        .machine
        .remove_policy_key(stranger.key_id(), &fx.all_signers(), true)
        .await;

    assert!(matches!(
        result,
        Err(RotationError::Metadata(TrustRootError::KeyNotFound { .. }))
    ));
}

// =============================================================================
// Policy key addition
// =============================================================================

#[tokio::test]
async fn scenario_duplicate_policy_key_rejected() {
    let k1 = KeyPair::generate();
    let fx = Fixture::new(1, 1).await.with_targets(&[&k1], 1).await;
    let latest = fx.latest_ref().await;

    let result = fx
        .machine
        .add_policy_key(k1.public_key(), &fx.all_signers(), true)
        .await;

    assert!(matches!(
        result,
        Err(RotationError::Metadata(TrustRootError::DuplicateKey { .. }))
    ));
    assert_eq!(fx.latest_ref().await, latest);
}

#[tokio::test]
async fn scenario_unsupported_key_type_can_be_trusted() {
    let fx = Fixture::new(1, 1).await;
    let gpg = Key::new(trustroot_core::KeyType::Gpg, vec![0x99; 64]);

    fx.machine
        .add_policy_key(gpg.clone(), &fx.all_signers(), true)
        .await
        .unwrap();

    assert!(fx.current().await.role(TARGETS_ROLE).unwrap().contains(gpg.id()));
}

// =============================================================================
// Signing
// =============================================================================

/// Root threshold 2 of {R1, R2}; a rotation signed by R1 alone is not stored
#[tokio::test]
async fn scenario_insufficient_root_signatures() {
    let fx = Fixture::new(2, 2).await;
    let latest = fx.latest_ref().await;
    let policy = KeyPair::generate();

    let result = fx
        .machine
        .add_policy_key(policy.public_key(), &[&fx.root_keys[0]], true)
        .await;

    assert!(matches!(
        result,
        Err(RotationError::InsufficientSignatures {
            valid: 1,
            required: 2,
            ..
        })
    ));
    assert_eq!(fx.latest_ref().await, latest);
    assert_eq!(fx.store.len(), 1);
}

#[tokio::test]
async fn scenario_signer_failure_aborts_rotation() {
    let fx = Fixture::new(2, 1).await;
    let broken = BrokenSigner {
        key_id: fx.root_keys[1].key_id().to_string(),
    };
    let policy = KeyPair::generate();

    let result = fx
        .machine
        .add_policy_key(policy.public_key(), &[&fx.root_keys[0], &broken], true)
        .await;

    assert!(matches!(
        result,
        Err(RotationError::Metadata(TrustRootError::SigningFailed { .. }))
    ));
    assert_eq!(result.unwrap_err().exit_code(), 8);
    assert_eq!(fx.store.len(), 1);
}

/// Root keys can be replaced one rotation at a time while trust carries over
#[tokio::test]
async fn scenario_root_key_replacement() {
    let fx = Fixture::new(1, 1).await;
    let old = &fx.root_keys[0];
    let new = KeyPair::generate();

    fx.machine
        .rotate(
            PendingMutation::AddKey {
                role: ROOT_ROLE.into(),
                key: new.public_key(),
            },
            &[old],
            true,
        )
        .await
        .unwrap();

    // The old key still authorizes its own removal under the previous root.
    fx.machine
        .rotate(
            PendingMutation::RemoveKey {
                role: ROOT_ROLE.into(),
                key_id: old.key_id().to_string(),
            },
            &[old, &new],
            true,
        )
        .await
        .unwrap();

    let current = fx.current().await;
    let root_role = current.role(ROOT_ROLE).unwrap();
    assert!(root_role.contains(new.key_id()));
    assert!(!root_role.contains(old.key_id()));

    // From here on the old key alone signs nothing.
    let result = fx
        .machine
        .add_policy_key(KeyPair::generate().public_key(), &[old], true)
        .await;
    assert!(matches!(
        result,
        Err(RotationError::InsufficientSignatures { .. })
    ));

    let history = fx.machine.history().await.unwrap();
    assert_eq!(history.len(), 3);
}

// =============================================================================
// Expiry
// =============================================================================

#[tokio::test]
async fn scenario_expired_root_is_still_rotatable() {
    let fx = Fixture::new(1, 1).await;
    let past = Utc::now() - Duration::days(1);

    fx.machine
        .rotate(
            PendingMutation::SetExpires { expires: past },
            &fx.all_signers(),
            true,
        )
        .await
        .unwrap();
    assert!(fx.current().await.is_expired(Utc::now()));

    let future = Utc::now() + Duration::days(30);
    fx.machine
        .rotate(
            PendingMutation::SetExpires { expires: future },
            &fx.all_signers(),
            true,
        )
        .await
        .unwrap();

    let current = fx.current().await;
    assert!(!current.is_expired(Utc::now()));
    assert_eq!(current.version(), 3);
}
