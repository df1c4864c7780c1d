//! Threshold signature verification
//!
//! Counts the distinct keys of a role that produced a valid signature over a
//! payload. Signatures from keys outside the role, unresolvable keys and key
//! types without a verifier are skipped rather than treated as errors.

use crate::crypto::Signature;
use crate::error::{Result, TrustRootError};
use crate::keys::KeyRegistry;
use crate::metadata::{RoleSpec, RootMetadata};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Outcome of checking signatures against a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdVerification {
    /// `|valid_signers| >= threshold`
    pub authorized: bool,

    /// Distinct key IDs with a valid signature
    pub valid_signers: BTreeSet<String>,

    /// Threshold the signatures were checked against
    pub threshold: u32,
}

impl ThresholdVerification {
    /// Number of distinct valid signers
    pub fn valid_count(&self) -> usize {
        self.valid_signers.len()
    }
}

/// Check `signatures` over `payload` against `role_spec`
///
/// Each key counts once, however many signatures it contributed.
pub fn verify_threshold(
    payload: &[u8],
    signatures: &[Signature],
    role_spec: &RoleSpec,
    registry: &KeyRegistry,
) -> ThresholdVerification {
    let mut valid_signers = BTreeSet::new();

    for signature in signatures {
        if !role_spec.contains(&signature.key_id) {
            debug!(key_id = %signature.key_id, "Ignoring signature from key outside role");
            continue;
        }
        if valid_signers.contains(&signature.key_id) {
            continue;
        }

        let key = match registry.resolve(&signature.key_id) {
            Ok(key) => key,
            Err(_) => {
                debug!(key_id = %signature.key_id, "Ignoring signature from unknown key");
                continue;
            }
        };

        match key.verify(payload, &signature.value) {
            Ok(true) => {
                valid_signers.insert(signature.key_id.clone());
            }
            Ok(false) => {
                debug!(key_id = %signature.key_id, "Signature does not verify");
            }
            Err(e) => {
                warn!(
                    key_id = %signature.key_id,
                    key_type = %key.key_type(),
                    error = %e,
                    "Skipping signature from unusable key"
                );
            }
        }
    }

    let authorized = valid_signers.len() >= role_spec.threshold as usize;
    debug!(
        valid = valid_signers.len(),
        required = role_spec.threshold,
        authorized,
        "Threshold verification complete"
    );

    ThresholdVerification {
        authorized,
        valid_signers,
        threshold: role_spec.threshold,
    }
}

impl RootMetadata {
    /// Check this document's signatures against `role` as defined by `authority`
    ///
    /// Passing `self` as the authority checks self-consistency; passing the
    /// previous root checks chain-of-trust continuity.
    pub fn verify_role(&self, role: &str, authority: &RootMetadata) -> Result<ThresholdVerification> {
        let role_spec = authority
            .role(role)
            .ok_or_else(|| TrustRootError::UnknownRole(role.into()))?;
        let payload = self.canonicalize()?;

        Ok(verify_threshold(
            &payload,
            self.signatures(),
            role_spec,
            &authority.key_registry(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, Signer};
    use crate::keys::{Key, KeyType};
    use crate::types::{ROOT_ROLE, TARGETS_ROLE};
    use chrono::{TimeZone, Utc};

    fn setup(n: usize) -> (Vec<KeyPair>, KeyRegistry) {
        let pairs: Vec<KeyPair> = (0..n).map(|_| KeyPair::generate()).collect();
        let registry = pairs.iter().map(|kp| kp.public_key()).collect();
        (pairs, registry)
    }

    fn spec(pairs: &[KeyPair], threshold: u32) -> RoleSpec {
        RoleSpec::new(pairs.iter().map(|kp| kp.key_id().to_string()), threshold)
    }

    #[test]
    fn test_threshold_met() {
        let (pairs, registry) = setup(3);
        let sigs: Vec<_> = pairs[..2].iter().map(|kp| kp.sign(b"body").unwrap()).collect();

        let result = verify_threshold(b"body", &sigs, &spec(&pairs, 2), &registry);

        assert!(result.authorized);
        assert_eq!(result.valid_count(), 2);
    }

    #[test]
    fn test_threshold_not_met() {
        let (pairs, registry) = setup(3);
        let sigs = vec![pairs[0].sign(b"body").unwrap()];

        let result = verify_threshold(b"body", &sigs, &spec(&pairs, 2), &registry);

        assert!(!result.authorized);
        assert_eq!(result.valid_count(), 1);
    }

    #[test]
    fn test_duplicate_signatures_count_once() {
        let (pairs, registry) = setup(2);
        let sig = pairs[0].sign(b"body").unwrap();
        let sigs = vec![sig.clone(), sig.clone(), sig];

        let result = verify_threshold(b"body", &sigs, &spec(&pairs, 2), &registry);

        assert!(!result.authorized);
        assert_eq!(result.valid_count(), 1);
    }

    #[test]
    fn test_keys_outside_role_are_ignored() {
        let (pairs, registry) = setup(2);
        let outsider = KeyPair::generate();
        let mut registry = registry;
        registry.insert(outsider.public_key());

        let sigs = vec![outsider.sign(b"body").unwrap()];
        let result = verify_threshold(b"body", &sigs, &spec(&pairs, 1), &registry);

        assert!(!result.authorized);
        assert!(result.valid_signers.is_empty());
    }

    #[test]
    fn test_invalid_signature_does_not_count() {
        let (pairs, registry) = setup(1);
        let sigs = vec![pairs[0].sign(b"other body").unwrap()];

        let result = verify_threshold(b"body", &sigs, &spec(&pairs, 1), &registry);
        assert!(!result.authorized);
    }

    #[test]
    fn test_invalid_then_valid_signature_from_same_key() {
        let (pairs, registry) = setup(1);
        let sigs = vec![
            Signature::new(pairs[0].key_id(), vec![0u8; 64]),
            pairs[0].sign(b"body").unwrap(),
        ];

        let result = verify_threshold(b"body", &sigs, &spec(&pairs, 1), &registry);
        assert!(result.authorized);
    }

    #[test]
    fn test_unsupported_key_type_is_skipped() {
        let rsa = Key::new(KeyType::Rsa, vec![3u8; 256]);
        let registry: KeyRegistry = [rsa.clone()].into_iter().collect();
        let role = RoleSpec::new([rsa.id()], 1);
        let sigs = vec![Signature::new(rsa.id(), vec![0u8; 256])];

        let result = verify_threshold(b"body", &sigs, &role, &registry);
        assert!(!result.authorized);
    }

    #[test]
    fn test_verify_role_self_and_chain() {
        let old_kp = KeyPair::generate();
        let new_kp = KeyPair::generate();
        let expires = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

        let v1 = RootMetadata::initial(vec![old_kp.public_key()], 1, expires).unwrap();
        let v2 = v1.add_key(ROOT_ROLE, new_kp.public_key()).unwrap();
        let payload = v2.canonicalize().unwrap();
        let v2 = v2.with_signature(new_kp.sign(&payload).unwrap());

        // Valid under its own root role, but not under the previous one.
        assert!(v2.verify_role(ROOT_ROLE, &v2).unwrap().authorized);
        assert!(!v2.verify_role(ROOT_ROLE, &v1).unwrap().authorized);
        assert!(matches!(
            v2.verify_role(TARGETS_ROLE, &v1),
            Err(TrustRootError::UnknownRole(_))
        ));
    }
}
