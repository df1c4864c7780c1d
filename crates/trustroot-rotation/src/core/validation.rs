//! Authorization checks for root documents
//!
//! A root is trusted only if it satisfies its own root role (self-consistency)
//! and, when it has a predecessor, the predecessor's root role (chain of
//! trust). Every failure here is logged as a security event before it is
//! returned.

use tracing::{debug, warn};
use trustroot_core::{RootMetadata, ThresholdVerification, ROOT_ROLE};

use super::error::RotationError;

/// Check that `root` is signed by a threshold of its own root keys
pub fn validate_self(root: &RootMetadata) -> Result<ThresholdVerification, RotationError> {
    let verification = root.verify_role(ROOT_ROLE, root)?;
    if verification.authorized {
        debug!(version = root.version(), "Root satisfies its own root role");
        return Ok(verification);
    }

    warn!(
        version = root.version(),
        valid = verification.valid_count(),
        required = verification.threshold,
        "SECURITY: Root is not signed by a threshold of its own root keys"
    );
    Err(RotationError::UnauthorizedRoot {
        version: root.version(),
        authority_version: root.version(),
        role: ROOT_ROLE.into(),
        valid: verification.valid_count(),
        required: verification.threshold,
    })
}

/// Check that `current` directly follows `previous` and carries a threshold
/// of `previous`'s root signatures
pub fn validate_chain(
    previous: &RootMetadata,
    current: &RootMetadata,
) -> Result<ThresholdVerification, RotationError> {
    if current.version() != previous.version() + 1 {
        warn!(
            version = current.version(),
            previous_version = previous.version(),
            "SECURITY: Root version does not follow its predecessor"
        );
        return Err(RotationError::BrokenChain {
            version: current.version(),
            previous_version: previous.version(),
        });
    }

    let verification = current.verify_role(ROOT_ROLE, previous)?;
    if verification.authorized {
        debug!(
            version = current.version(),
            previous_version = previous.version(),
            "Root chain link verified"
        );
        return Ok(verification);
    }

    warn!(
        version = current.version(),
        previous_version = previous.version(),
        valid = verification.valid_count(),
        required = verification.threshold,
        "SECURITY: Root is not authorized by its predecessor's root keys"
    );
    Err(RotationError::UnauthorizedRoot {
        version: current.version(),
        authority_version: previous.version(),
        role: ROOT_ROLE.into(),
        valid: verification.valid_count(),
        required: verification.threshold,
    })
}

/// Check a freshly signed successor before it is persisted
///
/// The successor needs a threshold of its own root keys and, unless it is the
/// first root, a threshold of `current`'s root keys. Either shortfall is
/// reported as [`RotationError::InsufficientSignatures`] since nothing has been
/// stored yet.
pub fn validate_successor(
    current: Option<&RootMetadata>,
    next: &RootMetadata,
) -> Result<(), RotationError> {
    let authorities = std::iter::once(next).chain(current);

    for authority in authorities {
        let verification = next.verify_role(ROOT_ROLE, authority)?;
        if !verification.authorized {
            warn!(
                version = next.version(),
                authority_version = authority.version(),
                valid = verification.valid_count(),
                required = verification.threshold,
                "SECURITY: Refusing to persist under-signed root"
            );
            return Err(RotationError::InsufficientSignatures {
                version: next.version(),
                authority_version: authority.version(),
                role: ROOT_ROLE.into(),
                valid: verification.valid_count(),
                required: verification.threshold,
            });
        }
    }

    Ok(())
}
