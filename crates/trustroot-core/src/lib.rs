//! # Trust Root Core
//!
//! Data model and cryptographic checks for a repository's root of trust: the
//! signed, versioned document listing which keys may sign policy metadata and
//! how many signatures each role requires.
//!
//! ## Key Concepts
//!
//! - **Key**: a public key identified by its lowercase hex fingerprint
//! - **RootMetadata**: the versioned document of keys, roles and thresholds
//! - **Root role**: the role whose keys sign the root document itself
//! - **Threshold**: minimum number of distinct valid signatures for a role
//!
//! ## Document Invariants
//!
//! 1. **Satisfiability**: `1 <= threshold <= |key_ids|` for every role
//! 2. **Monotonicity**: every mutation yields exactly `version + 1`
//! 3. **Freshness**: a mutated document carries no signatures until re-signed

pub mod crypto;
pub mod error;
pub mod keys;
pub mod metadata;
pub mod types;
pub mod verify;

pub use crypto::{sign_with_material, KeyPair, Signature, Signer};
pub use error::{Result, TrustRootError};
pub use keys::{fingerprint, Key, KeyRegistry, KeyType};
pub use metadata::{PendingMutation, RoleSpec, RootMetadata};
pub use types::{RoleName, ROOT_ROLE, TARGETS_ROLE};
pub use verify::{verify_threshold, ThresholdVerification};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
