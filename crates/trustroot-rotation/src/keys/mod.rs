//! Key material held by the rotating host

mod registry;

pub use registry::{as_signers, read_key_pair, read_public_key, KeyFileError, SigningKeyring};
