//! Rotation logic for the root of trust

mod error;
mod rotation;
mod validation;

pub use error::RotationError;
pub use rotation::{
    LoadedRoot, MutatedRoot, RootStateMachine, RotationStage, SignedRoot, ValidatedRoot,
};
pub use validation::{validate_chain, validate_self, validate_successor};
