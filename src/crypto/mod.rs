//! Key material and key identities for fscryptctl
//!
//! Raw keys are never stored by this crate. They are validated, turned into
//! the descriptor (v1) or identifier (v2) the kernel expects, handed to a
//! keyring and wiped.

mod identity;
mod keys;

pub use identity::{descriptor_of, identifier_of};
pub use keys::{KeyDescriptor, KeyIdentifier, KeyMaterial, KeyReference};

/// Smallest raw key the kernel accepts
pub const MIN_KEY_SIZE: usize = 16;

/// Largest raw key the kernel accepts
pub const MAX_KEY_SIZE: usize = 64;

/// Size of a v1 key descriptor in bytes
pub const KEY_DESCRIPTOR_SIZE: usize = 8;

/// Size of a v2 key identifier in bytes
pub const KEY_IDENTIFIER_SIZE: usize = 16;
