//! fscryptctl - Linux filesystem encryption key and policy management
//!
//! This library derives fscrypt key descriptors and identifiers, encodes
//! encryption policy records, and manages keys in the session keyring (v1)
//! and in filesystem keyrings (v2). All kernel access goes through the
//! `kernel::Kernel` trait.

pub mod config;
pub mod crypto;
pub mod error;
pub mod kernel;
pub mod keyring;
pub mod policy;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crypto::{KeyMaterial, KeyReference};
    pub use crate::error::{Error, Result};
    pub use crate::kernel::{Kernel, LinuxKernel};
    pub use crate::keyring::{KeyPrefix, KeyStatus, Keyring, KeyringClient, RemovalOutcome};
    pub use crate::policy::{EncryptionPolicy, PolicyManager, PolicyOptions, PolicyVersion};
}
