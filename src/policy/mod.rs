//! Encryption policies
//!
//! - `mode`: encryption modes and filename padding
//! - `codec`: the binary policy record
//! - `manager`: reading and setting policies through the kernel

mod codec;
mod manager;
mod mode;

pub use codec::{
    EncryptionPolicy, IvDerivation, PolicyFlags, PolicyVersion, POLICY_MAX_SIZE, POLICY_V1_SIZE,
    POLICY_V2_SIZE, POLICY_VERSION_V1, POLICY_VERSION_V2,
};
pub use manager::{validate_key_bytes, PolicyManager, PolicyOptions};
pub use mode::{EncryptionMode, Padding};
