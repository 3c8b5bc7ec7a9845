//! Key material and key references
//!
//! - `KeyMaterial`: validated raw key bytes, wiped on drop
//! - `KeyDescriptor`: 8-byte v1 key reference (16 hex chars)
//! - `KeyIdentifier`: 16-byte v2 key reference (32 hex chars)
//! - `KeyReference`: either of the two, as typed by the user

use crate::crypto::{
    descriptor_of, identifier_of, KEY_DESCRIPTOR_SIZE, KEY_IDENTIFIER_SIZE, MAX_KEY_SIZE,
    MIN_KEY_SIZE,
};
use crate::error::{Error, Result};
use crate::policy::PolicyVersion;
use std::fmt;
use std::io::Read;
use zeroize::Zeroizing;

/// Raw key bytes supplied by the user
pub struct KeyMaterial {
    raw: Zeroizing<Vec<u8>>,
}

impl KeyMaterial {
    /// Validate raw bytes against the kernel's key size limits
    pub fn new(raw: &[u8]) -> Result<Self> {
        if raw.len() < MIN_KEY_SIZE {
            return Err(Error::KeyTooShort { min: MIN_KEY_SIZE });
        }
        if raw.len() > MAX_KEY_SIZE {
            return Err(Error::KeyTooLong { max: MAX_KEY_SIZE });
        }

        Ok(KeyMaterial {
            raw: Zeroizing::new(raw.to_vec()),
        })
    }

    /// Read a key from a stream (normally stdin) until EOF.
    ///
    /// At most `MAX_KEY_SIZE + 1` bytes are consumed, which is enough to tell
    /// an oversized key apart from a valid one.
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut raw = Zeroizing::new(Vec::with_capacity(MAX_KEY_SIZE + 1));
        reader
            .take(MAX_KEY_SIZE as u64 + 1)
            .read_to_end(&mut raw)?;
        Self::new(&raw)
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Legacy v1 descriptor of this key
    pub fn descriptor(&self) -> KeyDescriptor {
        descriptor_of(self)
    }

    /// v2 identifier of this key
    pub fn identifier(&self) -> KeyIdentifier {
        identifier_of(self)
    }

    /// The reference a policy of the given version would use for this key
    pub fn reference_for(&self, version: PolicyVersion) -> KeyReference {
        match version {
            PolicyVersion::V1 => KeyReference::Descriptor(self.descriptor()),
            PolicyVersion::V2 => KeyReference::Identifier(self.identifier()),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("len", &self.raw.len())
            .field("raw", &"[REDACTED]")
            .finish()
    }
}

/// v1 key descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyDescriptor([u8; KEY_DESCRIPTOR_SIZE]);

impl KeyDescriptor {
    pub fn from_bytes(bytes: [u8; KEY_DESCRIPTOR_SIZE]) -> Self {
        KeyDescriptor(bytes)
    }

    /// Parse a 16-character hex string (either case)
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; KEY_DESCRIPTOR_SIZE];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| Error::InvalidKeyDescriptor(s.to_string()))?;
        Ok(KeyDescriptor(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_DESCRIPTOR_SIZE] {
        &self.0
    }
}

impl fmt::Display for KeyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// v2 key identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyIdentifier([u8; KEY_IDENTIFIER_SIZE]);

impl KeyIdentifier {
    pub fn from_bytes(bytes: [u8; KEY_IDENTIFIER_SIZE]) -> Self {
        KeyIdentifier(bytes)
    }

    /// Parse a 32-character hex string (either case)
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; KEY_IDENTIFIER_SIZE];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| Error::InvalidKeyIdentifier(s.to_string()))?;
        Ok(KeyIdentifier(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_IDENTIFIER_SIZE] {
        &self.0
    }
}

impl fmt::Display for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A key descriptor or key identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyReference {
    Descriptor(KeyDescriptor),
    Identifier(KeyIdentifier),
}

impl KeyReference {
    /// Resolve a user-supplied key specifier.
    ///
    /// The length alone selects the kind: 16 hex chars is a descriptor, 32 is
    /// an identifier. Anything else is rejected before the hex is looked at.
    pub fn parse(specifier: &str) -> Result<Self> {
        match specifier.len() {
            n if n == 2 * KEY_DESCRIPTOR_SIZE => {
                KeyDescriptor::from_hex(specifier).map(KeyReference::Descriptor)
            }
            n if n == 2 * KEY_IDENTIFIER_SIZE => {
                KeyIdentifier::from_hex(specifier).map(KeyReference::Identifier)
            }
            _ => Err(Error::InvalidKeySpecifier(specifier.to_string())),
        }
    }

    /// Policy version this kind of reference belongs to
    pub fn version(&self) -> PolicyVersion {
        match self {
            KeyReference::Descriptor(_) => PolicyVersion::V1,
            KeyReference::Identifier(_) => PolicyVersion::V2,
        }
    }
}

impl fmt::Display for KeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyReference::Descriptor(d) => d.fmt(f),
            KeyReference::Identifier(i) => i.fmt(f),
        }
    }
}
