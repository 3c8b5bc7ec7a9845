//! Binary encryption policy records
//!
//! Record layout (kernel ABI, `struct fscrypt_policy_v1` / `fscrypt_policy_v2`):
//!
//! ```text
//! offset  v1                      v2
//! 0       version (0)             version (2)
//! 1       contents mode           contents mode
//! 2       filenames mode          filenames mode
//! 3       flags                   flags
//! 4       descriptor[8]           reserved[4] (zero)
//! 8       -                       identifier[16]
//! ```
//!
//! `encode` always produces the 24-byte v2-sized buffer; a v1 record is the
//! first 12 bytes followed by zeros. The kernel reads as many bytes as the
//! version byte calls for.

use crate::crypto::{
    KeyDescriptor, KeyIdentifier, KeyMaterial, KeyReference, KEY_DESCRIPTOR_SIZE,
    KEY_IDENTIFIER_SIZE,
};
use crate::error::{Error, Result};
use crate::policy::{EncryptionMode, Padding};
use std::fmt::Write as _;

/// Size of the largest policy record
pub const POLICY_MAX_SIZE: usize = 24;

/// Size of a v1 policy record
pub const POLICY_V1_SIZE: usize = 12;

/// Size of a v2 policy record
pub const POLICY_V2_SIZE: usize = 24;

/// Kernel version byte of a v1 policy
pub const POLICY_VERSION_V1: u8 = 0;

/// Kernel version byte of a v2 policy
pub const POLICY_VERSION_V2: u8 = 2;

const FLAGS_PAD_MASK: u8 = 0x03;
const FLAG_DIRECT_KEY: u8 = 0x04;
const FLAG_IV_INO_LBLK_64: u8 = 0x08;
const FLAG_IV_INO_LBLK_32: u8 = 0x10;
const FLAGS_VALID: u8 =
    FLAGS_PAD_MASK | FLAG_DIRECT_KEY | FLAG_IV_INO_LBLK_64 | FLAG_IV_INO_LBLK_32;

/// Encryption policy version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyVersion {
    V1,
    V2,
}

impl PolicyVersion {
    /// Version byte as stored in the record
    pub fn wire_value(self) -> u8 {
        match self {
            PolicyVersion::V1 => POLICY_VERSION_V1,
            PolicyVersion::V2 => POLICY_VERSION_V2,
        }
    }

    /// Version number shown to users; hides the kernel's v1 == 0 quirk
    pub fn number(self) -> u8 {
        match self {
            PolicyVersion::V1 => 1,
            PolicyVersion::V2 => 2,
        }
    }

    /// Length of the record for this version
    pub fn record_size(self) -> usize {
        match self {
            PolicyVersion::V1 => POLICY_V1_SIZE,
            PolicyVersion::V2 => POLICY_V2_SIZE,
        }
    }
}

/// IV derivation variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IvDerivation {
    /// Per-file keys
    #[default]
    PerFile,
    IvInoLblk64,
    IvInoLblk32,
}

/// Policy flags byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PolicyFlags {
    pub padding: Padding,
    pub direct_key: bool,
    pub iv: IvDerivation,
}

impl PolicyFlags {
    pub fn to_byte(self) -> u8 {
        let mut byte = self.padding.bits();
        if self.direct_key {
            byte |= FLAG_DIRECT_KEY;
        }
        byte |= match self.iv {
            IvDerivation::PerFile => 0,
            IvDerivation::IvInoLblk64 => FLAG_IV_INO_LBLK_64,
            IvDerivation::IvInoLblk32 => FLAG_IV_INO_LBLK_32,
        };
        byte
    }

    /// Decode a flags byte, rejecting reserved bits and conflicting IV bits
    pub fn from_byte(byte: u8) -> Result<Self> {
        if byte & !FLAGS_VALID != 0 {
            return Err(Error::InvalidPolicy(format!(
                "unknown flags 0x{:02x}",
                byte & !FLAGS_VALID
            )));
        }

        let iv = match (byte & FLAG_IV_INO_LBLK_64 != 0, byte & FLAG_IV_INO_LBLK_32 != 0) {
            (false, false) => IvDerivation::PerFile,
            (true, false) => IvDerivation::IvInoLblk64,
            (false, true) => IvDerivation::IvInoLblk32,
            (true, true) => {
                return Err(Error::InvalidPolicy(
                    "IV_INO_LBLK_64 and IV_INO_LBLK_32 are mutually exclusive".to_string(),
                ))
            }
        };

        Ok(PolicyFlags {
            padding: Padding::from_bits(byte & FLAGS_PAD_MASK),
            direct_key: byte & FLAG_DIRECT_KEY != 0,
            iv,
        })
    }

    /// Rendering used by `get_policy`, e.g. `PAD_32, DIRECT_KEY`
    pub fn describe(&self) -> String {
        let mut out = self.padding.to_string();
        if self.direct_key {
            out.push_str(", DIRECT_KEY");
        }
        match self.iv {
            IvDerivation::PerFile => {}
            IvDerivation::IvInoLblk64 => out.push_str(", IV_INO_LBLK_64"),
            IvDerivation::IvInoLblk32 => out.push_str(", IV_INO_LBLK_32"),
        }
        out
    }
}

/// An fscrypt encryption policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncryptionPolicy {
    /// Descriptor for v1, identifier for v2; selects the version
    pub key: KeyReference,
    pub contents: EncryptionMode,
    pub filenames: EncryptionMode,
    pub flags: PolicyFlags,
}

impl EncryptionPolicy {
    pub fn version(&self) -> PolicyVersion {
        self.key.version()
    }

    /// Check cross-field constraints the kernel would also enforce.
    ///
    /// Returns `Error::UnsupportedOptions` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let unsupported = |msg: String| Err(Error::UnsupportedOptions(msg));

        if !self.contents.is_contents_mode() {
            return unsupported(format!("{} is not a contents mode", self.contents));
        }
        if self.contents.paired_filenames_mode() != Some(self.filenames) {
            return unsupported(format!(
                "contents mode {} cannot be used with filenames mode {}",
                self.contents, self.filenames
            ));
        }
        if self.flags.direct_key && self.contents != EncryptionMode::Adiantum {
            return unsupported("DIRECT_KEY requires Adiantum".to_string());
        }
        if self.flags.iv != IvDerivation::PerFile && self.version() == PolicyVersion::V1 {
            return unsupported("IV_INO_LBLK flags require a v2 policy".to_string());
        }
        if self.flags.direct_key && self.flags.iv != IvDerivation::PerFile {
            return unsupported("DIRECT_KEY cannot be combined with IV_INO_LBLK flags".to_string());
        }
        Ok(())
    }

    /// Check that a key is long enough for both modes of this policy
    pub fn check_key(&self, key: &KeyMaterial) -> Result<()> {
        for mode in [self.contents, self.filenames] {
            if key.len() < mode.min_key_size() {
                return Err(Error::KeyIncompatible {
                    mode: mode.name(),
                    required: mode.min_key_size(),
                    got: key.len(),
                });
            }
        }
        Ok(())
    }

    /// Encode into the kernel record layout
    pub fn encode(&self) -> [u8; POLICY_MAX_SIZE] {
        let mut buf = [0u8; POLICY_MAX_SIZE];
        buf[0] = self.version().wire_value();
        buf[1] = self.contents.as_u8();
        buf[2] = self.filenames.as_u8();
        buf[3] = self.flags.to_byte();
        match &self.key {
            KeyReference::Descriptor(d) => {
                buf[4..4 + KEY_DESCRIPTOR_SIZE].copy_from_slice(d.as_bytes());
            }
            KeyReference::Identifier(i) => {
                buf[8..8 + KEY_IDENTIFIER_SIZE].copy_from_slice(i.as_bytes());
            }
        }
        buf
    }

    /// Decode a record returned by the kernel.
    ///
    /// Accepts the exact-size record or the 24-byte superset; bytes beyond
    /// the version's record must be zero.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some(&version_byte) = bytes.first() else {
            return Err(Error::InvalidPolicy("empty policy record".to_string()));
        };
        let version = match version_byte {
            POLICY_VERSION_V1 => PolicyVersion::V1,
            POLICY_VERSION_V2 => PolicyVersion::V2,
            other => {
                return Err(Error::InvalidPolicy(format!("unknown policy version {}", other)))
            }
        };

        let size = version.record_size();
        if bytes.len() < size {
            return Err(Error::InvalidPolicy(format!(
                "record is {} bytes, expected {}",
                bytes.len(),
                size
            )));
        }
        if bytes[size..].iter().any(|&b| b != 0) {
            return Err(Error::InvalidPolicy("trailing bytes are not zero".to_string()));
        }

        let mode = |b: u8| {
            EncryptionMode::from_u8(b)
                .ok_or_else(|| Error::InvalidPolicy(format!("unknown encryption mode {}", b)))
        };
        let contents = mode(bytes[1])?;
        let filenames = mode(bytes[2])?;
        let flags = PolicyFlags::from_byte(bytes[3])?;

        let key = match version {
            PolicyVersion::V1 => {
                let mut d = [0u8; KEY_DESCRIPTOR_SIZE];
                d.copy_from_slice(&bytes[4..4 + KEY_DESCRIPTOR_SIZE]);
                KeyReference::Descriptor(KeyDescriptor::from_bytes(d))
            }
            PolicyVersion::V2 => {
                if bytes[4..8].iter().any(|&b| b != 0) {
                    return Err(Error::InvalidPolicy("reserved bytes are not zero".to_string()));
                }
                let mut id = [0u8; KEY_IDENTIFIER_SIZE];
                id.copy_from_slice(&bytes[8..8 + KEY_IDENTIFIER_SIZE]);
                KeyReference::Identifier(KeyIdentifier::from_bytes(id))
            }
        };

        Ok(EncryptionPolicy {
            key,
            contents,
            filenames,
            flags,
        })
    }

    /// Human-readable rendering printed by `get_policy`
    pub fn describe(&self, path: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Encryption policy for {}:", path);
        let _ = writeln!(out, "\tPolicy version: {}", self.version().number());
        match &self.key {
            KeyReference::Descriptor(d) => {
                let _ = writeln!(out, "\tMaster key descriptor: {}", d);
            }
            KeyReference::Identifier(i) => {
                let _ = writeln!(out, "\tMaster key identifier: {}", i);
            }
        }
        let _ = writeln!(out, "\tContents encryption mode: {}", self.contents);
        let _ = writeln!(out, "\tFilenames encryption mode: {}", self.filenames);
        let _ = writeln!(out, "\tFlags: {}", self.flags.describe());
        out
    }
}
