//! Encryption modes and filename padding

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Encryption modes understood by fs/crypto/
///
/// Discriminants are the kernel's `FSCRYPT_MODE_*` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EncryptionMode {
    Aes256Xts = 1,
    Aes256Cts = 4,
    Aes128Cbc = 5,
    Aes128Cts = 6,
    Adiantum = 9,
}

impl EncryptionMode {
    pub const ALL: [EncryptionMode; 5] = [
        EncryptionMode::Aes256Xts,
        EncryptionMode::Aes256Cts,
        EncryptionMode::Aes128Cbc,
        EncryptionMode::Aes128Cts,
        EncryptionMode::Adiantum,
    ];

    /// Decode a kernel mode number
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| *m as u8 == value)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Name used on the command line and in `get_policy` output
    pub fn name(self) -> &'static str {
        match self {
            EncryptionMode::Aes256Xts => "AES-256-XTS",
            EncryptionMode::Aes256Cts => "AES-256-CTS",
            EncryptionMode::Aes128Cbc => "AES-128-CBC",
            EncryptionMode::Aes128Cts => "AES-128-CTS",
            EncryptionMode::Adiantum => "Adiantum",
        }
    }

    /// Modes valid for file contents
    pub fn is_contents_mode(self) -> bool {
        matches!(
            self,
            EncryptionMode::Aes256Xts | EncryptionMode::Aes128Cbc | EncryptionMode::Adiantum
        )
    }

    /// Modes valid for filenames
    pub fn is_filenames_mode(self) -> bool {
        matches!(
            self,
            EncryptionMode::Aes256Cts | EncryptionMode::Aes128Cts | EncryptionMode::Adiantum
        )
    }

    /// The only filenames mode the kernel pairs with this contents mode
    pub fn paired_filenames_mode(self) -> Option<EncryptionMode> {
        match self {
            EncryptionMode::Aes256Xts => Some(EncryptionMode::Aes256Cts),
            EncryptionMode::Aes128Cbc => Some(EncryptionMode::Aes128Cts),
            EncryptionMode::Adiantum => Some(EncryptionMode::Adiantum),
            EncryptionMode::Aes256Cts | EncryptionMode::Aes128Cts => None,
        }
    }

    /// Minimum master key size for this mode
    pub fn min_key_size(self) -> usize {
        match self {
            EncryptionMode::Aes256Xts => 64,
            EncryptionMode::Aes256Cts => 32,
            EncryptionMode::Aes128Cbc => 16,
            EncryptionMode::Aes128Cts => 16,
            EncryptionMode::Adiantum => 32,
        }
    }

    /// Parse a `--contents=` value
    pub fn parse_contents(s: &str) -> Result<Self> {
        s.parse().map_err(|_| Error::InvalidMode {
            kind: "contents",
            value: s.to_string(),
        })
    }

    /// Parse a `--filenames=` value
    pub fn parse_filenames(s: &str) -> Result<Self> {
        s.parse().map_err(|_| Error::InvalidMode {
            kind: "filenames",
            value: s.to_string(),
        })
    }
}

impl FromStr for EncryptionMode {
    type Err = ();

    /// Exact, case-sensitive match on the mode name
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        Self::ALL.into_iter().find(|m| m.name() == s).ok_or(())
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Filename padding, stored in the low two bits of the policy flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Padding {
    Pad4 = 0,
    Pad8 = 1,
    Pad16 = 2,
    #[default]
    Pad32 = 3,
}

impl Padding {
    /// Decode the two padding bits
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Padding::Pad4,
            1 => Padding::Pad8,
            2 => Padding::Pad16,
            _ => Padding::Pad32,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Padding in bytes
    pub fn bytes(self) -> u32 {
        4 << self.bits()
    }

    pub fn from_byte_count(bytes: u32) -> Option<Self> {
        match bytes {
            4 => Some(Padding::Pad4),
            8 => Some(Padding::Pad8),
            16 => Some(Padding::Pad16),
            32 => Some(Padding::Pad32),
            _ => None,
        }
    }

    /// Parse a `--padding=` value
    pub fn parse(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u32>()
            .ok()
            .and_then(Self::from_byte_count)
            .ok_or_else(|| Error::InvalidPadding(s.to_string()))
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PAD_{}", self.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names_round_trip() {
        for mode in EncryptionMode::ALL {
            assert_eq!(mode.name().parse::<EncryptionMode>(), Ok(mode));
            assert_eq!(EncryptionMode::from_u8(mode.as_u8()), Some(mode));
        }
        assert_eq!(EncryptionMode::from_u8(0), None);
        assert_eq!(EncryptionMode::from_u8(7), None);
    }

    #[test]
    fn test_mode_parse_errors() {
        let err = EncryptionMode::parse_contents("foo").unwrap_err();
        assert_eq!(err.to_string(), "invalid contents mode: foo");

        let err = EncryptionMode::parse_filenames("adiantum").unwrap_err();
        assert_eq!(err.to_string(), "invalid filenames mode: adiantum");
    }

    #[test]
    fn test_mode_pairing() {
        assert_eq!(
            EncryptionMode::Aes256Xts.paired_filenames_mode(),
            Some(EncryptionMode::Aes256Cts)
        );
        assert_eq!(
            EncryptionMode::Aes128Cbc.paired_filenames_mode(),
            Some(EncryptionMode::Aes128Cts)
        );
        assert_eq!(
            EncryptionMode::Adiantum.paired_filenames_mode(),
            Some(EncryptionMode::Adiantum)
        );
        assert_eq!(EncryptionMode::Aes128Cts.paired_filenames_mode(), None);
    }

    #[test]
    fn test_padding() {
        for (n, pad) in [
            (4, Padding::Pad4),
            (8, Padding::Pad8),
            (16, Padding::Pad16),
            (32, Padding::Pad32),
        ] {
            assert_eq!(Padding::parse(&n.to_string()).unwrap(), pad);
            assert_eq!(pad.bytes(), n);
            assert_eq!(Padding::from_bits(pad.bits()), pad);
            assert_eq!(pad.to_string(), format!("PAD_{}", n));
        }
        assert_eq!(Padding::default(), Padding::Pad32);

        for bad in ["0", "3", "64", "abc", ""] {
            let err = Padding::parse(bad).unwrap_err();
            assert_eq!(err.to_string(), format!("invalid padding: {}", bad));
        }
    }
}
