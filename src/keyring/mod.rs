//! Keyring client
//!
//! Two backends share the add/remove/search/status surface:
//! - `Keyring::Session`: v1 keys, stored as "logon" keys in the session keyring
//! - `Keyring::Filesystem`: v2 keys, stored in a mounted filesystem's keyring
//!
//! Nothing is cached between calls. The kernel state can change underneath
//! us at any time (files opened or closed by other processes), so a status
//! check followed by a removal is never treated as atomic.

mod filesystem;
mod session;

use crate::crypto::{KeyMaterial, KeyReference};
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::policy::PolicyVersion;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Description prefix for v1 keys in the session keyring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPrefix {
    /// Generic prefix understood by all filesystems
    #[default]
    Fscrypt,
    /// ext4 before Linux 4.8
    Ext4,
    /// F2FS before Linux 4.6
    F2fs,
}

impl KeyPrefix {
    pub const ALL: [KeyPrefix; 3] = [KeyPrefix::Fscrypt, KeyPrefix::Ext4, KeyPrefix::F2fs];

    pub fn as_str(self) -> &'static str {
        match self {
            KeyPrefix::Fscrypt => "fscrypt:",
            KeyPrefix::Ext4 => "ext4:",
            KeyPrefix::F2fs => "f2fs:",
        }
    }
}

/// Where a key lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyring<'a> {
    /// Session keyring (v1 policies)
    Session { prefix: KeyPrefix },
    /// Keyring of the filesystem mounted at (or containing) `mountpoint` (v2 policies)
    Filesystem { mountpoint: &'a Path },
}

impl<'a> Keyring<'a> {
    /// The keyring a policy version uses
    pub fn for_version(version: PolicyVersion, mountpoint: &'a Path, prefix: KeyPrefix) -> Self {
        match version {
            PolicyVersion::V1 => Keyring::Session { prefix },
            PolicyVersion::V2 => Keyring::Filesystem { mountpoint },
        }
    }
}

/// Status of a key, as reported by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Absent,
    Present {
        user_count: u32,
        added_by_self: bool,
        /// Status flags this tool does not know about
        unknown_flags: u32,
    },
    IncompletelyRemoved,
    /// Status code this tool does not know about
    Unknown(u32),
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            KeyStatus::Absent => f.write_str("Absent"),
            KeyStatus::IncompletelyRemoved => f.write_str("Incompletely removed"),
            KeyStatus::Unknown(code) => write!(f, "Unknown status ({})", code),
            KeyStatus::Present {
                user_count,
                added_by_self,
                unknown_flags,
            } => {
                f.write_str("Present")?;
                if user_count == 0 && !added_by_self && unknown_flags == 0 {
                    return Ok(());
                }
                write!(f, " (user_count={}", user_count)?;
                if added_by_self {
                    f.write_str(", added_by_self")?;
                }
                if unknown_flags != 0 {
                    write!(f, ", unknown_flags=0x{:08x}", unknown_flags)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Result of a successful removal request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The key is gone
    Removed,
    /// Our claim was dropped, but files using the key are still open; the key
    /// is now incompletely removed and vanishes when they are closed
    StillInUse,
    /// Our claim was dropped, but other users still have the key added
    OtherUsersRemain,
}

impl RemovalOutcome {
    /// Warning to show the user, if any
    pub fn warning(&self) -> Option<&'static str> {
        match self {
            RemovalOutcome::Removed => None,
            RemovalOutcome::StillInUse => Some("some files using this key are still in-use"),
            RemovalOutcome::OtherUsersRemain => Some("other users still have this key added"),
        }
    }
}

/// Key operations on top of a kernel interface
pub struct KeyringClient<'k, K: Kernel + ?Sized> {
    kernel: &'k K,
}

impl<'k, K: Kernel + ?Sized> KeyringClient<'k, K> {
    pub fn new(kernel: &'k K) -> Self {
        KeyringClient { kernel }
    }

    /// Install a key and return the reference policies use for it.
    ///
    /// Adding the same key twice succeeds and returns the same reference.
    pub fn add(&self, key: &KeyMaterial, keyring: &Keyring<'_>) -> Result<KeyReference> {
        match *keyring {
            Keyring::Session { prefix } => {
                session::add(self.kernel, key, prefix).map(KeyReference::Descriptor)
            }
            Keyring::Filesystem { mountpoint } => {
                filesystem::add(self.kernel, key, mountpoint).map(KeyReference::Identifier)
            }
        }
    }

    /// Remove a key. A key that is not there fails with `KeyNotAvailable`.
    pub fn remove(
        &self,
        reference: &KeyReference,
        keyring: &Keyring<'_>,
        all_users: bool,
    ) -> Result<RemovalOutcome> {
        match (*keyring, reference) {
            (Keyring::Session { prefix }, KeyReference::Descriptor(d)) => {
                session::remove(self.kernel, d, prefix)
            }
            (Keyring::Filesystem { mountpoint }, KeyReference::Identifier(id)) => {
                filesystem::remove(self.kernel, id, mountpoint, all_users)
            }
            (_, other) => Err(mismatched(other)),
        }
    }

    /// Current status of a key
    pub fn status(&self, reference: &KeyReference, keyring: &Keyring<'_>) -> Result<KeyStatus> {
        match (*keyring, reference) {
            (Keyring::Session { prefix }, KeyReference::Descriptor(d)) => {
                session::status(self.kernel, d, prefix)
            }
            (Keyring::Filesystem { mountpoint }, KeyReference::Identifier(id)) => {
                filesystem::status(self.kernel, id, mountpoint)
            }
            (_, other) => Err(mismatched(other)),
        }
    }

    /// Whether the key is currently usable
    pub fn search(&self, reference: &KeyReference, keyring: &Keyring<'_>) -> Result<bool> {
        match (*keyring, reference) {
            (Keyring::Session { prefix }, KeyReference::Descriptor(d)) => {
                session::search(self.kernel, d, prefix).map(|serial| serial.is_some())
            }
            (Keyring::Filesystem { mountpoint }, KeyReference::Identifier(id)) => {
                filesystem::status(self.kernel, id, mountpoint)
                    .map(|status| matches!(status, KeyStatus::Present { .. }))
            }
            (_, other) => Err(mismatched(other)),
        }
    }
}

/// A descriptor was used with the filesystem keyring or vice versa
fn mismatched(reference: &KeyReference) -> Error {
    match reference {
        KeyReference::Descriptor(d) => Error::InvalidKeyIdentifier(d.to_string()),
        KeyReference::Identifier(id) => Error::InvalidKeyDescriptor(id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::MemoryKernel;

    fn key64() -> KeyMaterial {
        let mut raw = vec![b'a'; 32];
        raw.extend_from_slice(&[b'1'; 32]);
        KeyMaterial::new(&raw).unwrap()
    }

    #[test]
    fn test_status_rendering() {
        assert_eq!(KeyStatus::Absent.to_string(), "Absent");
        assert_eq!(
            KeyStatus::IncompletelyRemoved.to_string(),
            "Incompletely removed"
        );
        assert_eq!(
            KeyStatus::Present {
                user_count: 1,
                added_by_self: true,
                unknown_flags: 0
            }
            .to_string(),
            "Present (user_count=1, added_by_self)"
        );
        assert_eq!(
            KeyStatus::Present {
                user_count: 0,
                added_by_self: false,
                unknown_flags: 0
            }
            .to_string(),
            "Present"
        );
        assert_eq!(
            KeyStatus::Present {
                user_count: 2,
                added_by_self: false,
                unknown_flags: 4
            }
            .to_string(),
            "Present (user_count=2, unknown_flags=0x00000004)"
        );
        assert_eq!(KeyStatus::Unknown(7).to_string(), "Unknown status (7)");
    }

    #[test]
    fn test_filesystem_add_status_remove() {
        let kernel = MemoryKernel::new();
        let client = KeyringClient::new(&kernel);
        let ring = Keyring::Filesystem {
            mountpoint: Path::new("/"),
        };
        let key = key64();

        let reference = key.reference_for(PolicyVersion::V2);
        assert_eq!(client.status(&reference, &ring).unwrap(), KeyStatus::Absent);
        assert!(!client.search(&reference, &ring).unwrap());

        let added = client.add(&key, &ring).unwrap();
        assert_eq!(added.to_string(), "912ae510a458723a839a9fad701538ac");
        assert_eq!(
            client.status(&added, &ring).unwrap().to_string(),
            "Present (user_count=1, added_by_self)"
        );
        assert!(client.search(&added, &ring).unwrap());

        // Idempotent
        assert_eq!(client.add(&key, &ring).unwrap(), added);

        assert_eq!(
            client.remove(&added, &ring, false).unwrap(),
            RemovalOutcome::Removed
        );
        assert_eq!(client.status(&added, &ring).unwrap(), KeyStatus::Absent);
    }

    #[test]
    fn test_remove_missing_key() {
        let kernel = MemoryKernel::new();
        let client = KeyringClient::new(&kernel);
        let ring = Keyring::Filesystem {
            mountpoint: Path::new("/"),
        };
        let reference = KeyReference::parse(&"0".repeat(32)).unwrap();

        let err = client.remove(&reference, &ring, false).unwrap_err();
        assert!(matches!(err, Error::KeyNotAvailable));
        assert_eq!(err.to_string(), "removing key: Required key not available");
    }

    #[test]
    fn test_session_add_search_remove() {
        let kernel = MemoryKernel::new();
        let client = KeyringClient::new(&kernel);
        let key = key64();

        for prefix in KeyPrefix::ALL {
            let ring = Keyring::Session { prefix };
            let reference = client.add(&key, &ring).unwrap();
            assert_eq!(reference.to_string(), "e355a76a11a1be18");
            assert!(client.search(&reference, &ring).unwrap());
        }
        assert_eq!(kernel.session_key_count(), 3);

        let ring = Keyring::Session {
            prefix: KeyPrefix::Ext4,
        };
        let reference = key.reference_for(PolicyVersion::V1);
        assert_eq!(
            client.remove(&reference, &ring, false).unwrap(),
            RemovalOutcome::Removed
        );
        assert!(!client.search(&reference, &ring).unwrap());
        assert!(matches!(
            client.remove(&reference, &ring, false),
            Err(Error::KeyNotAvailable)
        ));
        assert_eq!(kernel.session_key_count(), 2);
    }

    #[test]
    fn test_mismatched_reference() {
        let kernel = MemoryKernel::new();
        let client = KeyringClient::new(&kernel);
        let ring = Keyring::Filesystem {
            mountpoint: Path::new("/"),
        };
        let descriptor = key64().reference_for(PolicyVersion::V1);
        assert!(matches!(
            client.status(&descriptor, &ring),
            Err(Error::InvalidKeyIdentifier(_))
        ));
    }

    #[test]
    fn test_for_version() {
        let mnt = Path::new("/mnt");
        assert_eq!(
            Keyring::for_version(PolicyVersion::V2, mnt, KeyPrefix::Fscrypt),
            Keyring::Filesystem { mountpoint: mnt }
        );
        assert_eq!(
            Keyring::for_version(PolicyVersion::V1, mnt, KeyPrefix::F2fs),
            Keyring::Session {
                prefix: KeyPrefix::F2fs
            }
        );
    }
}
