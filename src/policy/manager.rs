//! Reading and setting encryption policies
//!
//! Translates between user-facing options and policy records, and between
//! kernel errno values and `Error` variants. Options are validated before
//! anything is sent to the kernel so a bad combination never reaches the
//! ioctl.

use crate::crypto::{KeyMaterial, KeyReference};
use crate::error::{describe_fscrypt_error, Error, Result};
use crate::kernel::{Kernel, SysError};
use crate::policy::{
    EncryptionMode, EncryptionPolicy, IvDerivation, Padding, PolicyFlags, PolicyVersion,
    POLICY_VERSION_V1, POLICY_VERSION_V2,
};
use nix::errno::Errno;
use std::path::Path;
use tracing::debug;

/// Options accepted by `set_policy`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyOptions {
    /// Contents encryption mode
    pub contents: EncryptionMode,
    /// Filenames encryption mode
    pub filenames: EncryptionMode,
    /// Filename padding
    pub padding: Padding,
    /// DIRECT_KEY flag (Adiantum only)
    pub direct_key: bool,
    /// IV_INO_LBLK_64 flag (v2 only)
    pub iv_ino_lblk_64: bool,
    /// IV_INO_LBLK_32 flag (v2 only)
    pub iv_ino_lblk_32: bool,
}

impl Default for PolicyOptions {
    fn default() -> Self {
        Self {
            contents: EncryptionMode::Aes256Xts,
            filenames: EncryptionMode::Aes256Cts,
            padding: Padding::Pad32,
            direct_key: false,
            iv_ino_lblk_64: false,
            iv_ino_lblk_32: false,
        }
    }
}

impl PolicyOptions {
    /// Build the policy these options describe for a key reference
    fn policy_for(&self, key: KeyReference) -> Option<EncryptionPolicy> {
        let iv = match (self.iv_ino_lblk_64, self.iv_ino_lblk_32) {
            (false, false) => IvDerivation::PerFile,
            (true, false) => IvDerivation::IvInoLblk64,
            (false, true) => IvDerivation::IvInoLblk32,
            (true, true) => return None,
        };
        Some(EncryptionPolicy {
            key,
            contents: self.contents,
            filenames: self.filenames,
            flags: PolicyFlags {
                padding: self.padding,
                direct_key: self.direct_key,
                iv,
            },
        })
    }
}

/// Validate raw key bytes read from the user
pub fn validate_key_bytes(raw: &[u8]) -> Result<KeyMaterial> {
    KeyMaterial::new(raw)
}

/// Policy operations on top of a kernel interface
pub struct PolicyManager<'k, K: Kernel + ?Sized> {
    kernel: &'k K,
}

impl<'k, K: Kernel + ?Sized> PolicyManager<'k, K> {
    pub fn new(kernel: &'k K) -> Self {
        PolicyManager { kernel }
    }

    /// Read the policy of a file or directory
    pub fn get_policy(&self, path: &Path) -> Result<EncryptionPolicy> {
        let display = || path.display().to_string();

        let record = self.kernel.get_policy(path).map_err(|e| match e {
            SysError::Open(errno) => Error::open(path, errno),
            SysError::Call(Errno::ENODATA) => Error::NotEncrypted(display()),
            SysError::Call(Errno::EINVAL | Errno::EOVERFLOW) => {
                Error::UnrecognizedPolicyVersion(display())
            }
            SysError::Call(errno) => Error::GetPolicy {
                path: display(),
                reason: describe_fscrypt_error(errno),
            },
        })?;

        match record.first() {
            Some(&POLICY_VERSION_V1 | &POLICY_VERSION_V2) => {}
            _ => return Err(Error::UnrecognizedPolicyVersion(display())),
        }

        EncryptionPolicy::decode(&record).map_err(|e| {
            debug!("undecodable policy on {}: {}", path.display(), e);
            match e {
                Error::InvalidPolicy(reason) => Error::InvalidStoredPolicy {
                    path: display(),
                    reason,
                },
                other => other,
            }
        })
    }

    /// Set a policy on an empty directory.
    ///
    /// Setting the identical policy again is a no-op; any other policy on an
    /// encrypted directory fails with `AlreadyEncrypted`.
    pub fn set_policy(
        &self,
        key: &KeyReference,
        path: &Path,
        options: &PolicyOptions,
    ) -> Result<EncryptionPolicy> {
        let display = || path.display().to_string();

        let policy = options
            .policy_for(*key)
            .ok_or_else(|| Error::InvalidEncryptionOptions(display()))?;
        policy.validate().map_err(|e| {
            debug!("rejecting policy for {}: {}", path.display(), e);
            Error::InvalidEncryptionOptions(display())
        })?;

        let record = policy.encode();
        self.kernel
            .set_policy(path, &record[..policy.version().record_size()])
            .map_err(|e| match e {
                SysError::Open(errno) => Error::open(path, errno),
                SysError::Call(Errno::EEXIST) => Error::AlreadyEncrypted(display()),
                SysError::Call(Errno::ENOTEMPTY) => Error::DirectoryNotEmpty(display()),
                SysError::Call(Errno::EINVAL) => Error::InvalidEncryptionOptions(display()),
                SysError::Call(errno) => Error::SetPolicy {
                    path: display(),
                    reason: describe_fscrypt_error(errno),
                },
            })?;

        debug!("set v{} policy {} on {}", policy.version().number(), key, path.display());
        Ok(policy)
    }

    /// Set a policy referring to `key`, after checking the key is long enough
    /// for the chosen modes
    pub fn set_policy_for_key(
        &self,
        key: &KeyMaterial,
        version: PolicyVersion,
        path: &Path,
        options: &PolicyOptions,
    ) -> Result<EncryptionPolicy> {
        let reference = key.reference_for(version);
        if let Some(policy) = options.policy_for(reference) {
            policy.check_key(key)?;
        }
        self.set_policy(&reference, path, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_IDENTIFIER_SIZE;
    use crate::kernel::{KeySerial, MemoryKernel, RawKeyStatus, SysResult};
    use crate::keyring::{KeyPrefix, Keyring, KeyringClient};

    /// Kernel whose only working call returns a fixed policy record
    struct FixedPolicyKernel(Vec<u8>);

    impl Kernel for FixedPolicyKernel {
        fn get_policy(&self, _path: &Path) -> SysResult<Vec<u8>> {
            Ok(self.0.clone())
        }

        fn set_policy(&self, _path: &Path, _policy: &[u8]) -> SysResult<()> {
            Err(Errno::ENOSYS.into())
        }

        fn add_key(
            &self,
            _mountpoint: &Path,
            _raw: &[u8],
        ) -> SysResult<[u8; KEY_IDENTIFIER_SIZE]> {
            Err(Errno::ENOSYS.into())
        }

        fn remove_key(
            &self,
            _mountpoint: &Path,
            _identifier: &[u8; KEY_IDENTIFIER_SIZE],
            _all_users: bool,
        ) -> SysResult<u32> {
            Err(Errno::ENOSYS.into())
        }

        fn key_status(
            &self,
            _mountpoint: &Path,
            _identifier: &[u8; KEY_IDENTIFIER_SIZE],
        ) -> SysResult<RawKeyStatus> {
            Err(Errno::ENOSYS.into())
        }

        fn session_keyring(&self) -> std::result::Result<KeySerial, Errno> {
            Err(Errno::ENOSYS)
        }

        fn add_keyring_key(
            &self,
            _key_type: &str,
            _description: &str,
            _payload: &[u8],
            _keyring: KeySerial,
        ) -> std::result::Result<KeySerial, Errno> {
            Err(Errno::ENOSYS)
        }

        fn search_keyring(
            &self,
            _keyring: KeySerial,
            _key_type: &str,
            _description: &str,
        ) -> std::result::Result<Option<KeySerial>, Errno> {
            Err(Errno::ENOSYS)
        }

        fn unlink_keyring_key(
            &self,
            _key: KeySerial,
            _keyring: KeySerial,
        ) -> std::result::Result<(), Errno> {
            Err(Errno::ENOSYS)
        }
    }

    fn v2_record(contents: u8, filenames: u8, flags: u8) -> Vec<u8> {
        let mut record = vec![POLICY_VERSION_V2, contents, filenames, flags, 0, 0, 0, 0];
        record.extend_from_slice(&[0x11; KEY_IDENTIFIER_SIZE]);
        record
    }

    /// Add `raw` to the session keyring and set a v1 policy for it on /test
    fn set_v1_policy(kernel: &MemoryKernel, raw: &[u8], options: &PolicyOptions) {
        kernel.mkdir("/test").unwrap();
        let key = KeyMaterial::new(raw).unwrap();
        let reference = KeyringClient::new(kernel)
            .add(
                &key,
                &Keyring::Session {
                    prefix: KeyPrefix::Fscrypt,
                },
            )
            .unwrap();
        PolicyManager::new(kernel)
            .set_policy(&reference, Path::new("/test"), options)
            .unwrap();
    }

    fn key64() -> KeyMaterial {
        let mut raw = vec![b'a'; 32];
        raw.extend_from_slice(&[b'1'; 32]);
        KeyMaterial::new(&raw).unwrap()
    }

    fn setup() -> (MemoryKernel, KeyReference) {
        let kernel = MemoryKernel::new();
        kernel.mkdir("/test").unwrap();
        let reference = KeyringClient::new(&kernel)
            .add(
                &key64(),
                &Keyring::Filesystem {
                    mountpoint: Path::new("/"),
                },
            )
            .unwrap();
        (kernel, reference)
    }

    #[test]
    fn test_set_then_get_v2() {
        let (kernel, reference) = setup();
        let manager = PolicyManager::new(&kernel);
        let dir = Path::new("/test");

        manager
            .set_policy(&reference, dir, &PolicyOptions::default())
            .unwrap();
        let policy = manager.get_policy(dir).unwrap();
        assert_eq!(policy.key, reference);
        assert_eq!(
            policy.describe("/test"),
            "Encryption policy for /test:\n\
             \tPolicy version: 2\n\
             \tMaster key identifier: 912ae510a458723a839a9fad701538ac\n\
             \tContents encryption mode: AES-256-XTS\n\
             \tFilenames encryption mode: AES-256-CTS\n\
             \tFlags: PAD_32\n"
        );
    }

    #[test]
    fn test_set_then_get_v1() {
        let kernel = MemoryKernel::new();
        kernel.mkdir("/test").unwrap();
        let manager = PolicyManager::new(&kernel);
        let reference = KeyReference::parse("E355A76A11A1BE18").unwrap();
        let options = PolicyOptions {
            padding: Padding::Pad16,
            ..Default::default()
        };

        manager
            .set_policy(&reference, Path::new("/test"), &options)
            .unwrap();
        let policy = manager.get_policy(Path::new("/test")).unwrap();
        assert_eq!(policy.version(), PolicyVersion::V1);
        assert_eq!(policy.key.to_string(), "e355a76a11a1be18");
        assert_eq!(policy.flags.padding, Padding::Pad16);
    }

    #[test]
    fn test_identical_policy_is_noop() {
        let (kernel, reference) = setup();
        let manager = PolicyManager::new(&kernel);
        let dir = Path::new("/test");
        let options = PolicyOptions::default();

        manager.set_policy(&reference, dir, &options).unwrap();
        kernel.create_file("/test/file").unwrap();
        manager.set_policy(&reference, dir, &options).unwrap();

        let other = PolicyOptions {
            padding: Padding::Pad4,
            ..options
        };
        let err = manager.set_policy(&reference, dir, &other).unwrap_err();
        assert_eq!(
            err.to_string(),
            "setting policy for /test: file or directory already encrypted"
        );
    }

    #[test]
    fn test_nonempty_directory() {
        let (kernel, reference) = setup();
        kernel.create_file("/test/file").unwrap();
        let err = PolicyManager::new(&kernel)
            .set_policy(&reference, Path::new("/test"), &PolicyOptions::default())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "setting policy for /test: Directory not empty"
        );
    }

    #[test]
    fn test_not_encrypted() {
        let (kernel, _) = setup();
        let err = PolicyManager::new(&kernel)
            .get_policy(Path::new("/test"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "getting policy for /test: file or directory not encrypted"
        );
    }

    #[test]
    fn test_nonexistent_path() {
        let (kernel, reference) = setup();
        let manager = PolicyManager::new(&kernel);
        let err = manager.get_policy(Path::new("NONEXISTENT")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "opening NONEXISTENT: No such file or directory"
        );
        let err = manager
            .set_policy(&reference, Path::new("NONEXISTENT"), &PolicyOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::PathNotFound(_)));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let (kernel, reference) = setup();
        let manager = PolicyManager::new(&kernel);
        let dir = Path::new("/test");

        let cases = [
            PolicyOptions {
                filenames: EncryptionMode::Aes128Cts,
                ..Default::default()
            },
            PolicyOptions {
                contents: EncryptionMode::Aes256Cts,
                ..Default::default()
            },
            PolicyOptions {
                direct_key: true,
                ..Default::default()
            },
            PolicyOptions {
                iv_ino_lblk_64: true,
                iv_ino_lblk_32: true,
                ..Default::default()
            },
        ];
        for options in cases {
            let err = manager.set_policy(&reference, dir, &options).unwrap_err();
            assert_eq!(
                err.to_string(),
                "setting policy for /test: invalid encryption options provided"
            );
        }
        assert!(matches!(
            manager.get_policy(dir),
            Err(Error::NotEncrypted(_))
        ));
    }

    #[test]
    fn test_iv_flags_need_v2_and_stable_inodes() {
        let (kernel, reference) = setup();
        let manager = PolicyManager::new(&kernel);
        let options = PolicyOptions {
            iv_ino_lblk_64: true,
            ..Default::default()
        };

        let v1 = KeyReference::parse("e355a76a11a1be18").unwrap();
        assert!(matches!(
            manager.set_policy(&v1, Path::new("/test"), &options),
            Err(Error::InvalidEncryptionOptions(_))
        ));

        // Rejected by the filesystem until it has stable inode numbers
        assert!(matches!(
            manager.set_policy(&reference, Path::new("/test"), &options),
            Err(Error::InvalidEncryptionOptions(_))
        ));
        kernel.set_stable_inodes(true);
        let policy = manager
            .set_policy(&reference, Path::new("/test"), &options)
            .unwrap();
        assert_eq!(policy.flags.describe(), "PAD_32, IV_INO_LBLK_64");
    }

    #[test]
    fn test_adiantum_direct_key() {
        let (kernel, reference) = setup();
        let options = PolicyOptions {
            contents: EncryptionMode::Adiantum,
            filenames: EncryptionMode::Adiantum,
            direct_key: true,
            ..Default::default()
        };
        let policy = PolicyManager::new(&kernel)
            .set_policy(&reference, Path::new("/test"), &options)
            .unwrap();
        assert_eq!(policy.flags.describe(), "PAD_32, DIRECT_KEY");
    }

    #[test]
    fn test_v2_key_must_be_added() {
        let kernel = MemoryKernel::new();
        kernel.mkdir("/test").unwrap();
        let reference = KeyReference::parse(&"0".repeat(32)).unwrap();
        let err = PolicyManager::new(&kernel)
            .set_policy(&reference, Path::new("/test"), &PolicyOptions::default())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "setting policy for /test: Required key not available"
        );
    }

    #[test]
    fn test_short_key_fails_before_kernel() {
        let kernel = MemoryKernel::new();
        kernel.mkdir("/test").unwrap();
        let key = validate_key_bytes(b"abcdefghijklmnop").unwrap();

        let err = PolicyManager::new(&kernel)
            .set_policy_for_key(
                &key,
                PolicyVersion::V1,
                Path::new("/test"),
                &PolicyOptions::default(),
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "AES-256-XTS needs a key of at least 64 bytes, got 16"
        );
        assert!(matches!(
            PolicyManager::new(&kernel).get_policy(Path::new("/test")),
            Err(Error::NotEncrypted(_))
        ));

        let options = PolicyOptions {
            contents: EncryptionMode::Aes128Cbc,
            filenames: EncryptionMode::Aes128Cts,
            ..Default::default()
        };
        let policy = PolicyManager::new(&kernel)
            .set_policy_for_key(&key, PolicyVersion::V1, Path::new("/test"), &options)
            .unwrap();
        assert_eq!(policy.key.to_string(), "85baa174f0cb1142");
    }

    #[test]
    fn test_validate_key_bytes() {
        assert!(matches!(
            validate_key_bytes(&[0u8; 15]),
            Err(Error::KeyTooShort { min: 16 })
        ));
        assert!(matches!(
            validate_key_bytes(&[0u8; 65]),
            Err(Error::KeyTooLong { max: 64 })
        ));
        assert_eq!(validate_key_bytes(&[0u8; 33]).unwrap().len(), 33);
    }

    #[test]
    fn test_get_policy_of_file_in_encrypted_directory() {
        let (kernel, reference) = setup();
        let manager = PolicyManager::new(&kernel);
        manager
            .set_policy(&reference, Path::new("/test"), &PolicyOptions::default())
            .unwrap();

        kernel.create_file("/test/file").unwrap();
        let file_policy = manager.get_policy(Path::new("/test/file")).unwrap();
        assert_eq!(file_policy, manager.get_policy(Path::new("/test")).unwrap());
        assert_eq!(file_policy.key, reference);
    }

    #[test]
    fn test_unknown_version_on_disk() {
        let mut record = v2_record(1, 4, 3);
        record[0] = 3;
        let kernel = FixedPolicyKernel(record);
        let err = PolicyManager::new(&kernel)
            .get_policy(Path::new("d"))
            .unwrap_err();
        assert!(matches!(err, Error::UnrecognizedPolicyVersion(_)));
    }

    #[test]
    fn test_unknown_mode_on_disk() {
        let kernel = FixedPolicyKernel(v2_record(1, 10, 3));
        let err = PolicyManager::new(&kernel)
            .get_policy(Path::new("d"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStoredPolicy { .. }));
        assert_eq!(
            err.to_string(),
            "getting policy for d: invalid encryption policy: unknown encryption mode 10"
        );
    }

    #[test]
    fn test_reserved_bits_on_disk() {
        let kernel = FixedPolicyKernel(v2_record(1, 4, 0x80));
        assert!(matches!(
            PolicyManager::new(&kernel).get_policy(Path::new("d")),
            Err(Error::InvalidStoredPolicy { .. })
        ));

        let mut record = v2_record(1, 4, 3);
        record[5] = 1;
        let kernel = FixedPolicyKernel(record);
        let err = PolicyManager::new(&kernel)
            .get_policy(Path::new("d"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "getting policy for d: invalid encryption policy: reserved bytes are not zero"
        );
    }

    #[test]
    fn test_xts_file_creation_needs_64_byte_key() {
        for len in [16, 32] {
            let kernel = MemoryKernel::new();
            set_v1_policy(&kernel, &vec![b'k'; len], &PolicyOptions::default());
            assert_eq!(kernel.create_file("/test/file"), Err(Errno::EINVAL));
        }

        let kernel = MemoryKernel::new();
        set_v1_policy(&kernel, key64().as_bytes(), &PolicyOptions::default());
        kernel.create_file("/test/file").unwrap();
    }

    #[test]
    fn test_adiantum_file_creation_needs_32_byte_key() {
        let options = PolicyOptions {
            contents: EncryptionMode::Adiantum,
            filenames: EncryptionMode::Adiantum,
            ..Default::default()
        };

        let kernel = MemoryKernel::new();
        set_v1_policy(&kernel, &[b'k'; 16], &options);
        assert_eq!(kernel.create_file("/test/file"), Err(Errno::EINVAL));

        let kernel = MemoryKernel::new();
        set_v1_policy(&kernel, &[b'k'; 32], &options);
        kernel.create_file("/test/file").unwrap();
    }
}
