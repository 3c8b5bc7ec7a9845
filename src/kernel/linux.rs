//! Real kernel access through ioctls and keyctl syscalls

use crate::crypto::{KEY_IDENTIFIER_SIZE, MAX_KEY_SIZE};
use crate::kernel::uapi::{
    self, fscrypt_add_key_arg, fscrypt_get_key_status_arg, fscrypt_get_policy_ex_arg,
    fscrypt_key_specifier, fscrypt_remove_key_arg,
};
use crate::kernel::{KeySerial, Kernel, RawKeyStatus, SysError, SysResult};
use crate::policy::POLICY_MAX_SIZE;
use nix::errno::Errno;
use nix::{ioctl_read_bad, ioctl_readwrite, ioctl_readwrite_bad};
use nix::{request_code_read, request_code_readwrite, request_code_write};
use std::ffi::CString;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::Path;
use tracing::{debug, trace};
use zeroize::Zeroize;

// FS_IOC_SET_ENCRYPTION_POLICY and FS_IOC_GET_ENCRYPTION_POLICY carry swapped
// direction bits in the kernel headers; the request codes must match them.
ioctl_read_bad!(
    fs_ioc_set_encryption_policy,
    request_code_read!(b'f', 19, uapi::POLICY_V1_IOCTL_SIZE),
    u8
);
ioctl_read_bad!(
    fs_ioc_get_encryption_policy,
    request_code_write!(b'f', 21, uapi::POLICY_V1_IOCTL_SIZE),
    u8
);
ioctl_readwrite_bad!(
    fs_ioc_get_encryption_policy_ex,
    request_code_readwrite!(b'f', 22, uapi::GET_POLICY_EX_IOCTL_SIZE),
    fscrypt_get_policy_ex_arg
);
ioctl_readwrite_bad!(
    fs_ioc_add_encryption_key,
    request_code_readwrite!(b'f', 23, uapi::ADD_KEY_ARG_HEADER_SIZE),
    fscrypt_add_key_arg
);
ioctl_readwrite!(fs_ioc_remove_encryption_key, b'f', 24, fscrypt_remove_key_arg);
ioctl_readwrite!(
    fs_ioc_remove_encryption_key_all_users,
    b'f',
    25,
    fscrypt_remove_key_arg
);
ioctl_readwrite!(
    fs_ioc_get_encryption_key_status,
    b'f',
    26,
    fscrypt_get_key_status_arg
);

/// Open a path read-only (O_CLOEXEC is implied by std)
fn open(path: &Path) -> SysResult<File> {
    File::open(path).map_err(|e| SysError::Open(Errno::try_from(e).unwrap_or(Errno::EIO)))
}

fn c_string(s: &str) -> Result<CString, Errno> {
    CString::new(s).map_err(|_| Errno::EINVAL)
}

/// The running kernel
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxKernel;

impl LinuxKernel {
    pub fn new() -> Self {
        LinuxKernel
    }
}

impl Kernel for LinuxKernel {
    fn get_policy(&self, path: &Path) -> SysResult<Vec<u8>> {
        let file = open(path)?;
        let fd = file.as_raw_fd();

        let mut arg = fscrypt_get_policy_ex_arg {
            policy_size: POLICY_MAX_SIZE as u64,
            policy: [0u8; POLICY_MAX_SIZE],
        };
        // SAFETY: arg is a valid fscrypt_get_policy_ex_arg that outlives the call
        match unsafe { fs_ioc_get_encryption_policy_ex(fd, &mut arg) } {
            Ok(_) => {
                let size = (arg.policy_size as usize).min(POLICY_MAX_SIZE);
                trace!("FS_IOC_GET_ENCRYPTION_POLICY_EX returned {} bytes", size);
                Ok(arg.policy[..size].to_vec())
            }
            Err(Errno::ENOTTY) => {
                debug!("FS_IOC_GET_ENCRYPTION_POLICY_EX unsupported, trying v1 ioctl");
                let mut policy = [0u8; uapi::POLICY_V1_IOCTL_SIZE];
                // SAFETY: the kernel writes exactly POLICY_V1_IOCTL_SIZE bytes
                unsafe { fs_ioc_get_encryption_policy(fd, policy.as_mut_ptr()) }?;
                Ok(policy.to_vec())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_policy(&self, path: &Path, policy: &[u8]) -> SysResult<()> {
        let file = open(path)?;

        let mut buf = [0u8; POLICY_MAX_SIZE];
        let len = policy.len().min(POLICY_MAX_SIZE);
        buf[..len].copy_from_slice(&policy[..len]);

        // SAFETY: buf holds a full v2-sized record; the kernel only reads it
        unsafe { fs_ioc_set_encryption_policy(file.as_raw_fd(), buf.as_mut_ptr()) }?;
        Ok(())
    }

    fn add_key(&self, mountpoint: &Path, raw: &[u8]) -> SysResult<[u8; KEY_IDENTIFIER_SIZE]> {
        if raw.len() > MAX_KEY_SIZE {
            return Err(SysError::Call(Errno::EINVAL));
        }
        let file = open(mountpoint)?;

        let mut arg = fscrypt_add_key_arg {
            key_spec: fscrypt_key_specifier {
                type_: uapi::FSCRYPT_KEY_SPEC_TYPE_IDENTIFIER,
                __reserved: 0,
                u: [0u8; 32],
            },
            raw_size: raw.len() as u32,
            key_id: 0,
            __reserved: [0; 8],
            raw: [0u8; MAX_KEY_SIZE],
        };
        arg.raw[..raw.len()].copy_from_slice(raw);

        // SAFETY: raw[] directly follows the header, as the kernel expects
        let ret = unsafe { fs_ioc_add_encryption_key(file.as_raw_fd(), &mut arg) };
        arg.raw.zeroize();
        ret?;

        let mut identifier = [0u8; KEY_IDENTIFIER_SIZE];
        identifier.copy_from_slice(&arg.key_spec.u[..KEY_IDENTIFIER_SIZE]);
        Ok(identifier)
    }

    fn remove_key(
        &self,
        mountpoint: &Path,
        identifier: &[u8; KEY_IDENTIFIER_SIZE],
        all_users: bool,
    ) -> SysResult<u32> {
        let file = open(mountpoint)?;
        let mut arg = fscrypt_remove_key_arg {
            key_spec: fscrypt_key_specifier::identifier(identifier),
            removal_status_flags: 0,
            __reserved: [0; 5],
        };

        // SAFETY: arg is a valid fscrypt_remove_key_arg that outlives the call
        unsafe {
            if all_users {
                fs_ioc_remove_encryption_key_all_users(file.as_raw_fd(), &mut arg)
            } else {
                fs_ioc_remove_encryption_key(file.as_raw_fd(), &mut arg)
            }
        }?;
        Ok(arg.removal_status_flags)
    }

    fn key_status(
        &self,
        mountpoint: &Path,
        identifier: &[u8; KEY_IDENTIFIER_SIZE],
    ) -> SysResult<RawKeyStatus> {
        let file = open(mountpoint)?;
        let mut arg = fscrypt_get_key_status_arg {
            key_spec: fscrypt_key_specifier::identifier(identifier),
            __reserved: [0; 6],
            status: 0,
            status_flags: 0,
            user_count: 0,
            __out_reserved: [0; 13],
        };

        // SAFETY: arg is a valid fscrypt_get_key_status_arg that outlives the call
        unsafe { fs_ioc_get_encryption_key_status(file.as_raw_fd(), &mut arg) }?;
        Ok(RawKeyStatus {
            status: arg.status,
            status_flags: arg.status_flags,
            user_count: arg.user_count,
        })
    }

    fn session_keyring(&self) -> Result<KeySerial, Errno> {
        // Adding to KEY_SPEC_SESSION_KEYRING directly would create a new
        // session keyring instead of falling back to the user session keyring.
        // SAFETY: keyctl with integer arguments only
        let ret = unsafe {
            libc::syscall(
                libc::SYS_keyctl,
                uapi::KEYCTL_GET_KEYRING_ID,
                uapi::KEY_SPEC_SESSION_KEYRING,
                0,
            )
        };
        Errno::result(ret).map(|id| id as KeySerial)
    }

    fn add_keyring_key(
        &self,
        key_type: &str,
        description: &str,
        payload: &[u8],
        keyring: KeySerial,
    ) -> Result<KeySerial, Errno> {
        let key_type = c_string(key_type)?;
        let description = c_string(description)?;

        // SAFETY: all pointers are valid for the duration of the call
        let ret = unsafe {
            libc::syscall(
                libc::SYS_add_key,
                key_type.as_ptr(),
                description.as_ptr(),
                payload.as_ptr(),
                payload.len(),
                keyring,
            )
        };
        Errno::result(ret).map(|id| id as KeySerial)
    }

    fn search_keyring(
        &self,
        keyring: KeySerial,
        key_type: &str,
        description: &str,
    ) -> Result<Option<KeySerial>, Errno> {
        let key_type = c_string(key_type)?;
        let description = c_string(description)?;

        // SAFETY: all pointers are valid for the duration of the call
        let ret = unsafe {
            libc::syscall(
                libc::SYS_keyctl,
                uapi::KEYCTL_SEARCH,
                keyring,
                key_type.as_ptr(),
                description.as_ptr(),
                0,
            )
        };
        match Errno::result(ret) {
            Ok(id) => Ok(Some(id as KeySerial)),
            Err(Errno::ENOKEY) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn unlink_keyring_key(&self, key: KeySerial, keyring: KeySerial) -> Result<(), Errno> {
        // SAFETY: keyctl with integer arguments only
        let ret = unsafe { libc::syscall(libc::SYS_keyctl, uapi::KEYCTL_UNLINK, key, keyring) };
        Errno::result(ret).map(drop)
    }
}
