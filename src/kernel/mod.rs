//! Kernel interface
//!
//! Every piece of kernel-owned state this crate touches (policies on inodes,
//! the per-filesystem keyring, the session keyring) goes through the
//! `Kernel` trait. Implementations return raw errno values; translating them
//! into user-facing errors is left to the policy and keyring layers.
//!
//! - `LinuxKernel`: ioctls and keyctl syscalls
//! - `MemoryKernel`: in-process model of the same state machine, for tests

mod linux;
mod memory;
pub mod uapi;

pub use linux::LinuxKernel;
pub use memory::MemoryKernel;

use crate::crypto::KEY_IDENTIFIER_SIZE;
use nix::errno::Errno;
use std::path::Path;

/// Serial number of a key in the kernel's key management facility
pub type KeySerial = i32;

/// Failure of a kernel call on a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    /// The path could not be opened
    Open(Errno),
    /// The ioctl or syscall itself failed
    Call(Errno),
}

impl From<Errno> for SysError {
    fn from(errno: Errno) -> Self {
        SysError::Call(errno)
    }
}

pub type SysResult<T> = std::result::Result<T, SysError>;

/// Raw output of FS_IOC_GET_ENCRYPTION_KEY_STATUS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawKeyStatus {
    pub status: u32,
    pub status_flags: u32,
    pub user_count: u32,
}

/// Kernel calls used by fscryptctl
pub trait Kernel {
    /// FS_IOC_GET_ENCRYPTION_POLICY_EX (falling back to the v1-only ioctl).
    /// Returns the policy record as sized by the kernel.
    fn get_policy(&self, path: &Path) -> SysResult<Vec<u8>>;

    /// FS_IOC_SET_ENCRYPTION_POLICY
    fn set_policy(&self, path: &Path, policy: &[u8]) -> SysResult<()>;

    /// FS_IOC_ADD_ENCRYPTION_KEY; returns the identifier computed by the kernel
    fn add_key(&self, mountpoint: &Path, raw: &[u8]) -> SysResult<[u8; KEY_IDENTIFIER_SIZE]>;

    /// FS_IOC_REMOVE_ENCRYPTION_KEY{,_ALL_USERS}; returns the removal status flags
    fn remove_key(
        &self,
        mountpoint: &Path,
        identifier: &[u8; KEY_IDENTIFIER_SIZE],
        all_users: bool,
    ) -> SysResult<u32>;

    /// FS_IOC_GET_ENCRYPTION_KEY_STATUS
    fn key_status(
        &self,
        mountpoint: &Path,
        identifier: &[u8; KEY_IDENTIFIER_SIZE],
    ) -> SysResult<RawKeyStatus>;

    /// keyctl(KEYCTL_GET_KEYRING_ID, KEY_SPEC_SESSION_KEYRING, 0).
    /// Resolves to the user session keyring when no session keyring exists.
    fn session_keyring(&self) -> Result<KeySerial, Errno>;

    /// add_key(2)
    fn add_keyring_key(
        &self,
        key_type: &str,
        description: &str,
        payload: &[u8],
        keyring: KeySerial,
    ) -> Result<KeySerial, Errno>;

    /// keyctl(KEYCTL_SEARCH); `Ok(None)` when nothing matches
    fn search_keyring(
        &self,
        keyring: KeySerial,
        key_type: &str,
        description: &str,
    ) -> Result<Option<KeySerial>, Errno>;

    /// keyctl(KEYCTL_UNLINK)
    fn unlink_keyring_key(&self, key: KeySerial, keyring: KeySerial) -> Result<(), Errno>;
}
