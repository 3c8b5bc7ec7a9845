//! fscrypt and keyctl user API, see <linux/fscrypt.h> and <linux/keyctl.h>

#![allow(non_camel_case_types)]

use crate::crypto::{KEY_IDENTIFIER_SIZE, MAX_KEY_SIZE};
use crate::policy::POLICY_MAX_SIZE;

pub const FSCRYPT_KEY_SPEC_TYPE_IDENTIFIER: u32 = 2;

pub const FSCRYPT_KEY_REMOVAL_STATUS_FLAG_FILES_BUSY: u32 = 0x00000001;
pub const FSCRYPT_KEY_REMOVAL_STATUS_FLAG_OTHER_USERS: u32 = 0x00000002;

pub const FSCRYPT_KEY_STATUS_ABSENT: u32 = 1;
pub const FSCRYPT_KEY_STATUS_PRESENT: u32 = 2;
pub const FSCRYPT_KEY_STATUS_INCOMPLETELY_REMOVED: u32 = 3;
pub const FSCRYPT_KEY_STATUS_FLAG_ADDED_BY_SELF: u32 = 0x00000001;

pub const KEY_SPEC_SESSION_KEYRING: i32 = -3;
pub const KEYCTL_GET_KEYRING_ID: libc::c_int = 0;
pub const KEYCTL_UNLINK: libc::c_int = 9;
pub const KEYCTL_SEARCH: libc::c_int = 10;

/// Legacy `struct fscrypt_key`, the payload of v1 "logon" keys
#[repr(C)]
pub struct fscrypt_key {
    pub mode: u32,
    pub raw: [u8; MAX_KEY_SIZE],
    pub size: u32,
}

#[repr(C)]
pub struct fscrypt_key_specifier {
    pub type_: u32,
    pub __reserved: u32,
    /// Union of descriptor[8], identifier[16] and __reserved[32]
    pub u: [u8; 32],
}

impl fscrypt_key_specifier {
    pub fn identifier(identifier: &[u8; KEY_IDENTIFIER_SIZE]) -> Self {
        let mut u = [0u8; 32];
        u[..KEY_IDENTIFIER_SIZE].copy_from_slice(identifier);
        fscrypt_key_specifier {
            type_: FSCRYPT_KEY_SPEC_TYPE_IDENTIFIER,
            __reserved: 0,
            u,
        }
    }
}

/// `struct fscrypt_add_key_arg` followed by its flexible `raw[]` member
#[repr(C)]
pub struct fscrypt_add_key_arg {
    pub key_spec: fscrypt_key_specifier,
    pub raw_size: u32,
    pub key_id: u32,
    pub __reserved: [u32; 8],
    pub raw: [u8; MAX_KEY_SIZE],
}

#[repr(C)]
pub struct fscrypt_remove_key_arg {
    pub key_spec: fscrypt_key_specifier,
    pub removal_status_flags: u32,
    pub __reserved: [u32; 5],
}

#[repr(C)]
pub struct fscrypt_get_key_status_arg {
    pub key_spec: fscrypt_key_specifier,
    pub __reserved: [u32; 6],
    pub status: u32,
    pub status_flags: u32,
    pub user_count: u32,
    pub __out_reserved: [u32; 13],
}

#[repr(C)]
pub struct fscrypt_get_policy_ex_arg {
    pub policy_size: u64,
    pub policy: [u8; POLICY_MAX_SIZE],
}

/// Size the kernel encodes into FS_IOC_ADD_ENCRYPTION_KEY (without `raw[]`)
pub const ADD_KEY_ARG_HEADER_SIZE: usize = 80;

/// Size the kernel encodes into FS_IOC_{GET,SET}_ENCRYPTION_POLICY
pub const POLICY_V1_IOCTL_SIZE: usize = 12;

/// Size the kernel encodes into FS_IOC_GET_ENCRYPTION_POLICY_EX (`__u8[9]`)
pub const GET_POLICY_EX_IOCTL_SIZE: usize = 9;

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_struct_layouts() {
        assert_eq!(size_of::<fscrypt_key_specifier>(), 40);
        assert_eq!(offset_of!(fscrypt_add_key_arg, raw), ADD_KEY_ARG_HEADER_SIZE);
        assert_eq!(size_of::<fscrypt_remove_key_arg>(), 64);
        assert_eq!(size_of::<fscrypt_get_key_status_arg>(), 128);
        assert_eq!(size_of::<fscrypt_key>(), 72);
        assert_eq!(offset_of!(fscrypt_get_policy_ex_arg, policy), 8);
    }
}
