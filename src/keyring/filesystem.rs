//! v2 keys in a filesystem's keyring

use super::{KeyStatus, RemovalOutcome};
use crate::crypto::{KeyIdentifier, KeyMaterial};
use crate::error::{describe_fscrypt_v2_error, Error, Result};
use crate::kernel::{uapi, Kernel, SysError};
use std::path::Path;
use tracing::{debug, warn};

pub(super) fn add<K: Kernel + ?Sized>(
    kernel: &K,
    key: &KeyMaterial,
    mountpoint: &Path,
) -> Result<KeyIdentifier> {
    let raw = kernel
        .add_key(mountpoint, key.as_bytes())
        .map_err(|e| match e {
            SysError::Open(errno) => Error::open(mountpoint, errno),
            SysError::Call(errno) => Error::AddKey {
                path: mountpoint.display().to_string(),
                reason: describe_fscrypt_v2_error(errno),
            },
        })?;

    let identifier = KeyIdentifier::from_bytes(raw);
    let expected = key.identifier();
    if identifier != expected {
        warn!(
            "kernel returned identifier {}, expected {}",
            identifier, expected
        );
    }
    debug!("added key {} to {}", identifier, mountpoint.display());
    Ok(identifier)
}

pub(super) fn remove<K: Kernel + ?Sized>(
    kernel: &K,
    identifier: &KeyIdentifier,
    mountpoint: &Path,
    all_users: bool,
) -> Result<RemovalOutcome> {
    let flags = kernel
        .remove_key(mountpoint, identifier.as_bytes(), all_users)
        .map_err(|e| match e {
            SysError::Open(errno) => Error::open(mountpoint, errno),
            SysError::Call(nix::errno::Errno::ENOKEY) => Error::KeyNotAvailable,
            SysError::Call(errno) => Error::RemoveKey(describe_fscrypt_v2_error(errno)),
        })?;

    debug!(
        "removed key {} from {} (status flags {:#x})",
        identifier,
        mountpoint.display(),
        flags
    );
    Ok(outcome_from_flags(flags))
}

/// Other users' claims take precedence over busy files, since the key is
/// not even incompletely removed while they remain.
fn outcome_from_flags(flags: u32) -> RemovalOutcome {
    if flags & uapi::FSCRYPT_KEY_REMOVAL_STATUS_FLAG_OTHER_USERS != 0 {
        RemovalOutcome::OtherUsersRemain
    } else if flags & uapi::FSCRYPT_KEY_REMOVAL_STATUS_FLAG_FILES_BUSY != 0 {
        RemovalOutcome::StillInUse
    } else {
        RemovalOutcome::Removed
    }
}

pub(super) fn status<K: Kernel + ?Sized>(
    kernel: &K,
    identifier: &KeyIdentifier,
    mountpoint: &Path,
) -> Result<KeyStatus> {
    let raw = kernel
        .key_status(mountpoint, identifier.as_bytes())
        .map_err(|e| match e {
            SysError::Open(errno) => Error::open(mountpoint, errno),
            SysError::Call(errno) => Error::KeyStatus(describe_fscrypt_v2_error(errno)),
        })?;

    Ok(match raw.status {
        uapi::FSCRYPT_KEY_STATUS_ABSENT => KeyStatus::Absent,
        uapi::FSCRYPT_KEY_STATUS_PRESENT => KeyStatus::Present {
            user_count: raw.user_count,
            added_by_self: raw.status_flags & uapi::FSCRYPT_KEY_STATUS_FLAG_ADDED_BY_SELF != 0,
            unknown_flags: raw.status_flags & !uapi::FSCRYPT_KEY_STATUS_FLAG_ADDED_BY_SELF,
        },
        uapi::FSCRYPT_KEY_STATUS_INCOMPLETELY_REMOVED => KeyStatus::IncompletelyRemoved,
        other => KeyStatus::Unknown(other),
    })
}
