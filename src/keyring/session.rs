//! v1 keys in the session keyring

use super::{KeyPrefix, KeyStatus, RemovalOutcome};
use crate::crypto::{KeyDescriptor, KeyMaterial, MAX_KEY_SIZE};
use crate::error::{Error, Result};
use crate::kernel::{KeySerial, Kernel};
use tracing::debug;
use zeroize::Zeroizing;

/// Key type the kernel looks up v1 master keys under
const LOGON_KEY_TYPE: &str = "logon";

fn description(descriptor: &KeyDescriptor, prefix: KeyPrefix) -> String {
    format!("{}{}", prefix.as_str(), descriptor)
}

/// Serialize a legacy `struct fscrypt_key { u32 mode; u8 raw[64]; u32 size; }`
fn logon_payload(key: &KeyMaterial) -> Zeroizing<Vec<u8>> {
    let mut payload = Zeroizing::new(Vec::with_capacity(8 + MAX_KEY_SIZE));
    payload.extend_from_slice(&0u32.to_ne_bytes());
    payload.extend_from_slice(key.as_bytes());
    payload.resize(4 + MAX_KEY_SIZE, 0);
    payload.extend_from_slice(&(key.len() as u32).to_ne_bytes());
    payload
}

pub(super) fn add<K: Kernel + ?Sized>(
    kernel: &K,
    key: &KeyMaterial,
    prefix: KeyPrefix,
) -> Result<KeyDescriptor> {
    let descriptor = key.descriptor();
    let insert_error = |e: nix::errno::Errno| Error::InsertKey(e.desc().to_string());

    let keyring = kernel.session_keyring().map_err(insert_error)?;
    let desc = description(&descriptor, prefix);
    let serial = kernel
        .add_keyring_key(LOGON_KEY_TYPE, &desc, &logon_payload(key), keyring)
        .map_err(insert_error)?;

    debug!("inserted {} as key {} into keyring {}", desc, serial, keyring);
    Ok(descriptor)
}

pub(super) fn search<K: Kernel + ?Sized>(
    kernel: &K,
    descriptor: &KeyDescriptor,
    prefix: KeyPrefix,
) -> Result<Option<KeySerial>> {
    let keyring = kernel
        .session_keyring()
        .map_err(|e| Error::KeyStatus(e.desc().to_string()))?;
    kernel
        .search_keyring(keyring, LOGON_KEY_TYPE, &description(descriptor, prefix))
        .map_err(|e| Error::KeyStatus(e.desc().to_string()))
}

pub(super) fn status<K: Kernel + ?Sized>(
    kernel: &K,
    descriptor: &KeyDescriptor,
    prefix: KeyPrefix,
) -> Result<KeyStatus> {
    Ok(match search(kernel, descriptor, prefix)? {
        Some(_) => KeyStatus::Present {
            user_count: 0,
            added_by_self: false,
            unknown_flags: 0,
        },
        None => KeyStatus::Absent,
    })
}

pub(super) fn remove<K: Kernel + ?Sized>(
    kernel: &K,
    descriptor: &KeyDescriptor,
    prefix: KeyPrefix,
) -> Result<RemovalOutcome> {
    let remove_error = |e: nix::errno::Errno| Error::RemoveKey(e.desc().to_string());

    let keyring = kernel.session_keyring().map_err(remove_error)?;
    let desc = description(descriptor, prefix);
    let serial = kernel
        .search_keyring(keyring, LOGON_KEY_TYPE, &desc)
        .map_err(remove_error)?
        .ok_or(Error::KeyNotAvailable)?;

    kernel
        .unlink_keyring_key(serial, keyring)
        .map_err(remove_error)?;
    debug!("unlinked {} (key {}) from keyring {}", desc, serial, keyring);

    // Files already unlocked with a v1 key stay readable until evicted; the
    // keyring gives no way to tell.
    Ok(RemovalOutcome::Removed)
}
