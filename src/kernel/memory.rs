//! In-memory kernel model
//!
//! Models one encryption-capable filesystem plus the caller's session
//! keyring, closely enough to exercise the same errno paths as the real
//! kernel: policies are set once on empty directories, v2 keys are
//! reference-counted by open files, and removing a busy key leaves it
//! "incompletely removed" until the last file is closed.

use crate::crypto::{KeyMaterial, KeyReference, KEY_IDENTIFIER_SIZE, MAX_KEY_SIZE};
use crate::kernel::uapi;
use crate::kernel::{KeySerial, Kernel, RawKeyStatus, SysError, SysResult};
use crate::keyring::KeyPrefix;
use crate::policy::{EncryptionPolicy, IvDerivation};
use nix::errno::Errno;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::trace;
use zeroize::Zeroizing;

/// First serial handed out for keyring keys
const FIRST_SERIAL: KeySerial = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Directory,
    File,
}

struct Node {
    kind: NodeKind,
    /// Encoded policy, trimmed to its version's record size
    policy: Option<Vec<u8>>,
    open_count: u32,
}

struct FilesystemKey {
    raw: Zeroizing<Vec<u8>>,
    open_files: u32,
    removed: bool,
    added_by_self: bool,
    /// Claims held by users other than the caller
    other_users: u32,
}

impl FilesystemKey {
    fn new() -> Self {
        FilesystemKey {
            raw: Zeroizing::new(Vec::new()),
            open_files: 0,
            removed: false,
            added_by_self: false,
            other_users: 0,
        }
    }
}

struct KeyringEntry {
    keyring: KeySerial,
    key_type: String,
    description: String,
    payload: Zeroizing<Vec<u8>>,
}

struct State {
    nodes: BTreeMap<PathBuf, Node>,
    fs_keys: HashMap<[u8; KEY_IDENTIFIER_SIZE], FilesystemKey>,
    keyring_keys: BTreeMap<KeySerial, KeyringEntry>,
    session_keyring: KeySerial,
    next_serial: KeySerial,
    stable_inodes: bool,
}

impl State {
    fn node(&self, path: &Path) -> SysResult<&Node> {
        self.nodes.get(path).ok_or(SysError::Open(Errno::ENOENT))
    }

    fn has_children(&self, path: &Path) -> bool {
        self.nodes.keys().any(|p| p.parent() == Some(path))
    }

    fn alloc_serial(&mut self) -> KeySerial {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    /// Raw bytes of the key a policy refers to, if the key is usable
    fn policy_key(&self, policy: &EncryptionPolicy) -> Option<Vec<u8>> {
        match &policy.key {
            KeyReference::Identifier(id) => self
                .fs_keys
                .get(id.as_bytes())
                .filter(|k| !k.removed)
                .map(|k| k.raw.to_vec()),
            KeyReference::Descriptor(d) => {
                let wanted: Vec<String> = KeyPrefix::ALL
                    .iter()
                    .map(|p| format!("{}{}", p.as_str(), d))
                    .collect();
                self.keyring_keys
                    .values()
                    .find(|e| e.key_type == "logon" && wanted.contains(&e.description))
                    .and_then(|e| logon_payload_key(&e.payload))
            }
        }
    }
}

/// Extract the raw key from a legacy `struct fscrypt_key` payload
fn logon_payload_key(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() != std::mem::size_of::<uapi::fscrypt_key>() {
        return None;
    }
    let size_offset = 4 + MAX_KEY_SIZE;
    let size = u32::from_ne_bytes(payload[size_offset..size_offset + 4].try_into().ok()?) as usize;
    if size > MAX_KEY_SIZE {
        return None;
    }
    Some(payload[4..4 + size].to_vec())
}

/// In-process stand-in for the kernel
pub struct MemoryKernel {
    state: Mutex<State>,
}

impl Default for MemoryKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKernel {
    /// Create a kernel with an empty root directory and a session keyring
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            PathBuf::from("/"),
            Node {
                kind: NodeKind::Directory,
                policy: None,
                open_count: 0,
            },
        );

        MemoryKernel {
            state: Mutex::new(State {
                nodes,
                fs_keys: HashMap::new(),
                keyring_keys: BTreeMap::new(),
                session_keyring: FIRST_SERIAL - 1,
                next_serial: FIRST_SERIAL,
                stable_inodes: false,
            }),
        }
    }

    /// Allow IV_INO_LBLK_* policies, like a filesystem formatted with
    /// `-O stable_inodes`
    pub fn set_stable_inodes(&self, enabled: bool) {
        self.state.lock().stable_inodes = enabled;
    }

    /// Create a directory; the parent must exist
    pub fn mkdir(&self, path: impl AsRef<Path>) -> Result<(), Errno> {
        self.create(path.as_ref(), NodeKind::Directory)
    }

    /// Create a regular file; inside an encrypted directory this needs the
    /// directory's key to be present and long enough for its modes
    pub fn create_file(&self, path: impl AsRef<Path>) -> Result<(), Errno> {
        self.create(path.as_ref(), NodeKind::File)
    }

    /// Remove a file or directory tree
    pub fn remove_all(&self, path: impl AsRef<Path>) -> Result<(), Errno> {
        let path = path.as_ref();
        let mut state = self.state.lock();
        if !state.nodes.contains_key(path) {
            return Err(Errno::ENOENT);
        }
        let doomed: Vec<PathBuf> = state
            .nodes
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        if doomed.iter().any(|p| state.nodes[p].open_count > 0) {
            return Err(Errno::EBUSY);
        }
        for p in doomed {
            state.nodes.remove(&p);
        }
        Ok(())
    }

    /// Open a file, pinning its v2 key while it stays open
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<(), Errno> {
        let path = path.as_ref();
        let mut state = self.state.lock();
        let policy = {
            let node = state.nodes.get(path).ok_or(Errno::ENOENT)?;
            node.policy.as_deref().map(EncryptionPolicy::decode)
        };

        if let Some(policy) = policy {
            let policy = policy.map_err(|_| Errno::EINVAL)?;
            if state.policy_key(&policy).is_none() {
                return Err(Errno::ENOKEY);
            }
            if let KeyReference::Identifier(id) = policy.key {
                if let Some(key) = state.fs_keys.get_mut(id.as_bytes()) {
                    key.open_files += 1;
                }
            }
        }

        if let Some(node) = state.nodes.get_mut(path) {
            node.open_count += 1;
        }
        Ok(())
    }

    /// Close a file opened with `open_file`, releasing its key reference.
    ///
    /// An incompletely removed key disappears when its last file closes.
    pub fn close_file(&self, path: impl AsRef<Path>) -> Result<(), Errno> {
        let path = path.as_ref();
        let mut state = self.state.lock();
        let policy = {
            let node = state.nodes.get_mut(path).ok_or(Errno::ENOENT)?;
            if node.open_count == 0 {
                return Err(Errno::EBADF);
            }
            node.open_count -= 1;
            node.policy.as_deref().map(EncryptionPolicy::decode)
        };

        if let Some(Ok(EncryptionPolicy {
            key: KeyReference::Identifier(id),
            ..
        })) = policy
        {
            let drop_key = match state.fs_keys.get_mut(id.as_bytes()) {
                Some(key) => {
                    key.open_files = key.open_files.saturating_sub(1);
                    key.removed && key.open_files == 0
                }
                None => false,
            };
            if drop_key {
                trace!("last file closed, key {} now absent", id);
                state.fs_keys.remove(id.as_bytes());
            }
        }
        Ok(())
    }

    /// Add a v2 key on behalf of another user, who then holds a claim the
    /// caller can only drop with `all_users`
    pub fn add_key_for_other_user(
        &self,
        mountpoint: impl AsRef<Path>,
        raw: &[u8],
    ) -> Result<[u8; KEY_IDENTIFIER_SIZE], Errno> {
        let mut state = self.state.lock();
        if !state.nodes.contains_key(mountpoint.as_ref()) {
            return Err(Errno::ENOENT);
        }

        let key = KeyMaterial::new(raw).map_err(|_| Errno::EINVAL)?;
        let identifier = *key.identifier().as_bytes();
        let entry = state
            .fs_keys
            .entry(identifier)
            .or_insert_with(FilesystemKey::new);
        entry.raw = Zeroizing::new(raw.to_vec());
        entry.removed = false;
        entry.other_users += 1;
        Ok(identifier)
    }

    /// Number of keyring keys linked into the session keyring
    pub fn session_key_count(&self) -> usize {
        let state = self.state.lock();
        let ring = state.session_keyring;
        state
            .keyring_keys
            .values()
            .filter(|e| e.keyring == ring)
            .count()
    }

    fn create(&self, path: &Path, kind: NodeKind) -> Result<(), Errno> {
        let mut state = self.state.lock();
        if state.nodes.contains_key(path) {
            return Err(Errno::EEXIST);
        }
        let parent = path.parent().ok_or(Errno::EEXIST)?;
        let parent_node = state.nodes.get(parent).ok_or(Errno::ENOENT)?;
        if parent_node.kind != NodeKind::Directory {
            return Err(Errno::ENOTDIR);
        }

        let inherited = match parent_node.policy.as_deref() {
            Some(bytes) => {
                let policy = EncryptionPolicy::decode(bytes).map_err(|_| Errno::EINVAL)?;
                let raw = state.policy_key(&policy).ok_or(Errno::ENOKEY)?;
                let key = KeyMaterial::new(&raw).map_err(|_| Errno::EINVAL)?;
                policy.check_key(&key).map_err(|_| Errno::EINVAL)?;
                Some(bytes.to_vec())
            }
            None => None,
        };

        state.nodes.insert(
            path.to_path_buf(),
            Node {
                kind,
                policy: inherited,
                open_count: 0,
            },
        );
        Ok(())
    }
}

impl Kernel for MemoryKernel {
    fn get_policy(&self, path: &Path) -> SysResult<Vec<u8>> {
        let state = self.state.lock();
        state
            .node(path)?
            .policy
            .clone()
            .ok_or(SysError::Call(Errno::ENODATA))
    }

    fn set_policy(&self, path: &Path, policy: &[u8]) -> SysResult<()> {
        let mut state = self.state.lock();
        let node = state.node(path)?;

        let requested = EncryptionPolicy::decode(policy).map_err(|_| Errno::EINVAL)?;
        if let Some(existing) = node.policy.as_deref() {
            let existing = EncryptionPolicy::decode(existing).map_err(|_| Errno::EINVAL)?;
            return if existing == requested {
                Ok(())
            } else {
                Err(Errno::EEXIST.into())
            };
        }

        if node.kind != NodeKind::Directory {
            return Err(Errno::ENOTDIR.into());
        }
        if state.has_children(path) {
            return Err(Errno::ENOTEMPTY.into());
        }
        if requested.validate().is_err() {
            return Err(Errno::EINVAL.into());
        }
        if requested.flags.iv != IvDerivation::PerFile && !state.stable_inodes {
            return Err(Errno::EINVAL.into());
        }
        if let KeyReference::Identifier(id) = requested.key {
            let added = state.fs_keys.get(id.as_bytes()).is_some_and(|k| !k.removed);
            if !added {
                return Err(Errno::ENOKEY.into());
            }
        }

        let record = requested.encode()[..requested.version().record_size()].to_vec();
        if let Some(node) = state.nodes.get_mut(path) {
            node.policy = Some(record);
        }
        Ok(())
    }

    fn add_key(&self, mountpoint: &Path, raw: &[u8]) -> SysResult<[u8; KEY_IDENTIFIER_SIZE]> {
        let mut state = self.state.lock();
        state.node(mountpoint)?;

        let key = KeyMaterial::new(raw).map_err(|_| Errno::EINVAL)?;
        let identifier = *key.identifier().as_bytes();

        let entry = state
            .fs_keys
            .entry(identifier)
            .or_insert_with(FilesystemKey::new);
        entry.raw = Zeroizing::new(raw.to_vec());
        entry.removed = false;
        entry.added_by_self = true;
        Ok(identifier)
    }

    fn remove_key(
        &self,
        mountpoint: &Path,
        identifier: &[u8; KEY_IDENTIFIER_SIZE],
        all_users: bool,
    ) -> SysResult<u32> {
        let mut state = self.state.lock();
        state.node(mountpoint)?;

        let key = state
            .fs_keys
            .get_mut(identifier)
            .ok_or(SysError::Call(Errno::ENOKEY))?;

        // An incompletely removed key has no claims left; removing it again
        // only retries the eviction.
        if !key.removed {
            if all_users {
                key.other_users = 0;
            } else if !key.added_by_self {
                return Err(Errno::ENOKEY.into());
            }
            key.added_by_self = false;
            if key.other_users > 0 {
                return Ok(uapi::FSCRYPT_KEY_REMOVAL_STATUS_FLAG_OTHER_USERS);
            }
        }

        if key.open_files > 0 {
            key.removed = true;
            return Ok(uapi::FSCRYPT_KEY_REMOVAL_STATUS_FLAG_FILES_BUSY);
        }
        state.fs_keys.remove(identifier);
        Ok(0)
    }

    fn key_status(
        &self,
        mountpoint: &Path,
        identifier: &[u8; KEY_IDENTIFIER_SIZE],
    ) -> SysResult<RawKeyStatus> {
        let state = self.state.lock();
        state.node(mountpoint)?;

        Ok(match state.fs_keys.get(identifier) {
            None => RawKeyStatus {
                status: uapi::FSCRYPT_KEY_STATUS_ABSENT,
                ..Default::default()
            },
            Some(key) if key.removed => RawKeyStatus {
                status: uapi::FSCRYPT_KEY_STATUS_INCOMPLETELY_REMOVED,
                ..Default::default()
            },
            Some(key) => RawKeyStatus {
                status: uapi::FSCRYPT_KEY_STATUS_PRESENT,
                status_flags: if key.added_by_self {
                    uapi::FSCRYPT_KEY_STATUS_FLAG_ADDED_BY_SELF
                } else {
                    0
                },
                user_count: u32::from(key.added_by_self) + key.other_users,
            },
        })
    }

    fn session_keyring(&self) -> Result<KeySerial, Errno> {
        Ok(self.state.lock().session_keyring)
    }

    fn add_keyring_key(
        &self,
        key_type: &str,
        description: &str,
        payload: &[u8],
        keyring: KeySerial,
    ) -> Result<KeySerial, Errno> {
        let mut state = self.state.lock();
        if keyring != state.session_keyring {
            return Err(Errno::EINVAL);
        }

        let existing = state.keyring_keys.iter().find_map(|(serial, e)| {
            (e.keyring == keyring && e.key_type == key_type && e.description == description)
                .then_some(*serial)
        });
        let serial = match existing {
            Some(serial) => serial,
            None => state.alloc_serial(),
        };
        state.keyring_keys.insert(
            serial,
            KeyringEntry {
                keyring,
                key_type: key_type.to_string(),
                description: description.to_string(),
                payload: Zeroizing::new(payload.to_vec()),
            },
        );
        Ok(serial)
    }

    fn search_keyring(
        &self,
        keyring: KeySerial,
        key_type: &str,
        description: &str,
    ) -> Result<Option<KeySerial>, Errno> {
        let state = self.state.lock();
        if keyring != state.session_keyring {
            return Err(Errno::EINVAL);
        }
        Ok(state.keyring_keys.iter().find_map(|(serial, e)| {
            (e.keyring == keyring && e.key_type == key_type && e.description == description)
                .then_some(*serial)
        }))
    }

    fn unlink_keyring_key(&self, key: KeySerial, keyring: KeySerial) -> Result<(), Errno> {
        let mut state = self.state.lock();
        match state.keyring_keys.get(&key) {
            Some(e) if e.keyring == keyring => {
                state.keyring_keys.remove(&key);
                Ok(())
            }
            _ => Err(Errno::ENOENT),
        }
    }
}
