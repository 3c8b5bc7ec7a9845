//! Error types for fscryptctl
//!
//! The `Display` form of every variant is the exact single-line diagnostic
//! printed after the `error: ` prefix, so messages must stay free of volatile
//! values.

use nix::errno::Errno;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fscryptctl
#[derive(Error, Debug)]
pub enum Error {
    // Argument errors
    #[error("{0}")]
    Argument(String),

    #[error("no command specified")]
    NoCommand,

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    // Key reference errors
    #[error("invalid key specifier: {0}")]
    InvalidKeySpecifier(String),

    #[error("invalid key descriptor: {0}")]
    InvalidKeyDescriptor(String),

    #[error("invalid key identifier: {0}")]
    InvalidKeyIdentifier(String),

    // Key material errors
    #[error("key was too short; it must be at least {min} bytes")]
    KeyTooShort { min: usize },

    #[error("key was too long; it can be at most {max} bytes")]
    KeyTooLong { max: usize },

    #[error("{mode} needs a key of at least {required} bytes, got {got}")]
    KeyIncompatible {
        mode: &'static str,
        required: usize,
        got: usize,
    },

    // Path errors
    #[error("opening {0}: No such file or directory")]
    PathNotFound(String),

    #[error("opening {path}: {reason}")]
    Open { path: String, reason: String },

    // Policy errors
    #[error("getting policy for {0}: file or directory not encrypted")]
    NotEncrypted(String),

    #[error("getting policy for {0}: file or directory uses an unrecognized encryption policy version")]
    UnrecognizedPolicyVersion(String),

    #[error("getting policy for {path}: {reason}")]
    GetPolicy { path: String, reason: String },

    #[error("getting policy for {path}: invalid encryption policy: {reason}")]
    InvalidStoredPolicy { path: String, reason: String },

    #[error("setting policy for {0}: file or directory already encrypted")]
    AlreadyEncrypted(String),

    #[error("setting policy for {0}: Directory not empty")]
    DirectoryNotEmpty(String),

    #[error("setting policy for {0}: invalid encryption options provided")]
    InvalidEncryptionOptions(String),

    #[error("setting policy for {path}: {reason}")]
    SetPolicy { path: String, reason: String },

    #[error("invalid padding: {0}")]
    InvalidPadding(String),

    #[error("invalid {kind} mode: {value}")]
    InvalidMode { kind: &'static str, value: String },

    #[error("invalid encryption policy: {0}")]
    InvalidPolicy(String),

    #[error("unsupported encryption options: {0}")]
    UnsupportedOptions(String),

    // Keyring errors
    #[error("removing key: Required key not available")]
    KeyNotAvailable,

    #[error("removing key: {0}")]
    RemoveKey(String),

    #[error("adding key to {path}: {reason}")]
    AddKey { path: String, reason: String },

    #[error("getting key status: {0}")]
    KeyStatus(String),

    #[error("inserting key: {0}")]
    InsertKey(String),

    // Config errors
    #[error("configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Build the error for a failed `open()` of a user-supplied path.
    pub fn open(path: &Path, errno: Errno) -> Self {
        let path = path.display().to_string();
        match errno {
            Errno::ENOENT => Error::PathNotFound(path),
            errno => Error::Open {
                path,
                reason: errno.desc().to_string(),
            },
        }
    }
}

/// Describes errno values shared by all the fscrypt ioctls.
pub fn describe_fscrypt_error(errno: Errno) -> String {
    match errno {
        Errno::ENOTTY => "your kernel is too old to support filesystem encryption, or the \
                          filesystem you are using does not support encryption"
            .to_string(),
        Errno::EOPNOTSUPP => "filesystem encryption has been disabled in the kernel config, or \
                              you need to enable encryption on your filesystem (see the README \
                              for more detailed instructions)."
            .to_string(),
        errno => errno.desc().to_string(),
    }
}

/// Describes errno values of the filesystem-keyring ioctls, which only exist
/// on Linux 5.4 and later.
pub fn describe_fscrypt_v2_error(errno: Errno) -> String {
    if errno == Errno::ENOTTY && kernel_older_than(5, 4) {
        return "ioctl not implemented.  Your kernel may be too old to support all the \
                fscrypt ioctls.  Please upgrade to Linux 5.4 or later."
            .to_string();
    }
    describe_fscrypt_error(errno)
}

fn kernel_older_than(major: u32, minor: u32) -> bool {
    let Ok(uts) = nix::sys::utsname::uname() else {
        return false;
    };
    match parse_release(&uts.release().to_string_lossy()) {
        Some(version) => version < (major, minor),
        None => false,
    }
}

/// Parse the leading "major.minor" of a kernel release string.
fn parse_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts
        .next()?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    Some((major, minor.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_error_messages() {
        let err = Error::open(Path::new("NONEXISTENT"), Errno::ENOENT);
        assert_eq!(err.to_string(), "opening NONEXISTENT: No such file or directory");

        let err = Error::open(Path::new("/root"), Errno::EACCES);
        assert_eq!(err.to_string(), "opening /root: Permission denied");
    }

    #[test]
    fn test_policy_messages() {
        assert_eq!(
            Error::NotEncrypted("TEST_DIR".into()).to_string(),
            "getting policy for TEST_DIR: file or directory not encrypted"
        );
        assert_eq!(
            Error::AlreadyEncrypted("TEST_DIR".into()).to_string(),
            "setting policy for TEST_DIR: file or directory already encrypted"
        );
        assert_eq!(
            Error::InvalidMode { kind: "contents", value: "foo".into() }.to_string(),
            "invalid contents mode: foo"
        );
        assert_eq!(
            Error::KeyNotAvailable.to_string(),
            "removing key: Required key not available"
        );
    }

    #[test]
    fn test_describe_fscrypt_error() {
        assert!(describe_fscrypt_error(Errno::ENOTTY).starts_with("your kernel is too old"));
        assert_eq!(describe_fscrypt_error(Errno::ENOKEY), "Required key not available");
    }

    #[test]
    fn test_parse_release() {
        assert_eq!(parse_release("5.4.0-42-generic"), Some((5, 4)));
        assert_eq!(parse_release("6.18.44-fc-v139"), Some((6, 18)));
        assert_eq!(parse_release("4.19rc1"), Some((4, 19)));
        assert_eq!(parse_release("garbage"), None);
    }
}
