//! Configuration management for fscryptctl
//!
//! Everything here is optional: without a config file the built-in defaults
//! (AES-256-XTS / AES-256-CTS, 32 bytes of padding, `fscrypt:` prefix, no
//! logging) apply, which is what the command line documents.

use crate::error::{Error, Result};
use crate::keyring::KeyPrefix;
use crate::policy::{EncryptionMode, Padding, PolicyOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory under the user's config dir
pub const CONFIG_DIR_NAME: &str = "fscryptctl";

/// Config file name
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Default options for `set_policy`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyDefaults {
    /// Contents encryption mode name, e.g. "AES-256-XTS"
    pub contents: String,

    /// Filenames encryption mode name, e.g. "AES-256-CTS"
    pub filenames: String,

    /// Filename padding in bytes (4, 8, 16 or 32)
    pub padding: u32,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        let options = PolicyOptions::default();
        PolicyDefaults {
            contents: options.contents.name().to_string(),
            filenames: options.filenames.name().to_string(),
            padding: options.padding.bytes(),
        }
    }
}

/// Session keyring settings (v1 keys)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeyringConfig {
    /// Description prefix used by `insert_key` when no flag is given
    pub default_prefix: KeyPrefix,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (off, error, warn, info, debug, trace)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "off".to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// `set_policy` defaults
    pub policy: PolicyDefaults,

    /// Keyring settings
    pub keyring: KeyringConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Default config file location, `$XDG_CONFIG_HOME/fscryptctl/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: Config = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from the defaults.
    ///
    /// An explicitly given path must exist; the default path may not.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(path),
                _ => {
                    let mut config = Config::default();
                    config.apply_env_overrides();
                    config.validate()?;
                    Ok(config)
                }
            },
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(level) = get("FSCRYPTCTL_LOG") {
            self.logging.level = level;
        }
        if let Some(mode) = get("FSCRYPTCTL_CONTENTS_MODE") {
            self.policy.contents = mode;
        }
        if let Some(mode) = get("FSCRYPTCTL_FILENAMES_MODE") {
            self.policy.filenames = mode;
        }
        if let Some(padding) = get("FSCRYPTCTL_PADDING") {
            // Unparseable values become 0 so validate() reports them
            self.policy.padding = padding.parse().unwrap_or(0);
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            Error::Config(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path.as_ref(), content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.policy_options()?;
        if self.logging.level.is_empty() {
            return Err(Error::Config("Log level must not be empty".to_string()));
        }
        Ok(())
    }

    /// `set_policy` options before command-line overrides
    pub fn policy_options(&self) -> Result<PolicyOptions> {
        let contents = self
            .policy
            .contents
            .parse::<EncryptionMode>()
            .map_err(|_| {
                Error::Config(format!("Unknown contents mode: {}", self.policy.contents))
            })?;
        let filenames = self
            .policy
            .filenames
            .parse::<EncryptionMode>()
            .map_err(|_| {
                Error::Config(format!("Unknown filenames mode: {}", self.policy.filenames))
            })?;
        let padding = Padding::from_byte_count(self.policy.padding).ok_or_else(|| {
            Error::Config(format!("Invalid padding: {}", self.policy.padding))
        })?;

        Ok(PolicyOptions {
            contents,
            filenames,
            padding,
            ..Default::default()
        })
    }
}
