//! Store configuration
//!
//! Configuration can be written in TOML:
//!
//! ```toml
//! max_size = 4096
//! max_changes = 1024
//! max_buffered_changes = 256
//! synchronizer = "8:CX"
//! logging = false
//! ```
//!
//! Missing keys take their defaults.

use std::path::Path;

use kstore_concurrency::{SpecError, SynchronizerSpec};
use kstore_storage::{
    CacheConfig, DEFAULT_MAX_BUFFERED_CHANGES, DEFAULT_MAX_CHANGES, DEFAULT_MAX_SIZE,
};
use serde::Deserialize;
use thiserror::Error;

/// Default synchronizer: ten concurrent transactions, one of them read-write
pub const DEFAULT_SYNCHRONIZER: &str = "10:1";

/// Errors raised while loading or validating a [`StoreConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The text is not valid TOML for a [`StoreConfig`]
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The synchronizer specification is invalid
    #[error(transparent)]
    Synchronizer(#[from] SpecError),

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for kstore_core::Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Io(e) => kstore_core::Error::Io(e),
            other => kstore_core::Error::InvalidArgument(other.to_string()),
        }
    }
}

/// Options of a store stack
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Capacity of each global per-type cache
    pub max_size: usize,
    /// Written ids tracked per type and transaction before the whole type is evicted at commit
    pub max_changes: usize,
    /// Changes buffered per type and transaction before they are pushed to the backend
    pub max_buffered_changes: usize,
    /// Synchronizer specification: `"N"`, `"N:K"`, `"N:WX"` or `"N:CX"`
    pub synchronizer: String,
    /// Log every backend call at DEBUG
    pub logging: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            max_changes: DEFAULT_MAX_CHANGES,
            max_buffered_changes: DEFAULT_MAX_BUFFERED_CHANGES,
            synchronizer: DEFAULT_SYNCHRONIZER.to_string(),
            logging: false,
        }
    }
}

impl StoreConfig {
    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges and the synchronizer specification
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::Invalid("max_size must be positive".into()));
        }
        if self.max_changes == 0 {
            return Err(ConfigError::Invalid("max_changes must be positive".into()));
        }
        self.synchronizer_spec()?;
        Ok(())
    }

    /// Parsed synchronizer specification
    pub fn synchronizer_spec(&self) -> Result<SynchronizerSpec, SpecError> {
        self.synchronizer.parse()
    }

    /// Cache sizing
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_size: self.max_size,
            max_changes: self.max_changes,
            max_buffered_changes: self.max_buffered_changes,
        }
    }
}
