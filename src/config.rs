//! Engine configuration, loadable from TOML.
//!
//! ```toml
//! parallel = true
//! input_base_dir = "data"
//! checksum_buffer_size = 65536
//! fail_on_stale_files = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CHECKSUM_BUFFER_SIZE: usize = 8192;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Evaluate independent nodes of one wave concurrently.
    pub parallel: bool,
    /// Base directory for relative file references in raw inputs.
    pub input_base_dir: Option<PathBuf>,
    /// Read chunk size used when hashing external files.
    pub checksum_buffer_size: usize,
    /// Fail a node consuming a file whose checksum no longer matches the
    /// recorded one, instead of only warning.
    pub fail_on_stale_files: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            input_base_dir: None,
            checksum_buffer_size: DEFAULT_CHECKSUM_BUFFER_SIZE,
            fail_on_stale_files: false,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let mut config = Self::from_toml_str(&text)?;
        // A relative base directory is relative to the config file.
        if let (Some(dir), Some(parent)) = (&config.input_base_dir, path.parent()) {
            if dir.is_relative() {
                config.input_base_dir = Some(parent.join(dir));
            }
        }
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.checksum_buffer_size == 0 {
            return Err(ConfigError::Invalid("checksum_buffer_size must be positive".into()));
        }
        Ok(())
    }
}
