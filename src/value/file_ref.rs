//! References to externally stored data.

use crate::integrity::{Checksum, ChecksumError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A pointer to an external file plus the checksum recorded for it on a
/// previous run, if any.
///
/// Two references are equal iff both path and recorded checksum match. The
/// fresh checksum is computed by the evaluation pass that consumes the
/// reference (see `integrity::ChecksumCache`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<Checksum>,
}

impl FileRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), checksum: None }
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn recorded_checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    /// Resolves a relative path against `base`. Absolute paths are kept.
    pub fn resolved_against(mut self, base: &Path) -> Self {
        if self.path.is_relative() {
            self.path = base.join(&self.path);
        }
        self
    }

    /// Streams the file and hashes it. Uncached; evaluation goes through
    /// `ChecksumCache` instead.
    pub fn compute_checksum(&self, buffer_size: usize) -> Result<Checksum, ChecksumError> {
        Checksum::of_file(&self.path, buffer_size)
    }
}
