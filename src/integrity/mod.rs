//! File-integrity tracking.
//!
//! Every `FileRef` consumed during an evaluation pass is hashed once (SHA-256,
//! streamed) and recorded in the pass's `IntegritySet`. The set is the only
//! artifact meant to be persisted between runs; comparing a fresh set against
//! a persisted one reveals which external files changed.

use crate::value::FileRef;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;

pub const CHECKSUM_ALGORITHM: &str = "sha256";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot checksum '{}': {reason}", path.display())]
pub struct ChecksumError {
    pub path: PathBuf,
    pub reason: String,
}

/// An `algorithm:hexdigest` content checksum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self::from_digest(hasher)
    }

    pub fn of_file(path: &Path, buffer_size: usize) -> Result<Self, ChecksumError> {
        let io_err = |e: std::io::Error| ChecksumError { path: path.to_path_buf(), reason: e.to_string() };
        let mut file = File::open(path).map_err(io_err)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; buffer_size.max(1)];
        loop {
            let n = file.read(&mut buf).map_err(io_err)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self::from_digest(hasher))
    }

    fn from_digest(hasher: Sha256) -> Self {
        let hex: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();
        Self(format!("{}:{}", CHECKSUM_ALGORITHM, hex))
    }

    /// Wraps a checksum string read back from storage.
    pub fn from_recorded(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type ChecksumSlot = Arc<OnceLock<Result<Checksum, ChecksumError>>>;

/// Per-pass memo of file checksums, keyed by resolved path.
///
/// Safe to share across worker threads: a path is hashed at most once per
/// cache, failures included.
#[derive(Debug)]
pub struct ChecksumCache {
    buffer_size: usize,
    entries: Mutex<HashMap<PathBuf, ChecksumSlot>>,
}

impl ChecksumCache {
    pub fn new(buffer_size: usize) -> Self {
        Self { buffer_size, entries: Mutex::new(HashMap::new()) }
    }

    pub fn checksum(&self, file: &FileRef) -> Result<Checksum, ChecksumError> {
        let slot = {
            let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            entries.entry(file.path().to_path_buf()).or_default().clone()
        };
        // Only consumers of the same file wait on each other's read.
        slot.get_or_init(|| {
            let result = file.compute_checksum(self.buffer_size);
            match &result {
                Ok(sum) => debug!("checksummed {} -> {}", file.path().display(), sum),
                Err(e) => debug!("{}", e),
            }
            result
        })
        .clone()
    }
}

/// How a consumed file compares with the checksum recorded alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    New,
    Valid,
    Mismatched,
}

/// One external file as seen by an evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileObservation {
    pub path: PathBuf,
    pub checksum: Checksum,
    /// Checksum carried by the consumed `FileRef`, if it had one.
    pub recorded: Option<Checksum>,
}

impl FileObservation {
    pub fn observe(file: &FileRef, checksum: Checksum) -> Self {
        let obs = Self { path: file.path().to_path_buf(), checksum, recorded: file.recorded_checksum().cloned() };
        if obs.is_stale() {
            warn!(
                "external file {} changed: recorded {}, now {}",
                obs.path.display(),
                obs.recorded.as_ref().map(Checksum::as_str).unwrap_or("-"),
                obs.checksum
            );
        }
        obs
    }

    pub fn status(&self) -> FileStatus {
        match &self.recorded {
            None => FileStatus::New,
            Some(r) if *r == self.checksum => FileStatus::Valid,
            Some(_) => FileStatus::Mismatched,
        }
    }

    pub fn is_new(&self) -> bool {
        self.recorded.is_none()
    }

    pub fn is_stale(&self) -> bool {
        matches!(&self.recorded, Some(r) if *r != self.checksum)
    }
}

/// Path -> checksum observed during one pass, ordered by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegritySet {
    entries: BTreeMap<String, Checksum>,
}

impl IntegritySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation. Re-observing the same path with the same
    /// checksum is a no-op.
    pub fn insert(&mut self, path: impl Into<String>, checksum: Checksum) {
        self.entries.insert(path.into(), checksum);
    }

    pub fn get(&self, path: &str) -> Option<&Checksum> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Checksum)> {
        self.entries.iter().map(|(p, c)| (p.as_str(), c))
    }

    /// The persisted form: `[(path, checksum), ...]` ordered by path.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.entries.iter().map(|(p, c)| (p.clone(), c.to_string())).collect()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self { entries: pairs.into_iter().map(|(p, c)| (p, Checksum(c))).collect() }
    }

    /// Classifies this (current) set against a previously persisted one.
    pub fn compare(&self, previous: &IntegritySet) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        for (path, sum) in &self.entries {
            match previous.entries.get(path) {
                None => report.added.push(path.clone()),
                Some(old) if old != sum => report.changed.push(path.clone()),
                Some(_) => report.unchanged.push(path.clone()),
            }
        }
        report.removed = previous
            .entries
            .keys()
            .filter(|p| !self.entries.contains_key(*p))
            .cloned()
            .collect();
        report
    }
}

impl Serialize for IntegritySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

impl<'de> Deserialize<'de> for IntegritySet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = Vec::<(String, String)>::deserialize(deserializer)?;
        Ok(Self::from_pairs(pairs))
    }
}

/// Difference between two integrity sets. Every list is ordered by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}
