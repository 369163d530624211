//! Persisted fingerprint state for a destination tree.
//!
//! The state file records, for every file present in the last successful
//! run, the digest of its content. It is serialized as
//! `.backupmate_state.json` in the destination directory unless overridden.
//!
//! Writes go to a temporary file in the same directory which is then renamed
//! over the previous state, so an interrupted commit leaves the old state
//! readable.

use crate::config::CorruptStatePolicy;
use crate::hash::ContentHash;
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Default state file name inside the destination directory.
pub const DEFAULT_STATE_FILE_NAME: &str = ".backupmate_state.json";

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Fingerprint of one file at its last successful backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintEntry {
    /// Source-relative path with `/` separators. Stored as the map key.
    #[serde(skip)]
    pub relative_path: String,

    pub content_hash: ContentHash,

    pub size_bytes: u64,

    /// Observed modification time. Diagnostic only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
}

/// Complete fingerprint state for one destination tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub schema_version: u32,

    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,

    pub entries: BTreeMap<String, FingerprintEntry>,
}

fn default_hash_algorithm() -> String {
    "sha256".to_string()
}

impl StateSnapshot {
    pub fn new(hash_algorithm: &str) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            hash_algorithm: hash_algorithm.to_string(),
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, relative_path: &str) -> Option<&FingerprintEntry> {
        self.entries.get(relative_path)
    }

    /// Insert or replace the entry for `entry.relative_path`.
    pub fn insert(&mut self, entry: FingerprintEntry) {
        self.entries.insert(entry.relative_path.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total size of all tracked files.
    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    /// Map keys are authoritative for `relative_path`.
    fn restore_paths(&mut self) {
        for (path, entry) in self.entries.iter_mut() {
            entry.relative_path = path.clone();
        }
    }
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self::new(&default_hash_algorithm())
    }
}

/// Older state layout: a flat map of path to hex digest.
#[derive(Debug, Deserialize)]
struct LegacyState {
    files: BTreeMap<String, ContentHash>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StateDocument {
    Current(StateSnapshot),
    Legacy(LegacyState),
}

impl From<LegacyState> for StateSnapshot {
    fn from(legacy: LegacyState) -> Self {
        let mut snapshot = StateSnapshot::default();
        for (path, hash) in legacy.files {
            snapshot.insert(FingerprintEntry {
                relative_path: path,
                content_hash: hash,
                size_bytes: 0,
                modified_time: None,
            });
        }
        snapshot
    }
}

/// Where the previous state for a run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateOrigin {
    /// Parsed from an existing state file.
    Loaded,
    /// No state file existed; started empty.
    Missing,
    /// Parsed from the legacy layout and upgraded in memory.
    Migrated,
    /// The file was corrupt and the policy allowed starting empty.
    Discarded,
}

#[derive(Debug, Clone)]
pub struct LoadedState {
    pub snapshot: StateSnapshot,
    pub origin: StateOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Written,
    SkippedDryRun,
}

/// Loads and atomically persists the state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    dry_run: bool,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            path: path.into(),
            dry_run,
        }
    }

    /// Load the state file.
    ///
    /// A missing file yields an empty snapshot. A file that exists but
    /// cannot be parsed yields `BackupError::StateCorrupt`.
    pub fn load(&self) -> Result<LoadedState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No state file at {}, starting empty", self.path.display());
                return Ok(LoadedState {
                    snapshot: StateSnapshot::default(),
                    origin: StateOrigin::Missing,
                });
            }
            Err(e) => return Err(BackupError::Io(e)),
        };

        let document: StateDocument =
            serde_json::from_str(&content).map_err(|e| BackupError::StateCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let (mut snapshot, origin) = match document {
            StateDocument::Current(snapshot) => (snapshot, StateOrigin::Loaded),
            StateDocument::Legacy(legacy) => {
                info!(
                    "Migrating legacy state file {} ({} entries)",
                    self.path.display(),
                    legacy.files.len()
                );
                (StateSnapshot::from(legacy), StateOrigin::Migrated)
            }
        };

        if snapshot.schema_version > CURRENT_SCHEMA_VERSION {
            warn!(
                "State file {} has schema version {} (newer than {}), reading known fields only",
                self.path.display(),
                snapshot.schema_version,
                CURRENT_SCHEMA_VERSION
            );
        }
        snapshot.restore_paths();

        debug!(
            "Loaded state: {} entries, {} bytes tracked",
            snapshot.len(),
            snapshot.total_bytes()
        );

        Ok(LoadedState { snapshot, origin })
    }

    /// Load the state file, applying `policy` when it is corrupt.
    pub fn load_with_policy(&self, policy: CorruptStatePolicy) -> Result<LoadedState> {
        match self.load() {
            Err(BackupError::StateCorrupt { path, reason })
                if policy == CorruptStatePolicy::TreatAsEmpty =>
            {
                warn!(
                    "Discarding corrupt state file {} ({}); every file will be treated as new",
                    path.display(),
                    reason
                );
                Ok(LoadedState {
                    snapshot: StateSnapshot::default(),
                    origin: StateOrigin::Discarded,
                })
            }
            other => other,
        }
    }

    /// Persist `snapshot`, replacing the previous state atomically.
    ///
    /// Does nothing in dry-run mode.
    pub fn commit(&self, snapshot: &StateSnapshot) -> Result<CommitOutcome> {
        if self.dry_run {
            debug!("Dry run: not writing {}", self.path.display());
            return Ok(CommitOutcome::SkippedDryRun);
        }

        self.write_atomic(snapshot).map_err(|source| BackupError::Commit {
            path: self.path.clone(),
            source,
        })?;

        info!(
            "Committed state: {} entries to {}",
            snapshot.len(),
            self.path.display()
        );
        Ok(CommitOutcome::Written)
    }

    fn write_atomic(&self, snapshot: &StateSnapshot) -> io::Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut temp = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut temp, snapshot)?;
        temp.write_all(b"\n")?;
        temp.as_file().sync_all()?;

        temp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(path: &str, hex_byte: u8, size: u64) -> FingerprintEntry {
        FingerprintEntry {
            relative_path: path.to_string(),
            content_hash: ContentHash::from_bytes([hex_byte; 32]),
            size_bytes: size,
            modified_time: None,
        }
    }

    #[test]
    fn test_missing_file_is_empty() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = StateStore::new(temp_dir.path().join("state.json"), false);

        let loaded = store.load()?;
        assert!(loaded.snapshot.is_empty());
        assert_eq!(loaded.origin, StateOrigin::Missing);
        Ok(())
    }

    #[test]
    fn test_commit_then_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nested").join("state.json");
        let store = StateStore::new(&path, false);

        let mut snapshot = StateSnapshot::new("sha256");
        snapshot.insert(entry("a.txt", 0xaa, 5));
        snapshot.insert(entry("dir/b.txt", 0xbb, 7));

        assert_eq!(store.commit(&snapshot)?, CommitOutcome::Written);

        let loaded = store.load()?;
        assert_eq!(loaded.origin, StateOrigin::Loaded);
        assert_eq!(loaded.snapshot, snapshot);
        assert_eq!(loaded.snapshot.get("dir/b.txt").unwrap().relative_path, "dir/b.txt");
        Ok(())
    }

    #[test]
    fn test_dry_run_commit_writes_nothing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("state.json");
        let store = StateStore::new(&path, true);

        let mut snapshot = StateSnapshot::default();
        snapshot.insert(entry("a.txt", 1, 1));

        assert_eq!(store.commit(&snapshot)?, CommitOutcome::SkippedDryRun);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_corrupt_file_aborts_by_default() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "{ not json")?;

        let store = StateStore::new(&path, false);
        let err = store.load_with_policy(CorruptStatePolicy::Abort).unwrap_err();
        assert!(matches!(err, BackupError::StateCorrupt { .. }));
        Ok(())
    }

    #[test]
    fn test_corrupt_file_treated_as_empty_when_opted_in() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "[]")?;

        let store = StateStore::new(&path, false);
        let loaded = store.load_with_policy(CorruptStatePolicy::TreatAsEmpty)?;
        assert!(loaded.snapshot.is_empty());
        assert_eq!(loaded.origin, StateOrigin::Discarded);

        // The corrupt file itself is left alone until a commit replaces it.
        assert_eq!(fs::read_to_string(&path)?, "[]");
        Ok(())
    }

    #[test]
    fn test_legacy_layout_is_migrated() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("state.json");
        let hello = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        fs::write(&path, format!(r#"{{"files": {{"a.txt": "{hello}"}}}}"#))?;

        let loaded = StateStore::new(&path, false).load()?;
        assert_eq!(loaded.origin, StateOrigin::Migrated);
        assert_eq!(loaded.snapshot.schema_version, CURRENT_SCHEMA_VERSION);
        let a = loaded.snapshot.get("a.txt").unwrap();
        assert_eq!(a.content_hash.to_hex(), hello);
        assert_eq!(a.relative_path, "a.txt");
        Ok(())
    }

    #[test]
    fn test_newer_schema_with_unknown_fields_loads() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("state.json");
        let hash = "00".repeat(32);
        fs::write(
            &path,
            format!(
                r#"{{"schema_version": 7, "hash_algorithm": "sha256", "created_by": "future",
                    "entries": {{"x": {{"content_hash": "{hash}", "size_bytes": 3, "owner": "root"}}}}}}"#
            ),
        )?;

        let loaded = StateStore::new(&path, false).load()?;
        assert_eq!(loaded.snapshot.schema_version, 7);
        assert_eq!(loaded.snapshot.get("x").unwrap().size_bytes, 3);
        Ok(())
    }

    #[test]
    fn test_failed_commit_keeps_previous_state() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("state.json");
        let store = StateStore::new(&path, false);

        let mut snapshot = StateSnapshot::default();
        snapshot.insert(entry("a.txt", 1, 1));
        store.commit(&snapshot)?;
        let before = fs::read(&path)?;

        // The parent is a regular file, so the state directory cannot be created.
        let blocked = StateStore::new(path.join("child.json"), false);
        let err = blocked.commit(&snapshot).unwrap_err();
        assert!(matches!(err, BackupError::Commit { .. }));

        assert_eq!(fs::read(&path)?, before);
        Ok(())
    }
}
