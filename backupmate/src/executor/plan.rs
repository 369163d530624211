//! Copy/skip classification.
//!
//! Each candidate is hashed and compared with the previous snapshot. Every
//! readable regular file produces a fresh fingerprint regardless of the
//! decision, so the snapshot built from a run describes the whole current
//! tree rather than a diff against history.

use crate::config::BackupMode;
use crate::fs::metadata::FileMetadata;
use crate::fs::Candidate;
use crate::hash::{ContentHash, ContentHasher};
use crate::state::{FingerprintEntry, StateSnapshot};
use serde::{Serialize, Serializer};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Copy,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionReason {
    FullMode,
    New,
    ContentChanged,
    Unchanged,
    UnsupportedType,
    /// The file could not be read; carries a short error kind label.
    Error(&'static str),
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::FullMode => f.write_str("full-mode"),
            DecisionReason::New => f.write_str("new"),
            DecisionReason::ContentChanged => f.write_str("content-changed"),
            DecisionReason::Unchanged => f.write_str("unchanged"),
            DecisionReason::UnsupportedType => f.write_str("unsupported-type"),
            DecisionReason::Error(kind) => write!(f, "error:{kind}"),
        }
    }
}

impl Serialize for DecisionReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Decision for one candidate in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupDecision {
    pub relative_path: String,
    pub action: Action,
    pub reason: DecisionReason,
    pub size_bytes: u64,
}

/// Planner output for one candidate.
#[derive(Debug, Clone)]
pub struct PlannedFile {
    pub decision: BackupDecision,
    /// Absolute source path, present for regular files.
    pub source: Option<PathBuf>,
    /// Fingerprint for the new snapshot. `None` for unreadable or unsupported entries.
    pub fingerprint: Option<FingerprintEntry>,
    /// Read error message when the file could not be hashed.
    pub error: Option<String>,
}

/// Short, stable label for an I/O error kind.
pub fn error_kind_label(kind: io::ErrorKind) -> &'static str {
    match kind {
        io::ErrorKind::NotFound => "not-found",
        io::ErrorKind::PermissionDenied => "permission-denied",
        io::ErrorKind::InvalidData => "invalid-data",
        io::ErrorKind::UnexpectedEof => "unexpected-eof",
        io::ErrorKind::Interrupted => "interrupted",
        io::ErrorKind::OutOfMemory => "out-of-memory",
        _ => "io",
    }
}

/// Classifies candidates against the previous snapshot.
#[derive(Clone)]
pub struct DiffPlanner {
    previous: Arc<StateSnapshot>,
    mode: BackupMode,
    hasher: Arc<dyn ContentHasher>,
}

impl DiffPlanner {
    pub fn new(
        previous: Arc<StateSnapshot>,
        mode: BackupMode,
        hasher: Arc<dyn ContentHasher>,
    ) -> Self {
        Self {
            previous,
            mode,
            hasher,
        }
    }

    /// Decide copy or skip for a file whose current digest is `current`.
    pub fn classify(&self, relative_path: &str, current: &ContentHash) -> (Action, DecisionReason) {
        if self.mode == BackupMode::Full {
            return (Action::Copy, DecisionReason::FullMode);
        }

        match self.previous.get(relative_path) {
            None => (Action::Copy, DecisionReason::New),
            Some(previous) if previous.content_hash != *current => {
                (Action::Copy, DecisionReason::ContentChanged)
            }
            Some(_) => (Action::Skip, DecisionReason::Unchanged),
        }
    }

    /// Hash and classify one candidate.
    ///
    /// Never fails: read errors become `Skip("error:<kind>")` decisions.
    pub fn plan(&self, candidate: Candidate) -> PlannedFile {
        match candidate {
            Candidate::File {
                path,
                relative_path,
            } => {
                let hashed = FileMetadata::from_path(&path)
                    .and_then(|meta| self.hasher.hash_file(&path).map(|h| (meta, h)));

                match hashed {
                    Ok((meta, hashed)) => {
                        let (action, reason) = self.classify(&relative_path, &hashed.hash);
                        debug!("{} -> {:?} ({})", relative_path, action, reason);

                        PlannedFile {
                            fingerprint: Some(FingerprintEntry {
                                relative_path: relative_path.clone(),
                                content_hash: hashed.hash,
                                size_bytes: hashed.size,
                                modified_time: meta.modified_utc(),
                            }),
                            decision: BackupDecision {
                                relative_path,
                                action,
                                reason,
                                size_bytes: hashed.size,
                            },
                            source: Some(path),
                            error: None,
                        }
                    }
                    Err(e) => {
                        warn!("Cannot read {}: {}", relative_path, e);
                        PlannedFile {
                            decision: BackupDecision {
                                relative_path,
                                action: Action::Skip,
                                reason: DecisionReason::Error(error_kind_label(e.kind())),
                                size_bytes: 0,
                            },
                            source: Some(path),
                            fingerprint: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
            Candidate::Unsupported { relative_path } => {
                debug!("{} -> skipped (unsupported file type)", relative_path);
                PlannedFile {
                    decision: BackupDecision {
                        relative_path,
                        action: Action::Skip,
                        reason: DecisionReason::UnsupportedType,
                        size_bytes: 0,
                    },
                    source: None,
                    fingerprint: None,
                    error: None,
                }
            }
            Candidate::Unreadable {
                relative_path,
                error,
            } => {
                warn!("Cannot inspect {}: {:?}", relative_path, error);
                PlannedFile {
                    decision: BackupDecision {
                        relative_path,
                        action: Action::Skip,
                        reason: DecisionReason::Error(error_kind_label(error)),
                        size_bytes: 0,
                    },
                    source: None,
                    fingerprint: None,
                    error: Some(format!("cannot inspect entry: {error}")),
                }
            }
        }
    }
}
