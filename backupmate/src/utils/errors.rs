//! Error types for backup runs.
//!
//! Only whole-run failures are represented here. Problems with a single file
//! (unreadable source, unwritable destination) are recorded in the run report
//! and never surface as a `BackupError`.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code for invalid arguments or configuration.
pub const EXIT_INVALID_ARGS: i32 = 1;

/// Exit code for failures while the run was in progress.
pub const EXIT_RUNTIME_ERROR: i32 = 2;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid exclude pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("State file {} is corrupt: {reason}", .path.display())]
    StateCorrupt { path: PathBuf, reason: String },

    #[error("Failed to commit state file {}: {source}", .path.display())]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Copy of {path} failed and the run was configured to abort: {source}")]
    CopyAborted {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup interrupted before the state was committed")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackupError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            BackupError::Config(_)
            | BackupError::InvalidPattern { .. }
            | BackupError::Settings(_) => EXIT_INVALID_ARGS,
            _ => EXIT_RUNTIME_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
