//! Backupmate library
//!
//! Content-aware local backups: files are copied from a source tree into a
//! destination tree unless a persisted SHA-256 fingerprint shows their
//! content is unchanged since the last successful run.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod hash;
pub mod report;
pub mod state;
pub mod utils;

// Re-export commonly used types
pub use config::{BackupMode, RunConfig, Settings};
pub use executor::{BackupExecutor, RunOutcome};
pub use report::RunReport;
pub use state::{StateSnapshot, StateStore};
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
