//! Utility modules shared by the backup pipeline.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, Result};
