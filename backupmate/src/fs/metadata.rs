//! File metadata carried from source to destination.
//!
//! Only what a local mirror needs is preserved: modification time and, on
//! Unix, permission bits. Applying metadata is best-effort.

use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Metadata snapshot of a source file
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Last modified time
    pub modified: Option<SystemTime>,

    /// File permissions (Unix mode bits)
    pub permissions: Option<u32>,
}

impl FileMetadata {
    /// Extract metadata from a file path
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;

        #[cfg(unix)]
        let permissions = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode())
        };

        #[cfg(not(unix))]
        let permissions = None;

        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
            permissions,
        })
    }

    /// Modification time as UTC, for fingerprints.
    pub fn modified_utc(&self) -> Option<DateTime<Utc>> {
        self.modified.map(DateTime::<Utc>::from)
    }

    /// Apply permissions and modification time to `path`.
    pub fn apply_to_path(&self, path: &Path) -> std::io::Result<()> {
        if let Some(mode) = self.permissions {
            set_mode(path, mode)?;
        }

        if let Some(modified) = self.modified {
            filetime::set_file_mtime(path, FileTime::from_system_time(modified))?;
        }

        Ok(())
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
