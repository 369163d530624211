//! Copying source files into the destination tree.

use super::metadata::FileMetadata;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::warn;

/// Capability for placing a file's bytes at a destination path.
///
/// Implementations must leave either the previous destination file or the
/// complete new one in place, never a truncated copy.
pub trait FileCopier: Send + Sync {
    /// Copy `source` to `dest`, creating missing parent directories.
    /// Returns the number of bytes written.
    fn copy_file(&self, source: &Path, dest: &Path) -> io::Result<u64>;
}

/// Copies within the local filesystem, preserving mtime and permissions.
///
/// Content is streamed into a temporary file next to `dest` and renamed
/// into place.
#[derive(Debug, Clone, Default)]
pub struct LocalCopier;

impl FileCopier for LocalCopier {
    fn copy_file(&self, source: &Path, dest: &Path) -> io::Result<u64> {
        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let metadata = FileMetadata::from_path(source)?;
        let mut reader = File::open(source)?;

        let mut temp = NamedTempFile::new_in(parent)?;
        let bytes = io::copy(&mut reader, temp.as_file_mut())?;
        temp.persist(dest).map_err(|e| e.error)?;

        if let Err(e) = metadata.apply_to_path(dest) {
            warn!("Could not preserve metadata on {}: {}", dest.display(), e);
        }

        Ok(bytes)
    }
}
