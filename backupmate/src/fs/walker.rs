//! Source tree traversal with exclude filtering.
//!
//! The walker yields one `Candidate` per non-directory entry below the
//! source root, in lexicographic depth-first order so that runs over the
//! same tree produce identical reports. Excluded files are filtered here and
//! never reach the planner. Exclude patterns are matched against file paths
//! only; a directory is always descended into.

use crate::utils::errors::{BackupError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Compiled exclude patterns, matched against `/`-separated relative paths.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    set: GlobSet,
}

impl ExcludeSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern).map_err(|source| BackupError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|source| BackupError::InvalidPattern {
            pattern: patterns
                .iter()
                .map(|p| p.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
            source,
        })?;

        Ok(Self { set })
    }

    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
        }
    }

    pub fn is_excluded(&self, relative_path: &str) -> bool {
        !self.set.is_empty() && self.set.is_match(relative_path)
    }
}

/// An entry discovered in the source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// A regular file eligible for backup.
    File {
        path: PathBuf,
        relative_path: String,
    },
    /// A symlink, socket, fifo or device node.
    Unsupported { relative_path: String },
    /// An entry that could not be inspected.
    Unreadable {
        relative_path: String,
        error: io::ErrorKind,
    },
}

impl Candidate {
    pub fn relative_path(&self) -> &str {
        match self {
            Candidate::File { relative_path, .. }
            | Candidate::Unsupported { relative_path }
            | Candidate::Unreadable { relative_path, .. } => relative_path,
        }
    }
}

/// Walks a source tree, applying excludes.
#[derive(Debug, Clone)]
pub struct TreeWalker {
    root: PathBuf,
    excludes: ExcludeSet,
    /// Absolute paths never descended into or yielded.
    skip_paths: Vec<PathBuf>,
}

impl TreeWalker {
    pub fn new(root: impl Into<PathBuf>, excludes: ExcludeSet) -> Self {
        Self {
            root: root.into(),
            excludes,
            skip_paths: Vec::new(),
        }
    }

    /// Never yield or descend into `path` (e.g. a destination nested in the source).
    pub fn skip_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.skip_paths.push(path.into());
        self
    }

    /// Lazily walk the tree.
    pub fn walk(&self) -> impl Iterator<Item = Candidate> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| self.keep(entry))
            .filter_map(move |entry| match entry {
                Ok(entry) => self.classify(&entry),
                Err(err) => {
                    let relative_path = err
                        .path()
                        .map(|p| relative_posix_path(p, &self.root))
                        .unwrap_or_default();
                    let kind = err
                        .io_error()
                        .map(|e| e.kind())
                        .unwrap_or(io::ErrorKind::Other);
                    debug!("Unreadable entry {}: {}", relative_path, err);
                    Some(Candidate::Unreadable {
                        relative_path,
                        error: kind,
                    })
                }
            })
    }

    fn keep(&self, entry: &DirEntry) -> bool {
        if self.skip_paths.iter().any(|p| p == entry.path()) {
            debug!("Skipping {} (inside source tree)", entry.path().display());
            return false;
        }
        if entry.file_type().is_dir() {
            return true;
        }
        let relative_path = relative_posix_path(entry.path(), &self.root);
        if self.excludes.is_excluded(&relative_path) {
            debug!("Excluded {}", relative_path);
            return false;
        }
        true
    }

    fn classify(&self, entry: &DirEntry) -> Option<Candidate> {
        let file_type = entry.file_type();
        if file_type.is_dir() {
            return None;
        }

        let relative_path = relative_posix_path(entry.path(), &self.root);
        if file_type.is_file() {
            Some(Candidate::File {
                path: entry.path().to_path_buf(),
                relative_path,
            })
        } else {
            Some(Candidate::Unsupported { relative_path })
        }
    }
}

/// Relative path of `path` below `root`, joined with `/` on every platform.
pub fn relative_posix_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn relative_paths(walker: &TreeWalker) -> Vec<String> {
        walker.walk().map(|c| c.relative_path().to_string()).collect()
    }

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let walker = TreeWalker::new(temp_dir.path(), ExcludeSet::empty());
        assert_eq!(walker.walk().count(), 0);
        Ok(())
    }

    #[test]
    fn test_walk_is_sorted_and_posix() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("sub/deeper"))?;
        fs::write(temp_dir.path().join("b.txt"), b"b")?;
        fs::write(temp_dir.path().join("a.txt"), b"a")?;
        fs::write(temp_dir.path().join("sub/c.txt"), b"c")?;
        fs::write(temp_dir.path().join("sub/deeper/d.txt"), b"d")?;

        let walker = TreeWalker::new(temp_dir.path(), ExcludeSet::empty());
        assert_eq!(
            relative_paths(&walker),
            vec!["a.txt", "b.txt", "sub/c.txt", "sub/deeper/d.txt"]
        );
        Ok(())
    }

    #[test]
    fn test_exclude_patterns() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("logs"))?;
        fs::write(temp_dir.path().join("keep.txt"), b"keep")?;
        fs::write(temp_dir.path().join("run.log"), b"exclude")?;
        fs::write(temp_dir.path().join("logs/old.log"), b"exclude")?;

        let walker = TreeWalker::new(temp_dir.path(), ExcludeSet::new(&["*.log"])?);
        assert_eq!(relative_paths(&walker), vec!["keep.txt"]);
        Ok(())
    }

    #[test]
    fn test_directory_name_match_does_not_hide_files() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("conf.d"))?;
        fs::write(temp_dir.path().join("conf.d/app.conf"), b"x")?;
        fs::write(temp_dir.path().join("extra.d"), b"y")?;

        let walker = TreeWalker::new(temp_dir.path(), ExcludeSet::new(&["*.d"])?);
        assert_eq!(relative_paths(&walker), vec!["conf.d/app.conf"]);
        Ok(())
    }

    #[test]
    fn test_directory_contents_excluded_by_file_pattern() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("node_modules/pkg"))?;
        fs::write(temp_dir.path().join("node_modules/pkg/index.js"), b"x")?;
        fs::write(temp_dir.path().join("main.js"), b"y")?;

        let walker = TreeWalker::new(temp_dir.path(), ExcludeSet::new(&["node_modules/*"])?);
        assert_eq!(relative_paths(&walker), vec!["main.js"]);
        Ok(())
    }

    #[test]
    fn test_skip_path() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let nested_dest = temp_dir.path().join("backup");

        fs::create_dir(&nested_dest)?;
        fs::write(nested_dest.join("copy.txt"), b"x")?;
        fs::write(temp_dir.path().join("orig.txt"), b"x")?;

        let walker = TreeWalker::new(temp_dir.path(), ExcludeSet::empty()).skip_path(&nested_dest);
        assert_eq!(relative_paths(&walker), vec!["orig.txt"]);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_is_unsupported() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("target.txt"), b"t")?;
        std::os::unix::fs::symlink(
            temp_dir.path().join("target.txt"),
            temp_dir.path().join("link.txt"),
        )?;

        let walker = TreeWalker::new(temp_dir.path(), ExcludeSet::empty());
        let candidates: Vec<Candidate> = walker.walk().collect();
        assert_eq!(candidates.len(), 2);
        assert_eq!(
            candidates[0],
            Candidate::Unsupported {
                relative_path: "link.txt".into()
            }
        );
        assert!(matches!(candidates[1], Candidate::File { .. }));
        Ok(())
    }

    #[test]
    fn test_relative_posix_path() {
        let root = Path::new("/data/src");
        assert_eq!(
            relative_posix_path(&Path::new("/data/src").join("a").join("b.txt"), root),
            "a/b.txt"
        );
        assert_eq!(relative_posix_path(Path::new("/data/src"), root), "");
    }
}
