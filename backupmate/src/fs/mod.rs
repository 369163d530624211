//! File system access: source traversal, metadata, and copying.

pub mod copier;
pub mod metadata;
pub mod walker;

pub use copier::{FileCopier, LocalCopier};
pub use walker::{Candidate, ExcludeSet, TreeWalker};
